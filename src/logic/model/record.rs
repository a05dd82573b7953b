use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Timestamp layouts flow converters write, tried in order
const FLOW_TIME_FORMATS: [&str; 3] = [
    "%d/%m/%Y %I:%M:%S %p", // CICFlowMeter
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// One classified flow, one NDJSON line in the prediction log
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    /// `row_id` of the flow inside its table
    pub index: u64,
    pub prediction: String,

    // File-dominant endpoints
    pub source_ip: String,
    pub dest_ip: String,

    /// The flow's observation time as RFC 3339, or the converter's raw text
    /// when it could not be parsed
    pub timestamp: String,

    /// Stem of the feature table the flow came from
    pub source_file: String,
}

/// RFC 3339 form of a converter timestamp. Converters write local wall time
/// without an offset; the host's zone is applied.
pub fn flow_time(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.to_rfc3339());
    }

    FLOW_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|at| at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cicflowmeter_time_becomes_rfc3339() {
        let parsed = flow_time("13/06/2024 10:15:32 PM").unwrap();
        assert!(parsed.starts_with("2024-06-13T22:15:32"), "{}", parsed);
        assert!(DateTime::parse_from_rfc3339(&parsed).is_ok());

        let parsed = flow_time("2024-06-13 10:15:32").unwrap();
        assert!(parsed.starts_with("2024-06-13T10:15:32"), "{}", parsed);
    }

    #[test]
    fn test_rfc3339_kept() {
        assert_eq!(
            flow_time("2024-06-13T10:15:32+02:00").as_deref(),
            Some("2024-06-13T10:15:32+02:00")
        );
    }

    #[test]
    fn test_unrecognized_time_is_none() {
        assert_eq!(flow_time("t0"), None);
        assert_eq!(flow_time(""), None);
        assert_eq!(flow_time("31/02/2024 10:15:32 AM"), None);
    }
}
