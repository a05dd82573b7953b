//! Flow Tables - CSV I/O
//!
//! Raw converter output is read as strings; normalized feature tables and
//! identity side tables are written with `row_id` as their first column.

use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};

use super::layout::{IdentityColumns, ROW_ID_COLUMN};
use crate::error::{IoContext, PipelineError, PipelineResult};
use crate::logic::artifact;

// ============================================================================
// RAW TABLE
// ============================================================================

/// Converter output, untouched apart from trimmed header names
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
}

impl RawTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell by position; short rows read as empty
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).unwrap_or("")
    }
}

pub fn read_raw(path: &Path) -> PipelineResult<RawTable> {
    let file = File::open(path).at(path)?;
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::csv(path, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record.map_err(|e| PipelineError::csv(path, e))?);
    }

    Ok(RawTable { headers, rows })
}

// ============================================================================
// FEATURE TABLE
// ============================================================================

/// Normalized model input. `values[i]` belongs to `row_ids[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub row_ids: Vec<u64>,
    pub values: Vec<Vec<f64>>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    /// Column values by name
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.values.iter().map(|row| row[idx]).collect())
    }
}

pub fn write_features(path: &Path, table: &FeatureTable) -> PipelineResult<()> {
    let partial = artifact::partial_path(path);
    {
        let mut writer = WriterBuilder::new()
            .from_path(&partial)
            .map_err(|e| PipelineError::csv(&partial, e))?;

        let mut header = vec![ROW_ID_COLUMN.to_string()];
        header.extend(table.columns.iter().cloned());
        writer
            .write_record(&header)
            .map_err(|e| PipelineError::csv(&partial, e))?;

        for (row_id, values) in table.row_ids.iter().zip(&table.values) {
            let mut record = Vec::with_capacity(values.len() + 1);
            record.push(row_id.to_string());
            record.extend(values.iter().map(|v| v.to_string()));
            writer
                .write_record(&record)
                .map_err(|e| PipelineError::csv(&partial, e))?;
        }
        writer.flush().at(&partial)?;
    }
    artifact::commit(&partial, path).at(path)
}

pub fn read_features(path: &Path) -> PipelineResult<FeatureTable> {
    let file = File::open(path).at(path)?;
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(file);

    let headers = reader.headers().map_err(|e| PipelineError::csv(path, e))?.clone();
    match headers.get(0) {
        Some(first) if first == ROW_ID_COLUMN => {}
        _ => {
            return Err(PipelineError::MissingColumn {
                path: path.to_path_buf(),
                column: ROW_ID_COLUMN.to_string(),
            })
        }
    }

    let mut table = FeatureTable {
        columns: headers.iter().skip(1).map(str::to_string).collect(),
        ..Default::default()
    };

    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| PipelineError::csv(path, e))?;
        let row_id = parse_row_id(path, line, record.get(0))?;

        let mut values = Vec::with_capacity(table.columns.len());
        for cell in record.iter().skip(1) {
            let v: f64 = cell.parse().map_err(|_| {
                PipelineError::csv(path, format!("row {}: non-numeric value {:?}", line + 1, cell))
            })?;
            values.push(v);
        }

        table.row_ids.push(row_id);
        table.values.push(values);
    }

    Ok(table)
}

fn parse_row_id(path: &Path, line: usize, cell: Option<&str>) -> PipelineResult<u64> {
    cell.and_then(|c| c.parse().ok()).ok_or_else(|| {
        PipelineError::csv(path, format!("row {}: invalid {}", line + 1, ROW_ID_COLUMN))
    })
}

// ============================================================================
// IDENTITY TABLE
// ============================================================================

/// Flow identity kept beside the features
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRow {
    pub row_id: u64,
    pub source: String,
    pub destination: String,
    pub timestamp: String,
}

pub fn write_identity(path: &Path, rows: &[IdentityRow], names: &IdentityColumns) -> PipelineResult<()> {
    let partial = artifact::partial_path(path);
    {
        let mut writer = WriterBuilder::new()
            .from_path(&partial)
            .map_err(|e| PipelineError::csv(&partial, e))?;

        writer
            .write_record([
                ROW_ID_COLUMN,
                names.source.as_str(),
                names.destination.as_str(),
                names.timestamp.as_str(),
            ])
            .map_err(|e| PipelineError::csv(&partial, e))?;

        for row in rows {
            writer
                .write_record([
                    row.row_id.to_string().as_str(),
                    row.source.as_str(),
                    row.destination.as_str(),
                    row.timestamp.as_str(),
                ])
                .map_err(|e| PipelineError::csv(&partial, e))?;
        }
        writer.flush().at(&partial)?;
    }
    artifact::commit(&partial, path).at(path)
}

pub fn read_identity(path: &Path, names: &IdentityColumns) -> PipelineResult<Vec<IdentityRow>> {
    let file = File::open(path).at(path)?;
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(file);
    let headers = reader.headers().map_err(|e| PipelineError::csv(path, e))?.clone();

    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PipelineError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
    };
    let row_id = find(ROW_ID_COLUMN)?;
    let source = find(&names.source)?;
    let destination = find(&names.destination)?;
    let timestamp = find(&names.timestamp)?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| PipelineError::csv(path, e))?;
        rows.push(IdentityRow {
            row_id: parse_row_id(path, line, record.get(row_id))?,
            source: record.get(source).unwrap_or("").to_string(),
            destination: record.get(destination).unwrap_or("").to_string(),
            timestamp: record.get(timestamp).unwrap_or("").to_string(),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_read_raw_trims_headers_and_tolerates_short_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        fs::write(&path, " Src IP , Dst Port\n10.0.0.1,443\n10.0.0.2\n").unwrap();

        let raw = read_raw(&path).unwrap();
        assert_eq!(raw.headers, vec!["Src IP", "Dst Port"]);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.cell(1, 1), "");
    }

    #[test]
    fn test_feature_table_requires_row_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("norm.csv");
        fs::write(&path, "Protocol\n6\n").unwrap();

        let err = read_features(&path).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }

    #[test]
    fn test_feature_table_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("norm.csv");
        let table = FeatureTable {
            columns: vec!["Protocol".into(), "Flow Bytes/s".into()],
            row_ids: vec![0, 7],
            values: vec![vec![6.0, 0.5], vec![17.0, 1e12]],
        };

        write_features(&path, &table).unwrap();
        assert!(!artifact::partial_path(&path).exists());
        assert_eq!(read_features(&path).unwrap(), table);
    }

    #[test]
    fn test_identity_rejects_bad_row_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x_aux.csv");
        fs::write(&path, "row_id,Src IP,Dst IP,Timestamp\nabc,1.1.1.1,2.2.2.2,t\n").unwrap();

        let err = read_identity(&path, &IdentityColumns::default()).unwrap_err();
        assert!(err.is_data_shape());
    }
}
