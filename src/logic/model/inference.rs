//! Inference Engine - ONNX Runtime Integration
//!
//! The flow classifier is a pre-trained graph (e.g. a scikit-learn decision
//! tree exported with skl2onnx): `float[N, F]` in, one integer label per row
//! out. Anything implementing [`Classifier`] can stand in for it.

use std::path::Path;
use std::time::Instant;

use ndarray::{Array2, ArrayView2};
use parking_lot::Mutex;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Value;

/// Output skl2onnx gives the predicted class
const LABEL_OUTPUT: &str = "label";

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug)]
pub struct InferenceError(pub String);

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InferenceError: {}", self.0)
    }
}

impl std::error::Error for InferenceError {}

// ============================================================================
// CLASSIFIER TRAIT
// ============================================================================

/// Row-wise classifier: one numeric label per feature row
pub trait Classifier: Send + Sync {
    /// Human readable identity for logs
    fn name(&self) -> &str;

    /// `features` is `[rows, schema width]` in model column order
    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Vec<i64>, InferenceError>;
}

// ============================================================================
// ONNX IMPLEMENTATION
// ============================================================================

pub struct OnnxClassifier {
    session: Mutex<Session>,
    model_path: String,
    output_name: String,
}

impl OnnxClassifier {
    /// Load ONNX model from file
    pub fn load(model_path: &Path) -> Result<Self, InferenceError> {
        log::info!("Loading ONNX model from: {}", model_path.display());

        if !model_path.exists() {
            return Err(InferenceError(format!("Model not found: {}", model_path.display())));
        }

        let session = Session::builder()
            .map_err(|e| InferenceError(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError(format!("Failed to set optimization: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| InferenceError(format!("Failed to load model: {}", e)))?;

        // Prefer the class label over probability outputs
        let output_name = session.outputs.iter()
            .find(|o| o.name == LABEL_OUTPUT)
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())
            .ok_or_else(|| InferenceError("No output defined".to_string()))?;

        log::info!("ONNX model loaded successfully (output '{}')", output_name);

        Ok(Self {
            session: Mutex::new(session),
            model_path: model_path.display().to_string(),
            output_name,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.model_path
    }

    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Vec<i64>, InferenceError> {
        let start_time = Instant::now();
        let rows = features.nrows();

        let input_array: Array2<f32> = features.to_owned();
        let input_tensor = Value::from_array(input_array)
            .map_err(|e| InferenceError(format!("Tensor error: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![input_tensor])
            .map_err(|e| InferenceError(format!("Inference failed: {}", e)))?;

        let output = outputs.get(&self.output_name)
            .ok_or_else(|| InferenceError("No output".to_string()))?;

        // Integer labels normally; some exporters emit float class ids
        let labels: Vec<i64> = match output.try_extract_tensor::<i64>() {
            Ok(tensor) => tensor.1.to_vec(),
            Err(_) => {
                let tensor = output.try_extract_tensor::<f32>()
                    .map_err(|e| InferenceError(format!("Extract error: {}", e)))?;
                tensor.1.iter().map(|v| v.round() as i64).collect()
            }
        };

        log::debug!(
            "Classified {} rows in {}us",
            rows,
            start_time.elapsed().as_micros()
        );

        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_reported() {
        let err = OnnxClassifier::load(Path::new("/nonexistent/model.onnx"))
            .err()
            .expect("load should fail");
        assert!(err.to_string().contains("Model not found"));
    }
}
