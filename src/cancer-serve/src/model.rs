use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;
/// Color channels fed to the model.
pub const CHANNELS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model directory {0:?} does not exist")]
    NotFound(PathBuf),
    #[error("could not load saved model: {0}")]
    Load(String),
    #[error("saved model signature has no {0}")]
    Signature(&'static str),
    #[error("built without the `tensorflow` feature, no model backend available")]
    Unsupported,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("input tensor has {actual} values, expected {expected}")]
    Shape { expected: usize, actual: usize },
    #[error("model run failed: {0}")]
    Runtime(String),
    #[error("model produced no output")]
    EmptyOutput,
    #[error("model produced a non-finite score {0}")]
    NonFinite(f32),
}

/// A `[1, 224, 224, 3]` batch of one RGB image, NHWC, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    values: Vec<f32>,
}

impl InputTensor {
    pub const SHAPE: [u64; 4] = [1, INPUT_SIZE as u64, INPUT_SIZE as u64, CHANNELS as u64];
    pub const LEN: usize = (INPUT_SIZE * INPUT_SIZE) as usize * CHANNELS;

    pub fn new(values: Vec<f32>) -> Result<Self, InferenceError> {
        if values.len() != Self::LEN {
            return Err(InferenceError::Shape {
                expected: Self::LEN,
                actual: values.len(),
            });
        }
        Ok(InputTensor { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// A binary classifier producing one score in `[0, 1]` per image.
///
/// `predict` is stateless per call, so one instance may serve concurrent
/// requests.
pub trait Model: Send + Sync {
    fn predict(&self, input: &InputTensor) -> Result<f32, InferenceError>;
}

/// Load the model exported under `export_dir`.
pub fn load(export_dir: &Path) -> Result<Arc<dyn Model>, ModelError> {
    if !export_dir.exists() {
        return Err(ModelError::NotFound(export_dir.to_path_buf()));
    }
    load_backend(export_dir)
}

#[cfg(feature = "tensorflow")]
fn load_backend(export_dir: &Path) -> Result<Arc<dyn Model>, ModelError> {
    Ok(Arc::new(crate::saved_model::SavedModel::load(export_dir)?))
}

#[cfg(not(feature = "tensorflow"))]
fn load_backend(_export_dir: &Path) -> Result<Arc<dyn Model>, ModelError> {
    Err(ModelError::Unsupported)
}
