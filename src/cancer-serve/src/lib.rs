//! Core of the cancer image prediction service.
//!
//! An uploaded image is validated and resized ([`preprocess`]), scored by a
//! SavedModel ([`model`], [`inference`]), and the labeled result persisted to
//! a document store ([`store`]). [`pipeline::Predictor`] ties the stages
//! together for the HTTP front end.

pub mod config;
pub mod credentials;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod record;
pub mod store;
mod timer;

#[cfg(feature = "tensorflow")]
mod saved_model;

pub use config::{InferenceFailurePolicy, ServiceConfig, StoreConfig};
pub use inference::{classify, Classification, DECISION_THRESHOLD};
pub use model::{InferenceError, InputTensor, Model, ModelError};
pub use pipeline::{PredictError, Predictor};
pub use preprocess::{PixelBuffer, Upload, ValidationError};
pub use record::{HistoryEntry, Label, PredictionRecord};
pub use store::{RecordStore, StoreError};
pub use timer::Timer;
