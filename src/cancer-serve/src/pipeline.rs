use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::task;

use crate::config::{InferenceFailurePolicy, DEFAULT_REQUEST_TIMEOUT};
use crate::inference::{self, Classification};
use crate::model::{InferenceError, Model};
use crate::preprocess::{self, Upload, ValidationError};
use crate::record::{HistoryEntry, Label, PredictionRecord};
use crate::store::{RecordStore, StoreError};
use crate::timer::Timer;

pub const NO_IMAGE_MESSAGE: &str = "No image file uploaded";
pub const INVALID_IMAGE_MESSAGE: &str = "Invalid image file uploaded";
pub const PREDICTION_FAILED_MESSAGE: &str = "Terjadi kesalahan dalam melakukan prediksi";
pub const HISTORY_FAILED_MESSAGE: &str = "Terjadi kesalahan dalam mengambil riwayat prediksi";

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("could not persist prediction: {0}")]
    Storage(#[source] StoreError),
    #[error("prediction did not finish within {0:?}")]
    DeadlineExceeded(Duration),
    #[error("prediction task failed: {0}")]
    Task(#[from] task::JoinError),
}

impl PredictError {
    /// Whether the client is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PredictError::Validation(ValidationError::MissingUpload)
                | PredictError::Validation(ValidationError::NotAnImage(_))
        )
    }

    pub fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }

    /// Fixed text safe to show to clients.
    pub fn public_message(&self) -> &'static str {
        match self {
            PredictError::Validation(ValidationError::MissingUpload) => NO_IMAGE_MESSAGE,
            PredictError::Validation(ValidationError::NotAnImage(_)) => INVALID_IMAGE_MESSAGE,
            _ => PREDICTION_FAILED_MESSAGE,
        }
    }
}

/// Runs the prediction pipeline against an injected model and record store.
pub struct Predictor {
    model: Arc<dyn Model>,
    store: Arc<dyn RecordStore>,
    failure_policy: InferenceFailurePolicy,
    deadline: Duration,
}

impl Predictor {
    pub fn new(model: Arc<dyn Model>, store: Arc<dyn RecordStore>) -> Self {
        Predictor {
            model,
            store,
            failure_policy: InferenceFailurePolicy::default(),
            deadline: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_failure_policy(mut self, policy: InferenceFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Classify one upload and store the result.
    pub async fn predict(&self, upload: Option<Upload>) -> Result<PredictionRecord, PredictError> {
        match tokio::time::timeout(self.deadline, self.process(upload)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Prediction exceeded deadline of {:?}", self.deadline);
                Err(PredictError::DeadlineExceeded(self.deadline))
            }
        }
    }

    async fn process(&self, upload: Option<Upload>) -> Result<PredictionRecord, PredictError> {
        let model = Arc::clone(&self.model);

        // Decoding and inference are CPU bound.
        let outcome = task::spawn_blocking(
            move || -> Result<Result<Classification, InferenceError>, ValidationError> {
                let pixels = preprocess::normalize(upload)?;
                Ok(inference::classify(model.as_ref(), &pixels))
            },
        )
        .await??;

        let label = match outcome {
            Ok(classification) => {
                info!(
                    "Classified upload as {} (score {:.4})",
                    classification.result, classification.score
                );
                classification.result
            }
            Err(err) => match self.failure_policy {
                InferenceFailurePolicy::Reject => return Err(err.into()),
                InferenceFailurePolicy::RecordSentinel => {
                    error!("Error during prediction: {}", err);
                    Label::PredictionError
                }
            },
        };

        let record = PredictionRecord::new(label);

        let mut t = Timer::new_start("Persisting prediction");
        self.store.put(&record).await.map_err(PredictError::Storage)?;
        t.stop();

        Ok(record)
    }

    /// Every stored prediction.
    pub async fn histories(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut t = Timer::new_start("Listing histories");
        let entries = self.store.list_all().await?;
        t.stop();
        Ok(entries)
    }
}
