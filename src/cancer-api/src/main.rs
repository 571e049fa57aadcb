use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cancer_serve::config::{StoreBackend, StoreSettings};
use cancer_serve::{model, InferenceFailurePolicy, Predictor, ServiceConfig, StoreConfig};
use log::{error, info};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "cancer-api",
    about = "HTTP service classifying uploaded images and keeping a prediction history"
)]
struct CmdArgs {
    #[structopt(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[structopt(long, env = "PORT", default_value = "8080")]
    port: u16,

    #[structopt(
        long,
        env = "MODEL_DIR",
        default_value = "models",
        parse(from_os_str),
        help = "Export directory of the TensorFlow SavedModel"
    )]
    model_dir: PathBuf,

    #[structopt(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    #[structopt(
        long,
        help = "Store failed inferences as 'Error during prediction' instead of failing the request"
    )]
    record_inference_failures: bool,

    #[structopt(long, env = "STORE", default_value = "firestore", help = "firestore or memory")]
    store: StoreBackend,

    #[structopt(long, env = "GOOGLE_CLOUD_PROJECT")]
    project_id: Option<String>,

    #[structopt(long, env = "FIRESTORE_EMULATOR_HOST")]
    emulator_host: Option<String>,

    #[structopt(
        long,
        env = "GOOGLE_APPLICATION_CREDENTIALS",
        parse(from_os_str),
        help = "Service account key file"
    )]
    credentials_file: Option<PathBuf>,

    #[structopt(
        long,
        env = "GOOGLE_CREDENTIALS_JSON",
        hide_env_values = true,
        help = "Service account key JSON"
    )]
    credentials_json: Option<String>,

    #[structopt(
        long,
        env = "CREDENTIALS_SECRET",
        help = "Secret Manager secret holding the service account key"
    )]
    credentials_secret: Option<String>,
}

impl CmdArgs {
    fn into_config(self) -> Result<ServiceConfig, Box<dyn Error>> {
        let store = StoreConfig::from_settings(StoreSettings {
            backend: self.store,
            project_id: self.project_id,
            emulator_host: self.emulator_host,
            credentials_file: self.credentials_file,
            credentials_json: self.credentials_json,
            credentials_secret: self.credentials_secret,
        })?;

        let inference_failure = if self.record_inference_failures {
            InferenceFailurePolicy::RecordSentinel
        } else {
            InferenceFailurePolicy::Reject
        };

        let config = ServiceConfig {
            host: self.host,
            port: self.port,
            model_dir: self.model_dir,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            inference_failure,
            store,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CmdArgs::from_args().into_config()?;

    // The server never starts without a model.
    let model = model::load(&config.model_dir).map_err(|e| {
        error!("Error loading model from {}: {}", config.model_dir.display(), e);
        e
    })?;
    info!("Model loaded successfully");

    let store = config.store.connect(reqwest::Client::new()).await?;

    let predictor = Predictor::new(model, store)
        .with_deadline(config.request_timeout)
        .with_failure_policy(config.inference_failure);

    cancer_api::serve(
        config.bind_addr()?,
        Arc::new(predictor),
        cancer_api::shutdown_signal(),
    )
    .await?;

    Ok(())
}
