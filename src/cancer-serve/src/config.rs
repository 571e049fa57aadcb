use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::credentials::{AccessTokens, CredentialError, CredentialSource, TokenProvider};
use crate::store::{FirestoreStore, MemoryStore, RecordStore};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Project id used against the emulator when none is configured.
const EMULATOR_PROJECT: &str = "demo-predictions";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
    #[error("credentials given more than once ({0}); pick one source")]
    ConflictingCredentials(String),
    #[error("no project id: set one or provide service account credentials")]
    MissingProject,
}

/// What to do when the model itself fails on a decodable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceFailurePolicy {
    /// Fail the request; nothing is stored. Earlier versions of the service
    /// stored the sentinel instead.
    #[default]
    Reject,
    /// Store and return the `Error during prediction` sentinel label.
    RecordSentinel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Firestore,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "firestore" => Ok(StoreBackend::Firestore),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::InvalidValue {
                field: "store",
                message: format!("unknown backend {:?}, expected firestore or memory", other),
            }),
        }
    }
}

/// Raw store options as collected from flags and environment.
#[derive(Debug, Clone, Default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub project_id: Option<String>,
    pub emulator_host: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub credentials_json: Option<String>,
    pub credentials_secret: Option<String>,
}

/// The record store to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Emulator {
        host: String,
        project_id: String,
    },
    /// Firestore with a service account key; the project defaults to the key's.
    Firestore {
        project_id: Option<String>,
        credentials: CredentialSource,
    },
    /// Firestore with the workload identity from the metadata server.
    FirestoreMetadata { project_id: String },
}

impl StoreConfig {
    pub fn from_settings(settings: StoreSettings) -> Result<Self, ConfigError> {
        if settings.backend == StoreBackend::Memory {
            return Ok(StoreConfig::Memory);
        }

        if let Some(host) = settings.emulator_host.filter(|h| !h.is_empty()) {
            return Ok(StoreConfig::Emulator {
                host,
                project_id: settings
                    .project_id
                    .unwrap_or_else(|| EMULATOR_PROJECT.to_string()),
            });
        }

        let mut sources = Vec::new();
        if let Some(path) = settings.credentials_file {
            sources.push(("file", CredentialSource::File(path)));
        }
        if let Some(json) = settings.credentials_json {
            sources.push(("json", CredentialSource::Inline(json)));
        }
        if let Some(secret) = settings.credentials_secret {
            sources.push(("secret", CredentialSource::SecretManager(secret)));
        }

        match (sources.len(), settings.project_id) {
            (0, Some(project_id)) => Ok(StoreConfig::FirestoreMetadata { project_id }),
            (0, None) => Err(ConfigError::MissingProject),
            (1, project_id) => Ok(StoreConfig::Firestore {
                project_id,
                credentials: sources.remove(0).1,
            }),
            _ => Err(ConfigError::ConflictingCredentials(
                sources
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }

    /// Resolve credentials and build the store.
    pub async fn connect(&self, http: reqwest::Client) -> Result<Arc<dyn RecordStore>, CredentialError> {
        let store: Arc<dyn RecordStore> = match self {
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
            StoreConfig::Emulator { host, project_id } => {
                info!("Using Firestore emulator at {}", host);
                Arc::new(FirestoreStore::emulator(http, host, project_id))
            }
            StoreConfig::Firestore {
                project_id,
                credentials,
            } => {
                let key = credentials.resolve(&http).await?;
                let project_id = project_id.clone().unwrap_or_else(|| key.project_id.clone());
                let tokens = AccessTokens::new(TokenProvider::ServiceAccount(key), http.clone());
                Arc::new(FirestoreStore::new(http, &project_id, tokens))
            }
            StoreConfig::FirestoreMetadata { project_id } => {
                let tokens = AccessTokens::new(TokenProvider::Metadata, http.clone());
                Arc::new(FirestoreStore::new(http, project_id, tokens))
            }
        };
        info!("Record store: {}", store.backend());
        Ok(store)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// SavedModel export directory.
    pub model_dir: PathBuf,
    /// Total budget for decode, inference and persist of one prediction.
    pub request_timeout: Duration,
    pub inference_failure: InferenceFailurePolicy,
    pub store: StoreConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            model_dir: PathBuf::from("models"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            inference_failure: InferenceFailurePolicy::default(),
            store: StoreConfig::Memory,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout",
                message: "must be greater than 0".to_string(),
            });
        }
        self.bind_addr().map(|_| ())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|_| ConfigError::InvalidValue {
            field: "host",
            message: format!("{:?} is not an IP address", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_ignores_credentials() {
        let config = StoreConfig::from_settings(StoreSettings {
            backend: StoreBackend::Memory,
            credentials_json: Some("{}".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config, StoreConfig::Memory);
    }

    #[test]
    fn emulator_wins_over_credentials() {
        let config = StoreConfig::from_settings(StoreSettings {
            emulator_host: Some("localhost:8081".to_string()),
            credentials_file: Some(PathBuf::from("key.json")),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            config,
            StoreConfig::Emulator {
                host: "localhost:8081".to_string(),
                project_id: EMULATOR_PROJECT.to_string(),
            }
        );
    }

    #[test]
    fn one_credential_source_is_selected() {
        let config = StoreConfig::from_settings(StoreSettings {
            credentials_secret: Some("projects/p/secrets/key".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            config,
            StoreConfig::Firestore {
                project_id: None,
                credentials: CredentialSource::SecretManager("projects/p/secrets/key".to_string()),
            }
        );
    }

    #[test]
    fn two_credential_sources_conflict() {
        let err = StoreConfig::from_settings(StoreSettings {
            credentials_file: Some(PathBuf::from("key.json")),
            credentials_json: Some("{}".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "credentials given more than once (file, json); pick one source"
        );
    }

    #[test]
    fn project_alone_uses_metadata_identity() {
        let config = StoreConfig::from_settings(StoreSettings {
            project_id: Some("prod".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            config,
            StoreConfig::FirestoreMetadata {
                project_id: "prod".to_string()
            }
        );
    }

    #[test]
    fn nothing_configured_is_an_error() {
        assert!(matches!(
            StoreConfig::from_settings(StoreSettings::default()),
            Err(ConfigError::MissingProject)
        ));
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("Memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn default_config_binds_all_interfaces() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr().unwrap().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn inference_failures_are_rejected_unless_recording_is_chosen() {
        assert_eq!(InferenceFailurePolicy::default(), InferenceFailurePolicy::Reject);
        assert_eq!(
            ServiceConfig::default().inference_failure,
            InferenceFailurePolicy::Reject
        );
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let config = ServiceConfig {
            request_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn memory_config_connects_without_network() {
        let store = StoreConfig::Memory.connect(reqwest::Client::new()).await.unwrap();
        assert_eq!(store.backend(), "memory");
        assert!(store.list_all().await.unwrap().is_empty());
    }
}
