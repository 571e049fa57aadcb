//! Document store credentials: where the service account key comes from and
//! how it is turned into bearer tokens.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const SECRET_MANAGER_URL: &str = "https://secretmanager.googleapis.com/v1";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("could not read credentials file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("credentials are not a valid service account key: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("secret payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} answered {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("could not sign token assertion: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
    #[error("invalid secret name {0:?}, expected projects/<project>/secrets/<secret>[/versions/<version>]")]
    SecretName(String),
}

/// Where the service account key is loaded from at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// A key file on local disk.
    File(PathBuf),
    /// Key JSON shipped with the deployment (environment or config).
    Inline(String),
    /// A Secret Manager secret version whose payload is the key JSON.
    SecretManager(String),
}

/// The subset of a service account key file needed to mint tokens.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, CredentialError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl CredentialSource {
    /// Load the key. Must succeed before the store is usable.
    pub async fn resolve(&self, http: &reqwest::Client) -> Result<ServiceAccountKey, CredentialError> {
        match self {
            CredentialSource::File(path) => {
                info!("Loading credentials from {}", path.display());
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| CredentialError::Read {
                        path: path.clone(),
                        source,
                    })?;
                ServiceAccountKey::from_json(&raw)
            }
            CredentialSource::Inline(raw) => {
                info!("Loading bundled credentials");
                ServiceAccountKey::from_json(raw)
            }
            CredentialSource::SecretManager(name) => {
                let name = secret_version_name(name)?;
                info!("Fetching credentials from secret {}", name);
                let token = metadata_token(http).await?;
                let payload = access_secret(http, &name, &token.access_token).await?;
                ServiceAccountKey::from_json(&payload)
            }
        }
    }
}

/// Accepts `projects/p/secrets/s` or `projects/p/secrets/s/versions/v` and
/// returns the fully qualified version name.
pub fn secret_version_name(name: &str) -> Result<String, CredentialError> {
    let parts: Vec<&str> = name.trim_matches('/').split('/').collect();
    let well_formed = |p: &[&str]| p.iter().all(|segment| !segment.is_empty());

    match parts.as_slice() {
        ["projects", _, "secrets", _] if well_formed(&parts) => {
            Ok(format!("{}/versions/latest", parts.join("/")))
        }
        ["projects", _, "secrets", _, "versions", _] if well_formed(&parts) => Ok(parts.join("/")),
        _ => Err(CredentialError::SecretName(name.to_string())),
    }
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

#[derive(Deserialize)]
struct AccessSecretResponse {
    payload: SecretPayload,
}

async fn access_secret(
    http: &reqwest::Client,
    version_name: &str,
    bearer: &str,
) -> Result<String, CredentialError> {
    let endpoint = format!("{}/{}:access", SECRET_MANAGER_URL, version_name);
    let response: AccessSecretResponse = get_json(http.get(&endpoint).bearer_auth(bearer), &endpoint).await?;

    let bytes = base64::engine::general_purpose::STANDARD.decode(response.payload.data)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

fn metadata_host() -> String {
    std::env::var("GCE_METADATA_HOST").unwrap_or_else(|_| DEFAULT_METADATA_HOST.to_string())
}

/// Token for the workload's attached service account.
async fn metadata_token(http: &reqwest::Client) -> Result<TokenResponse, CredentialError> {
    let endpoint = format!(
        "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
        metadata_host()
    );
    get_json(http.get(&endpoint).header("Metadata-Flavor", "Google"), &endpoint).await
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

async fn service_account_token(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
) -> Result<TokenResponse, CredentialError> {
    let iat = chrono::Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: DATASTORE_SCOPE,
        aud: &key.token_uri,
        iat,
        exp: iat + 3600,
    };
    let assertion = jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &claims,
        &EncodingKey::from_rsa_pem(key.private_key.as_bytes())?,
    )?;

    let request = http
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())]);
    get_json(request, &key.token_uri).await
}

async fn get_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
    endpoint: &str,
) -> Result<T, CredentialError> {
    let http_err = |source| CredentialError::Http {
        endpoint: endpoint.to_string(),
        source,
    };

    let response = request.send().await.map_err(http_err)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CredentialError::Rejected {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    response.json().await.map_err(http_err)
}

/// How bearer tokens for the document store are obtained.
#[derive(Debug, Clone)]
pub enum TokenProvider {
    /// Sign a JWT with the key and exchange it at the key's token endpoint.
    ServiceAccount(ServiceAccountKey),
    /// Ask the metadata server for the attached service account's token.
    Metadata,
    /// No authentication, e.g. against the Firestore emulator.
    Anonymous,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

/// Caches the current bearer token and refreshes it shortly before expiry.
pub struct AccessTokens {
    provider: TokenProvider,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokens {
    pub fn new(provider: TokenProvider, http: reqwest::Client) -> Self {
        AccessTokens {
            provider,
            http,
            cached: Mutex::new(None),
        }
    }

    /// Current token, or `None` when the provider is anonymous.
    pub async fn bearer(&self) -> Result<Option<String>, CredentialError> {
        if let TokenProvider::Anonymous = self.provider {
            return Ok(None);
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(Some(token.value.clone()));
        }

        let response = match &self.provider {
            TokenProvider::ServiceAccount(key) => service_account_token(&self.http, key).await?,
            TokenProvider::Metadata => metadata_token(&self.http).await?,
            TokenProvider::Anonymous => return Ok(None),
        };
        debug!("Refreshed access token, valid for {}s", response.expires_in);

        let value = response.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(Some(value))
    }
}
