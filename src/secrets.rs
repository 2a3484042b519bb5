//! Secret resolution.
//!
//! The only secret the pipeline needs is the database connection string. It
//! is resolved through a [`SecretStore`] so the persister does not care
//! whether it comes from Google Secret Manager ([`GcpSecretManager`]) or from
//! the process environment ([`EnvSecrets`], for local runs).
//!
//! ## Project id
//!
//! Secret Manager addresses secrets per project. The id comes from
//! configuration (`GCP_PROJECT`, then `GOOGLE_CLOUD_PROJECT`) and, failing
//! that, from the metadata server of the machine we run on. Environment wins.

use crate::error::SecretError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Default metadata server host; `GCE_METADATA_HOST` overrides it.
pub const METADATA_HOST: &str = "metadata.google.internal";

const SECRET_MANAGER_API: &str = "https://secretmanager.googleapis.com/v1";
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolve a named secret to its current value.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<String, SecretError>;
}

// ── Environment ──────────────────────────────────────────────────────────

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Secrets from environment variables: `supabase-url` → `SUPABASE_URL`.
pub struct EnvSecrets {
    lookup: Lookup,
}

impl EnvSecrets {
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    /// Environment variable a secret name maps to.
    pub fn variable_for(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl Default for EnvSecrets {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for EnvSecrets {
    async fn resolve(&self, name: &str) -> Result<String, SecretError> {
        let var = Self::variable_for(name);
        match (self.lookup)(&var) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(SecretError::NotFound {
                name: format!("{name} (env {var})"),
            }),
        }
    }
}

// ── Google Secret Manager ────────────────────────────────────────────────

/// Secrets from Google Secret Manager's REST API, latest version.
///
/// Authenticates with the default service account token from the metadata
/// server, which is what the hosting platform provides.
pub struct GcpSecretManager {
    client: reqwest::Client,
    configured_project: Option<String>,
    project_id: OnceCell<String>,
    metadata_host: String,
    api_base: String,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
struct AccessResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

impl GcpSecretManager {
    /// `project_id` is the configured id, if any; the metadata server is
    /// consulted lazily otherwise.
    pub fn new(project_id: Option<String>) -> Self {
        let metadata_host =
            std::env::var("GCE_METADATA_HOST").unwrap_or_else(|_| METADATA_HOST.to_string());
        Self::with_endpoints(project_id, metadata_host, SECRET_MANAGER_API)
    }

    /// Point the client at explicit endpoints (emulators, tests).
    pub fn with_endpoints(
        project_id: Option<String>,
        metadata_host: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            configured_project: project_id,
            project_id: OnceCell::new(),
            metadata_host: metadata_host.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// The project secrets are read from, resolved once.
    pub async fn project_id(&self) -> Result<&str, SecretError> {
        self.project_id
            .get_or_try_init(|| {
                resolve_project_id(
                    self.configured_project.as_deref(),
                    &self.client,
                    &self.metadata_host,
                )
            })
            .await
            .map(String::as_str)
    }

    async fn access_token(&self, name: &str) -> Result<String, SecretError> {
        let url = format!(
            "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
            self.metadata_host
        );
        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| SecretError::Request {
                name: name.to_string(),
                detail: format!("metadata token request failed: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(SecretError::Request {
                name: name.to_string(),
                detail: format!("metadata token request returned HTTP {}", response.status()),
            });
        }
        let token: AccessToken = response.json().await.map_err(|e| SecretError::Request {
            name: name.to_string(),
            detail: format!("metadata token response: {e}"),
        })?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl SecretStore for GcpSecretManager {
    async fn resolve(&self, name: &str) -> Result<String, SecretError> {
        let project = self.project_id().await?;
        let token = self.access_token(name).await?;
        let url = format!(
            "{}/projects/{}/secrets/{}/versions/latest:access",
            self.api_base, project, name
        );
        debug!(secret = name, project, "Accessing secret version");

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SecretError::Request {
                name: name.to_string(),
                detail: e.to_string(),
            })?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(SecretError::NotFound {
                    name: name.to_string(),
                })
            }
            s => {
                return Err(SecretError::Request {
                    name: name.to_string(),
                    detail: format!("HTTP {s}"),
                })
            }
        }

        let body: AccessResponse = response.json().await.map_err(|e| SecretError::Payload {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
        decode_payload(name, &body.payload.data)
    }
}

/// Secret Manager returns the payload base64-encoded.
fn decode_payload(name: &str, data: &str) -> Result<String, SecretError> {
    let bytes = STANDARD.decode(data).map_err(|e| SecretError::Payload {
        name: name.to_string(),
        detail: format!("not base64: {e}"),
    })?;
    String::from_utf8(bytes).map_err(|e| SecretError::Payload {
        name: name.to_string(),
        detail: format!("not UTF-8: {e}"),
    })
}

/// Configured project id, else the metadata server's answer.
pub async fn resolve_project_id(
    configured: Option<&str>,
    client: &reqwest::Client,
    metadata_host: &str,
) -> Result<String, SecretError> {
    if let Some(p) = configured.filter(|p| !p.is_empty()) {
        return Ok(p.to_string());
    }

    let url = format!("http://{metadata_host}/computeMetadata/v1/project/project-id");
    let response = client
        .get(&url)
        .header("Metadata-Flavor", "Google")
        .timeout(METADATA_TIMEOUT)
        .send()
        .await
        .map_err(|_| SecretError::ProjectIdUnavailable)?;
    if !response.status().is_success() {
        return Err(SecretError::ProjectIdUnavailable);
    }
    let project = response
        .text()
        .await
        .map_err(|_| SecretError::ProjectIdUnavailable)?;
    let project = project.trim();
    if project.is_empty() {
        return Err(SecretError::ProjectIdUnavailable);
    }
    info!(project, "Resolved project id from metadata server");
    Ok(project.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    /// Metadata server and Secret Manager on one local port.
    async fn fake_google() -> String {
        async fn project_id(headers: HeaderMap) -> (StatusCode, String) {
            if headers.get("Metadata-Flavor").is_none() {
                return (StatusCode::FORBIDDEN, String::new());
            }
            (StatusCode::OK, "meta-project".to_string())
        }

        async fn token() -> Json<serde_json::Value> {
            Json(json!({"access_token": "t0k3n", "expires_in": 3599, "token_type": "Bearer"}))
        }

        async fn access(
            Path((project, secret)): Path<(String, String)>,
            headers: HeaderMap,
        ) -> (StatusCode, Json<serde_json::Value>) {
            let authorised = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some("Bearer t0k3n");
            if !authorised {
                return (StatusCode::UNAUTHORIZED, Json(json!({})));
            }
            if secret != "supabase-url" {
                return (StatusCode::NOT_FOUND, Json(json!({})));
            }
            let value = format!("postgres://{project}@db/cv");
            (
                StatusCode::OK,
                Json(json!({"payload": {"data": STANDARD.encode(value)}})),
            )
        }

        let app = Router::new()
            .route("/computeMetadata/v1/project/project-id", get(project_id))
            .route(
                "/computeMetadata/v1/instance/service-accounts/default/token",
                get(token),
            )
            .route(
                "/v1/projects/{project}/secrets/{secret}/versions/latest:access",
                get(access),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    #[test]
    fn env_variable_mapping() {
        assert_eq!(EnvSecrets::variable_for("supabase-url"), "SUPABASE_URL");
        assert_eq!(EnvSecrets::variable_for("db.main/url"), "DB_MAIN_URL");
    }

    #[tokio::test]
    async fn env_secrets_resolve_and_miss() {
        let secrets = EnvSecrets::with_lookup(|k| {
            (k == "SUPABASE_URL").then(|| "postgres://local/cv".to_string())
        });
        assert_eq!(
            secrets.resolve("supabase-url").await.unwrap(),
            "postgres://local/cv"
        );
        let err = secrets.resolve("other").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound { .. }));
    }

    #[test]
    fn payload_decoding() {
        let encoded = STANDARD.encode("postgres://u:p@h/db");
        assert_eq!(decode_payload("s", &encoded).unwrap(), "postgres://u:p@h/db");
        assert!(matches!(
            decode_payload("s", "***"),
            Err(SecretError::Payload { .. })
        ));
    }

    #[tokio::test]
    async fn configured_project_wins_without_network() {
        let client = reqwest::Client::new();
        let p = resolve_project_id(Some("env-project"), &client, "127.0.0.1:9")
            .await
            .unwrap();
        assert_eq!(p, "env-project");
    }

    #[tokio::test]
    async fn project_id_falls_back_to_metadata_server() {
        let host = fake_google().await;
        let client = reqwest::Client::new();
        let p = resolve_project_id(None, &client, &host).await.unwrap();
        assert_eq!(p, "meta-project");
    }

    #[tokio::test]
    async fn unreachable_metadata_server_is_reported() {
        let client = reqwest::Client::new();
        let err = resolve_project_id(None, &client, "127.0.0.1:9").await.unwrap_err();
        assert!(matches!(err, SecretError::ProjectIdUnavailable));
    }

    #[tokio::test]
    async fn secret_manager_reads_latest_version() {
        let host = fake_google().await;
        let secrets = GcpSecretManager::with_endpoints(None, &host, format!("http://{host}/v1"));

        let url = secrets.resolve("supabase-url").await.unwrap();
        assert_eq!(url, "postgres://meta-project@db/cv");
        assert_eq!(secrets.project_id().await.unwrap(), "meta-project");
    }

    #[tokio::test]
    async fn secret_manager_reports_missing_secret() {
        let host = fake_google().await;
        let secrets = GcpSecretManager::with_endpoints(
            Some("env-project".into()),
            &host,
            format!("http://{host}/v1"),
        );
        let err = secrets.resolve("no-such-secret").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound { .. }), "got {err:?}");
    }
}
