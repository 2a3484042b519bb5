//! Service configuration.
//!
//! Everything the pipeline needs to know lives in one [`ServiceConfig`],
//! built through [`ServiceConfigBuilder`] (validated in `build()`) or read
//! from the environment with [`ServiceConfig::from_env`]. The binary adds only
//! the listen port on top.
//!
//! Environment reading goes through [`ServiceConfig::from_lookup`], which takes
//! a plain lookup function so tests never have to mutate process env vars.

use crate::error::IngestError;
use crate::pipeline::relocate::Namespaces;
use std::path::PathBuf;
use std::time::Duration;

/// Default secret holding the PostgreSQL connection string.
pub const DEFAULT_DB_SECRET: &str = "supabase-url";

/// Configuration for the ingestion service.
///
/// # Example
/// ```rust
/// use pdf_ingest::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .raw_prefix("incoming/")
///     .records_table("documents")
///     .build()
///     .unwrap();
/// assert_eq!(config.processed_prefix, "processed/");
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Project identifier used to address the secret store. When `None` it is
    /// looked up from the metadata server on first use.
    pub project_id: Option<String>,

    /// Namespace new uploads arrive under. Default: `raw/`.
    pub raw_prefix: String,

    /// Namespace processed sources are moved to. Default: `processed/`.
    ///
    /// Events for keys already under this prefix are acknowledged without
    /// processing: the relocation copy fires its own object notification.
    pub processed_prefix: String,

    /// Directory staged artifacts are created under. Default: system temp dir.
    pub staging_dir: Option<PathBuf>,

    /// Which object-store backend to talk to. Default: [`StorageBackend::Gcs`].
    pub storage: StorageBackend,

    /// Where the database URL comes from. Default: [`SecretBackend::Gcp`].
    pub secrets: SecretBackend,

    /// Explicit database URL; bypasses the secret store entirely.
    pub database_url: Option<String>,

    /// Name of the secret holding the database URL. Default: `supabase-url`.
    pub db_secret_name: String,

    /// Destination table. Must be a plain SQL identifier. Default: `cv_data`.
    pub records_table: String,

    /// Connection pool size. Default: 5.
    pub db_max_connections: u32,

    /// Bucket holding the packaged conversion engine archive.
    pub model_bucket: Option<String>,

    /// Object key of the packaged conversion engine archive (`.tgz`).
    pub model_path: Option<String>,

    /// Local directory the engine library is cached in. Default: platform
    /// cache dir (see [`pdfium_cache::default_cache_root`]).
    pub model_cache_dir: PathBuf,

    /// Answer rejected (non-retryable) events with 200 instead of 400.
    /// Default: false.
    ///
    /// Some push delivery systems redeliver on any non-2xx response, which
    /// would loop forever on a malformed event.
    pub ack_rejected_events: bool,

    /// Whole-request deadline. Default: none.
    pub request_timeout: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            raw_prefix: "raw/".to_string(),
            processed_prefix: "processed/".to_string(),
            staging_dir: None,
            storage: StorageBackend::default(),
            secrets: SecretBackend::default(),
            database_url: None,
            db_secret_name: DEFAULT_DB_SECRET.to_string(),
            records_table: "cv_data".to_string(),
            db_max_connections: 5,
            model_bucket: None,
            model_path: None,
            model_cache_dir: pdfium_cache::default_cache_root(),
            ack_rejected_events: false,
            request_timeout: None,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, IngestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(project) = get("GCP_PROJECT").or_else(|| get("GOOGLE_CLOUD_PROJECT")) {
            builder = builder.project_id(project);
        }
        if let Some(v) = get("RAW_PREFIX") {
            builder = builder.raw_prefix(v);
        }
        if let Some(v) = get("PROCESSED_PREFIX") {
            builder = builder.processed_prefix(v);
        }
        if let Some(v) = get("STAGING_DIR") {
            builder = builder.staging_dir(v);
        }
        if let Some(v) = get("STORAGE_BACKEND") {
            builder = builder.storage(v.parse()?);
        }
        if let Some(v) = get("SECRET_BACKEND") {
            builder = builder.secrets(v.parse()?);
        }
        if let Some(v) = get("DATABASE_URL") {
            builder = builder.database_url(v);
        }
        if let Some(v) = get("DB_SECRET_NAME") {
            builder = builder.db_secret_name(v);
        }
        if let Some(v) = get("RECORDS_TABLE") {
            builder = builder.records_table(v);
        }
        if let Some(v) = get("DB_MAX_CONNECTIONS") {
            builder = builder.db_max_connections(parse_number("DB_MAX_CONNECTIONS", &v)?);
        }
        if let Some(v) = get("MODEL_BUCKET") {
            builder = builder.model_bucket(v);
        }
        if let Some(v) = get("MODEL_PATH") {
            builder = builder.model_path(v);
        }
        if let Some(v) = get("MODEL_CACHE_DIR") {
            builder = builder.model_cache_dir(v);
        }
        if let Some(v) = get("ACK_REJECTED_EVENTS") {
            builder = builder.ack_rejected_events(parse_flag("ACK_REJECTED_EVENTS", &v)?);
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_number("REQUEST_TIMEOUT_SECS", &v)?;
            builder = builder.request_timeout_secs(secs);
        }

        builder.build()
    }

    /// The raw and processed prefixes, as the relocator takes them.
    pub fn namespaces(&self) -> Namespaces {
        Namespaces::new(&self.raw_prefix, &self.processed_prefix)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.config.project_id = Some(id.into());
        self
    }

    pub fn raw_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.raw_prefix = normalise_prefix(prefix.into());
        self
    }

    pub fn processed_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.processed_prefix = normalise_prefix(prefix.into());
        self
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = Some(dir.into());
        self
    }

    pub fn storage(mut self, backend: StorageBackend) -> Self {
        self.config.storage = backend;
        self
    }

    pub fn secrets(mut self, backend: SecretBackend) -> Self {
        self.config.secrets = backend;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn db_secret_name(mut self, name: impl Into<String>) -> Self {
        self.config.db_secret_name = name.into();
        self
    }

    pub fn records_table(mut self, table: impl Into<String>) -> Self {
        self.config.records_table = table.into();
        self
    }

    pub fn db_max_connections(mut self, n: u32) -> Self {
        self.config.db_max_connections = n.max(1);
        self
    }

    pub fn model_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.model_bucket = Some(bucket.into());
        self
    }

    pub fn model_path(mut self, path: impl Into<String>) -> Self {
        self.config.model_path = Some(path.into());
        self
    }

    pub fn model_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_cache_dir = dir.into();
        self
    }

    pub fn ack_rejected_events(mut self, v: bool) -> Self {
        self.config.ack_rejected_events = v;
        self
    }

    /// `0` disables the deadline.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, IngestError> {
        let c = &self.config;
        if c.processed_prefix.is_empty() {
            return Err(IngestError::InvalidConfig(
                "processed prefix must not be empty".into(),
            ));
        }
        if c.raw_prefix == c.processed_prefix {
            return Err(IngestError::InvalidConfig(format!(
                "raw and processed prefixes must differ, both are '{}'",
                c.raw_prefix
            )));
        }
        if !is_sql_identifier(&c.records_table) {
            return Err(IngestError::InvalidConfig(format!(
                "records table '{}' is not a plain SQL identifier",
                c.records_table
            )));
        }
        if c.db_secret_name.trim().is_empty() && c.database_url.is_none() {
            return Err(IngestError::InvalidConfig(
                "either DATABASE_URL or a database secret name is required".into(),
            ));
        }
        if c.model_bucket.is_some() != c.model_path.is_some() {
            return Err(IngestError::InvalidConfig(
                "MODEL_BUCKET and MODEL_PATH must be set together".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Object-store backend selection (`STORAGE_BACKEND`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageBackend {
    /// Google Cloud Storage, credentials from the environment. (default)
    #[default]
    Gcs,
    /// Local directory; each bucket is a sub-directory. `local:/srv/buckets`.
    Local(PathBuf),
    /// Process-local in-memory store, for tests and dry runs.
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "gcs" | "gcp" => return Ok(StorageBackend::Gcs),
            "memory" => return Ok(StorageBackend::Memory),
            _ => {}
        }
        match s.split_once(':') {
            Some((scheme, root)) if scheme.eq_ignore_ascii_case("local") && !root.is_empty() => {
                Ok(StorageBackend::Local(PathBuf::from(root)))
            }
            _ => Err(IngestError::InvalidConfig(format!(
                "unknown storage backend '{s}' (expected gcs, memory or local:<dir>)"
            ))),
        }
    }
}

/// Secret-store backend selection (`SECRET_BACKEND`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecretBackend {
    /// Google Secret Manager. (default)
    #[default]
    Gcp,
    /// Environment variables: secret `supabase-url` is read from `SUPABASE_URL`.
    Env,
}

impl std::str::FromStr for SecretBackend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gcp" | "secret-manager" => Ok(SecretBackend::Gcp),
            "env" => Ok(SecretBackend::Env),
            other => Err(IngestError::InvalidConfig(format!(
                "unknown secret backend '{other}' (expected gcp or env)"
            ))),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Prefixes are path namespaces: `raw` and `raw/` mean the same thing.
fn normalise_prefix(prefix: String) -> String {
    let trimmed = prefix.trim().trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn parse_flag(key: &str, value: &str) -> Result<bool, IngestError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(IngestError::InvalidConfig(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, IngestError> {
    value
        .trim()
        .parse()
        .map_err(|_| IngestError::InvalidConfig(format!("{key} must be a number, got '{value}'")))
}
