//! Service binary for pdf-ingest.
//!
//! A thin shim over the library crate: read the environment, load the
//! conversion engine once, wire the stores and serve the push endpoint until
//! SIGINT/SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use pdf_ingest::server::shutdown_signal;
use pdf_ingest::{
    load_engine, router, AppState, DatabaseUrl, EnvSecrets, GcpSecretManager, MemoryRecordStore,
    ObjectStoreBlobs, PgRecordStore, Pipeline, RecordStore, SecretBackend, SecretStore,
    ServiceConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"CONFIGURATION:
  Everything except the port is read from the environment (and from a
  .env file in the working directory, if present):

  GCP_PROJECT / GOOGLE_CLOUD_PROJECT   project for Secret Manager
  STORAGE_BACKEND      gcs | memory | local:<dir>        (default gcs)
  SECRET_BACKEND       gcp | env                          (default gcp)
  DATABASE_URL         bypasses the secret store; "memory" keeps records in RAM
  DB_SECRET_NAME       secret holding the database URL    (default supabase-url)
  RECORDS_TABLE        destination table                  (default cv_data)
  RAW_PREFIX / PROCESSED_PREFIX                           (default raw/ processed/)
  MODEL_BUCKET / MODEL_PATH   packaged pdfium archive (.tgz) in the object store
  MODEL_CACHE_DIR      where the engine library is unpacked
  ACK_REJECTED_EVENTS  answer 200 to events that can never succeed
  REQUEST_TIMEOUT_SECS whole-request deadline (0 or unset: none)

  Log verbosity follows RUST_LOG (default: info).
"#;

/// Serve the document-ingestion push endpoint.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-ingest",
    version,
    about = "Push-triggered document ingestion: object store → pdfium → PostgreSQL",
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is the normal case in production.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    info!(
        raw = %config.raw_prefix,
        processed = %config.processed_prefix,
        table = %config.records_table,
        "Configuration loaded"
    );

    let blobs = Arc::new(ObjectStoreBlobs::new(config.storage.clone()));

    // ── Load the conversion engine once ──────────────────────────────────
    let engine = load_engine(&config, blobs.as_ref())
        .await
        .context("Failed to load the conversion engine")?;

    // ── Record store ─────────────────────────────────────────────────────
    let records: Arc<dyn RecordStore> = match config.database_url.as_deref() {
        Some("memory") => {
            info!("Records are kept in memory and lost on exit");
            Arc::new(MemoryRecordStore::new())
        }
        Some(url) => Arc::new(PgRecordStore::new(
            DatabaseUrl::Explicit(url.to_string()),
            &config.records_table,
            config.db_max_connections,
        )),
        None => {
            let store: Arc<dyn SecretStore> = match config.secrets {
                SecretBackend::Gcp => Arc::new(GcpSecretManager::new(config.project_id.clone())),
                SecretBackend::Env => Arc::new(EnvSecrets::new()),
            };
            Arc::new(PgRecordStore::new(
                DatabaseUrl::Secret {
                    store,
                    name: config.db_secret_name.clone(),
                },
                &config.records_table,
                config.db_max_connections,
            ))
        }
    };

    let state = AppState {
        pipeline: Pipeline::new(blobs, Arc::new(engine), records, &config),
        ack_rejected_events: config.ack_rejected_events,
    };
    let app = router(Arc::new(state), config.request_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Stopped");
    Ok(())
}
