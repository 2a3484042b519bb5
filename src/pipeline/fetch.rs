//! Artifact fetcher: object bytes → local staging file.
//!
//! pdfium needs a file-system path, so the object is written into a fresh
//! `TempDir` owned by [`StagedArtifact`]. Dropping the artifact removes the
//! directory, on success and on every error path alike.

use crate::envelope::IngestionEvent;
use crate::error::{FetchFailure, IngestError};
use crate::store::BlobStore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// A source object staged on local disk for the duration of one event.
#[derive(Debug)]
pub struct StagedArtifact {
    pub source_key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex SHA-256 of the object bytes.
    pub content_sha256: String,
    _dir: TempDir,
}

impl StagedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the artifact lives in; gone once `self` is dropped.
    pub fn staging_dir(&self) -> &Path {
        self._dir.path()
    }
}

/// Fetch `event`'s object and stage it under `staging_root` (system temp dir
/// when `None`).
pub async fn fetch_artifact(
    blobs: &dyn BlobStore,
    event: &IngestionEvent,
    staging_root: Option<&Path>,
) -> Result<StagedArtifact, IngestError> {
    let fetch_err = |source: FetchFailure| IngestError::Fetch {
        bucket: event.bucket.clone(),
        key: event.object_key.clone(),
        source,
    };

    let bytes = blobs
        .get(&event.bucket, &event.object_key)
        .await
        .map_err(|e| fetch_err(e.into()))?;

    let dir = match staging_root {
        Some(root) => {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(|e| fetch_err(e.into()))?;
            tempfile::Builder::new().prefix("ingest-").tempdir_in(root)
        }
        None => tempfile::Builder::new().prefix("ingest-").tempdir(),
    }
    .map_err(|e| fetch_err(e.into()))?;

    let path = dir.path().join(staged_file_name(&event.object_key));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| fetch_err(e.into()))?;

    let content_sha256 = format!("{:x}", Sha256::digest(&bytes));
    debug!(
        key = %event.object_key,
        path = %path.display(),
        size = bytes.len(),
        sha256 = %content_sha256,
        "Staged artifact"
    );

    Ok(StagedArtifact {
        source_key: event.object_key.clone(),
        path,
        size_bytes: bytes.len() as u64,
        content_sha256,
        _dir: dir,
    })
}

/// Base name of the key, or a fixed name when it has none usable.
fn staged_file_name(key: &str) -> &str {
    match key.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name,
        _ => "artifact",
    }
}
