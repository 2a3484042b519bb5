//! Artifact relocator: copy-then-delete into the processed namespace.
//!
//! The object briefly exists under both keys. A crash between the two steps
//! leaves both; the redelivered event repeats the copy (an overwrite with
//! identical bytes) and the delete, and a delete of an already-missing source
//! counts as success.

use crate::error::{IngestError, RelocationStep};
use crate::store::BlobStore;
use tracing::{info, warn};

/// Where a relocated object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationOutcome {
    pub destination_key: String,
    /// `false` when another invocation had already completed the move.
    pub moved: bool,
}

/// The raw and processed namespace prefixes, both ending in `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    pub raw: String,
    pub processed: String,
}

impl Namespaces {
    pub fn new(raw: impl Into<String>, processed: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            processed: processed.into(),
        }
    }

    pub fn is_processed(&self, key: &str) -> bool {
        key.starts_with(&self.processed)
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new("raw/", "processed/")
    }
}

/// Destination for `source_key`.
///
/// A key under the raw prefix keeps its path below that prefix; any other key
/// is placed under the processed prefix by base name alone. `None` when
/// nothing is left to name the destination by.
pub fn destination_key(source_key: &str, ns: &Namespaces) -> Option<String> {
    let remainder = match source_key.strip_prefix(ns.raw.as_str()) {
        Some(rest) if !ns.raw.is_empty() => rest,
        _ => source_key.rsplit('/').next().unwrap_or_default(),
    };
    if remainder.is_empty() {
        return None;
    }
    Some(format!("{}{}", ns.processed, remainder))
}

/// Move `source_key` to its processed destination within `bucket`.
pub async fn relocate(
    blobs: &dyn BlobStore,
    bucket: &str,
    source_key: &str,
    ns: &Namespaces,
) -> Result<RelocationOutcome, IngestError> {
    let fail = |destination_key: &str, step: RelocationStep, reason: String| {
        IngestError::Relocation {
            bucket: bucket.to_string(),
            source_key: source_key.to_string(),
            destination_key: destination_key.to_string(),
            step,
            reason,
        }
    };

    let destination = destination_key(source_key, ns).ok_or_else(|| {
        fail("", RelocationStep::Resolve, "key has no base name".into())
    })?;
    if destination == source_key {
        return Err(fail(
            &destination,
            RelocationStep::Resolve,
            "destination equals source".into(),
        ));
    }

    if let Err(e) = blobs.copy(bucket, source_key, &destination).await {
        if e.is_not_found() {
            let landed = blobs
                .exists(bucket, &destination)
                .await
                .map_err(|e| fail(&destination, RelocationStep::Copy, e.to_string()))?;
            if landed {
                info!(bucket, source_key, destination = %destination, "Already relocated");
                return Ok(RelocationOutcome {
                    destination_key: destination,
                    moved: false,
                });
            }
        }
        return Err(fail(&destination, RelocationStep::Copy, e.to_string()));
    }

    match blobs.delete(bucket, source_key).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            warn!(bucket, source_key, "Source already deleted");
        }
        Err(e) => return Err(fail(&destination, RelocationStep::Delete, e.to_string())),
    }

    info!(bucket, source_key, destination = %destination, "Relocated source");
    Ok(RelocationOutcome {
        destination_key: destination,
        moved: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlobError;
    use crate::store::ObjectStoreBlobs;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `n` deletes with a backend error.
    struct FlakyDelete {
        inner: ObjectStoreBlobs,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for FlakyDelete {
        async fn get(&self, b: &str, k: &str) -> Result<Bytes, BlobError> {
            self.inner.get(b, k).await
        }
        async fn exists(&self, b: &str, k: &str) -> Result<bool, BlobError> {
            self.inner.exists(b, k).await
        }
        async fn copy(&self, b: &str, s: &str, d: &str) -> Result<(), BlobError> {
            self.inner.copy(b, s, d).await
        }
        async fn delete(&self, b: &str, k: &str) -> Result<(), BlobError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(BlobError::Backend {
                    bucket: b.into(),
                    key: k.into(),
                    detail: "503 Service Unavailable".into(),
                });
            }
            self.inner.delete(b, k).await
        }
        async fn put(&self, b: &str, k: &str, d: Bytes) -> Result<(), BlobError> {
            self.inner.put(b, k, d).await
        }
    }

    #[test]
    fn raw_prefix_is_replaced() {
        let ns = Namespaces::default();
        assert_eq!(
            destination_key("raw/resume1.pdf", &ns).as_deref(),
            Some("processed/resume1.pdf")
        );
        assert_eq!(
            destination_key("raw/2024/05/resume1.pdf", &ns).as_deref(),
            Some("processed/2024/05/resume1.pdf")
        );
    }

    #[test]
    fn other_keys_fall_back_to_base_name() {
        let ns = Namespaces::default();
        assert_eq!(
            destination_key("inbox/resume1.pdf", &ns).as_deref(),
            Some("processed/resume1.pdf")
        );
        assert_eq!(
            destination_key("resume1.pdf", &ns).as_deref(),
            Some("processed/resume1.pdf")
        );
        assert_eq!(
            destination_key("a/raw/resume1.pdf", &ns).as_deref(),
            Some("processed/resume1.pdf")
        );
    }

    #[test]
    fn keys_without_a_name_have_no_destination() {
        let ns = Namespaces::default();
        assert_eq!(destination_key("raw/", &ns), None);
        assert_eq!(destination_key("inbox/", &ns), None);
    }

    #[tokio::test]
    async fn moves_object() {
        let blobs = ObjectStoreBlobs::in_memory();
        blobs.put("docs", "raw/a.pdf", Bytes::from_static(b"%PDF")).await.unwrap();

        let out = relocate(&blobs, "docs", "raw/a.pdf", &Namespaces::default())
            .await
            .unwrap();
        assert_eq!(
            out,
            RelocationOutcome {
                destination_key: "processed/a.pdf".into(),
                moved: true
            }
        );
        assert!(!blobs.exists("docs", "raw/a.pdf").await.unwrap());
        assert!(blobs.exists("docs", "processed/a.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn retry_after_failed_delete_succeeds() {
        let blobs = FlakyDelete {
            inner: ObjectStoreBlobs::in_memory(),
            failures_left: AtomicUsize::new(1),
        };
        blobs.put("docs", "raw/a.pdf", Bytes::from_static(b"%PDF")).await.unwrap();
        let ns = Namespaces::default();

        let err = relocate(&blobs, "docs", "raw/a.pdf", &ns).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Relocation {
                step: RelocationStep::Delete,
                ..
            }
        ));
        assert!(err.is_retryable());
        // Both copies exist after the partial move.
        assert!(blobs.exists("docs", "raw/a.pdf").await.unwrap());
        assert!(blobs.exists("docs", "processed/a.pdf").await.unwrap());

        let out = relocate(&blobs, "docs", "raw/a.pdf", &ns).await.unwrap();
        assert!(out.moved);
        assert!(!blobs.exists("docs", "raw/a.pdf").await.unwrap());
        assert!(blobs.exists("docs", "processed/a.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn completed_move_is_reported_not_moved() {
        let blobs = ObjectStoreBlobs::in_memory();
        blobs
            .put("docs", "processed/a.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        let out = relocate(&blobs, "docs", "raw/a.pdf", &Namespaces::default())
            .await
            .unwrap();
        assert!(!out.moved);
        assert_eq!(out.destination_key, "processed/a.pdf");
    }

    #[tokio::test]
    async fn missing_source_without_destination_is_copy_error() {
        let blobs = ObjectStoreBlobs::in_memory();
        let err = relocate(&blobs, "docs", "raw/a.pdf", &Namespaces::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Relocation {
                step: RelocationStep::Copy,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn refuses_to_move_onto_itself() {
        let blobs = ObjectStoreBlobs::in_memory();
        blobs
            .put("docs", "processed/a.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        let err = relocate(&blobs, "docs", "processed/a.pdf", &Namespaces::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Relocation {
                step: RelocationStep::Resolve,
                ..
            }
        ));
        assert!(blobs.exists("docs", "processed/a.pdf").await.unwrap());
    }
}
