//! Object-store access.
//!
//! The pipeline only needs five operations on `(bucket, key)` pairs, so it
//! talks to a [`BlobStore`] trait object rather than to a concrete client.
//! [`ObjectStoreBlobs`] implements it over the `object_store` crate, creating
//! one store per bucket on first use (GCS, local directory, or in-memory).

use crate::config::StorageBackend;
use crate::error::BlobError;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Byte-blob storage addressed by bucket and key.
///
/// Implementations must be safe for concurrent use; every in-flight event
/// shares the same instance.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the whole object.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, BlobError>;

    /// Whether the object exists.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, BlobError>;

    /// Server-side copy within a bucket. Overwrites `dst_key`.
    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), BlobError>;

    /// Delete the object. Backends differ on deleting a missing object: some
    /// succeed, some report `NotFound`.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError>;

    /// Write the whole object.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), BlobError>;
}

/// [`BlobStore`] over `object_store`, one underlying store per bucket.
pub struct ObjectStoreBlobs {
    backend: StorageBackend,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreBlobs {
    pub fn new(backend: StorageBackend) -> Self {
        info!(?backend, "Object store backend selected");
        Self {
            backend,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory store; buckets spring into existence on first use.
    pub fn in_memory() -> Self {
        Self::new(StorageBackend::Memory)
    }

    fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, BlobError> {
        let mut stores = self.stores.lock().map_err(|_| BlobError::Backend {
            bucket: bucket.to_string(),
            key: String::new(),
            detail: "store registry lock poisoned".into(),
        })?;
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let store = self.build_store(bucket)?;
        debug!(bucket, "Opened object store for bucket");
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn build_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, BlobError> {
        let backend_err = |detail: String| BlobError::Backend {
            bucket: bucket.to_string(),
            key: String::new(),
            detail,
        };

        match &self.backend {
            StorageBackend::Gcs => {
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| backend_err(e.to_string()))?;
                Ok(Arc::new(store))
            }
            StorageBackend::Local(root) => {
                let dir = root.join(bucket);
                std::fs::create_dir_all(&dir).map_err(|e| backend_err(e.to_string()))?;
                let store = LocalFileSystem::new_with_prefix(&dir)
                    .map_err(|e| backend_err(e.to_string()))?;
                Ok(Arc::new(store))
            }
            StorageBackend::Memory => Ok(Arc::new(InMemory::new())),
        }
    }
}

/// Object keys are taken verbatim. `ObjectPath::from` would percent-encode
/// characters such as `#` or `[` and address a different object.
fn object_path(bucket: &str, key: &str) -> Result<ObjectPath, BlobError> {
    ObjectPath::parse(key).map_err(|e| BlobError::Backend {
        bucket: bucket.to_string(),
        key: key.to_string(),
        detail: format!("invalid object key: {e}"),
    })
}

/// Map an `object_store` error onto the bucket/key it happened on.
fn map_err(bucket: &str, key: &str, err: object_store::Error) -> BlobError {
    match err {
        object_store::Error::NotFound { .. } => BlobError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        other => BlobError::Backend {
            bucket: bucket.to_string(),
            key: key.to_string(),
            detail: other.to_string(),
        },
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobs {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, BlobError> {
        let store = self.store_for(bucket)?;
        let path = object_path(bucket, key)?;
        let result = store.get(&path).await.map_err(|e| map_err(bucket, key, e))?;
        result.bytes().await.map_err(|e| map_err(bucket, key, e))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, BlobError> {
        let store = self.store_for(bucket)?;
        match store.head(&object_path(bucket, key)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_err(bucket, key, e)),
        }
    }

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), BlobError> {
        let store = self.store_for(bucket)?;
        let src = object_path(bucket, src_key)?;
        let dst = object_path(bucket, dst_key)?;
        store
            .copy(&src, &dst)
            .await
            .map_err(|e| map_err(bucket, src_key, e))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
        let store = self.store_for(bucket)?;
        store
            .delete(&object_path(bucket, key)?)
            .await
            .map_err(|e| map_err(bucket, key, e))
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), BlobError> {
        let store = self.store_for(bucket)?;
        store
            .put(&object_path(bucket, key)?, data.into())
            .await
            .map(|_| ())
            .map_err(|e| map_err(bucket, key, e))
    }
}
