//! Shared fixtures: a stub engine, an instrumented blob store and a pipeline
//! wired to both over in-memory storage.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use pdf_ingest::{
    BlobError, BlobStore, ConversionEngine, ConversionResult, EngineError, MemoryRecordStore,
    ObjectStoreBlobs, Pipeline, RecordStore, ServiceConfig, StorageBackend,
};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const BUCKET: &str = "docs";
pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n% stub document\n";

// ── Engine ───────────────────────────────────────────────────────────────

/// Returns a fixed result, or fails, and records what it was given.
pub struct StubEngine {
    text: String,
    metadata: Map<String, Value>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen_paths: Mutex<Vec<std::path::PathBuf>>,
}

impl StubEngine {
    pub fn returning(text: &str, metadata: Value) -> Self {
        let metadata = match metadata {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        Self {
            text: text.to_string(),
            metadata,
            fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
            seen_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn jane_doe() -> Self {
        Self::returning("Jane Doe\nSenior Engineer", json!({"pages": 2}))
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::jane_doe()
        }
    }

    /// Sleep for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_paths(&self) -> Vec<std::path::PathBuf> {
        self.seen_paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversionEngine for StubEngine {
    async fn convert(&self, path: &Path) -> Result<ConversionResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_paths.lock().unwrap().push(path.to_path_buf());
        assert!(path.exists(), "engine was handed a missing file");
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(EngineError::CorruptDocument {
                path: path.to_path_buf(),
                detail: "xref table damaged".into(),
            });
        }
        Ok(ConversionResult {
            text: self.text.clone(),
            metadata: self.metadata.clone(),
        })
    }
}

// ── Blob store ───────────────────────────────────────────────────────────

/// In-memory blobs with call counters and switchable failures.
pub struct ScriptedBlobs {
    pub inner: ObjectStoreBlobs,
    get_calls: AtomicUsize,
    fail_get: AtomicBool,
    delete_failures: AtomicUsize,
}

impl ScriptedBlobs {
    pub fn new() -> Self {
        Self {
            inner: ObjectStoreBlobs::in_memory(),
            get_calls: AtomicUsize::new(0),
            fail_get: AtomicBool::new(false),
            delete_failures: AtomicUsize::new(0),
        }
    }

    pub async fn seed(&self, key: &str) {
        self.inner
            .put(BUCKET, key, Bytes::from_static(PDF_BYTES))
            .await
            .unwrap();
    }

    pub async fn has(&self, key: &str) -> bool {
        self.inner.exists(BUCKET, key).await.unwrap()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn fail_gets(&self, on: bool) {
        self.fail_get.store(on, Ordering::SeqCst);
    }

    pub fn fail_next_deletes(&self, n: usize) {
        self.delete_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for ScriptedBlobs {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, BlobError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(BlobError::Backend {
                bucket: bucket.into(),
                key: key.into(),
                detail: "503 Service Unavailable".into(),
            });
        }
        self.inner.get(bucket, key).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, BlobError> {
        self.inner.exists(bucket, key).await
    }

    async fn copy(&self, bucket: &str, src: &str, dst: &str) -> Result<(), BlobError> {
        self.inner.copy(bucket, src, dst).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
        let left = self.delete_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.delete_failures.store(left - 1, Ordering::SeqCst);
            return Err(BlobError::Backend {
                bucket: bucket.into(),
                key: key.into(),
                detail: "403 Forbidden".into(),
            });
        }
        self.inner.delete(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), BlobError> {
        self.inner.put(bucket, key, data).await
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────

pub struct Fixture {
    pub blobs: Arc<ScriptedBlobs>,
    pub engine: Arc<StubEngine>,
    pub records: Arc<MemoryRecordStore>,
    pub staging: TempDir,
    pub config: ServiceConfig,
    pub pipeline: Pipeline,
}

impl Fixture {
    pub fn new(engine: StubEngine) -> Self {
        Self::with_records(engine, Arc::new(MemoryRecordStore::new()), None)
    }

    /// `records_override` replaces the memory store the pipeline writes to;
    /// `self.records` then stays empty.
    pub fn with_records(
        engine: StubEngine,
        records: Arc<MemoryRecordStore>,
        records_override: Option<Arc<dyn RecordStore>>,
    ) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let config = ServiceConfig::builder()
            .storage(StorageBackend::Memory)
            .staging_dir(staging.path())
            .build()
            .unwrap();
        let blobs = Arc::new(ScriptedBlobs::new());
        let engine = Arc::new(engine);
        let sink: Arc<dyn RecordStore> = match records_override {
            Some(store) => store,
            None => records.clone(),
        };
        let pipeline = Pipeline::new(blobs.clone(), engine.clone(), sink, &config);
        Self {
            blobs,
            engine,
            records,
            staging,
            config,
            pipeline,
        }
    }

    /// Hand the pipeline over (e.g. to a router) and keep the handles.
    pub fn split(self) -> (Pipeline, Handles) {
        let handles = Handles {
            blobs: self.blobs,
            engine: self.engine,
            records: self.records,
            _staging: self.staging,
        };
        (self.pipeline, handles)
    }

    /// Entries left in the staging root.
    pub fn staged_entries(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }
}

/// What remains observable once the pipeline has been moved out.
pub struct Handles {
    pub blobs: Arc<ScriptedBlobs>,
    pub engine: Arc<StubEngine>,
    pub records: Arc<MemoryRecordStore>,
    _staging: TempDir,
}

pub fn event_json(key: &str) -> Value {
    json!({"bucket": BUCKET, "name": key})
}

/// Wrap an event the way a push subscription delivers it.
pub fn push_envelope(inner: &Value) -> Value {
    use base64::Engine as _;
    json!({
        "message": {
            "data": base64::engine::general_purpose::STANDARD.encode(inner.to_string()),
            "messageId": "9876543210",
            "publishTime": "2026-10-18T09:00:00Z"
        },
        "subscription": "projects/demo/subscriptions/ingest-push"
    })
}
