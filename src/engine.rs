//! Conversion engine: staged file → text + metadata.
//!
//! The pipeline sees only the [`ConversionEngine`] trait. [`PdfiumEngine`]
//! is the production implementation; it is built once at startup by
//! [`load_engine`] and shared by every request.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library doing CPU-bound work behind a global lock
//! (`thread_safe` feature); the `sync` feature makes the bindings `Send + Sync`
//! so one [`PdfiumEngine`] can be shared across requests. Running it on a Tokio worker would stall every
//! other request on that worker, so each conversion is moved to the blocking
//! pool.

use crate::config::ServiceConfig;
use crate::error::EngineError;
use crate::store::BlobStore;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the engine extracted. Opaque to the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionResult {
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// An external content-conversion capability.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    async fn convert(&self, path: &Path) -> Result<ConversionResult, EngineError>;
}

/// How to separate pages in the extracted text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Blank line between pages. (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with the number of the page that follows.
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Separator placed before page `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {page_num} -->\n\n"),
            PageSeparator::Custom(s) => format!("\n\n{s}\n\n"),
        }
    }

    /// Join per-page texts, skipping pages without a text layer.
    pub fn join(&self, pages: &[String]) -> String {
        let mut out = String::new();
        for (i, text) in pages.iter().enumerate() {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push_str(&self.render(i + 1));
            }
            out.push_str(text);
        }
        out
    }
}

/// Text-layer extraction through pdfium.
pub struct PdfiumEngine {
    pdfium: Arc<Pdfium>,
    separator: PageSeparator,
}

impl PdfiumEngine {
    pub fn new(pdfium: Pdfium) -> Self {
        Self {
            pdfium: Arc::new(pdfium),
            separator: PageSeparator::default(),
        }
    }

    pub fn with_separator(mut self, separator: PageSeparator) -> Self {
        self.separator = separator;
        self
    }
}

#[async_trait]
impl ConversionEngine for PdfiumEngine {
    async fn convert(&self, path: &Path) -> Result<ConversionResult, EngineError> {
        check_pdf_magic(path)?;

        let pdfium = Arc::clone(&self.pdfium);
        let separator = self.separator.clone();
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || extract_blocking(&pdfium, &path, &separator))
            .await
            .map_err(|e| EngineError::Internal(format!("Conversion task panicked: {e}")))?
    }
}

/// Reject anything that does not start with `%PDF` before pdfium sees it.
pub fn check_pdf_magic(path: &Path) -> Result<(), EngineError> {
    let mut file = std::fs::File::open(path).map_err(|e| EngineError::CorruptDocument {
        path: path.to_path_buf(),
        detail: format!("cannot open: {e}"),
    })?;
    let mut magic = [0u8; 4];
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) => {
                return Err(EngineError::CorruptDocument {
                    path: path.to_path_buf(),
                    detail: format!("cannot read: {e}"),
                })
            }
        }
    }
    if &magic != b"%PDF" {
        return Err(EngineError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

fn extract_blocking(
    pdfium: &Pdfium,
    path: &Path,
    separator: &PageSeparator,
) -> Result<ConversionResult, EngineError> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| EngineError::CorruptDocument {
            path: path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let mut texts = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let text = page.text().map_err(|e| EngineError::CorruptDocument {
            path: path.to_path_buf(),
            detail: format!("page {}: {e:?}", idx + 1),
        })?;
        texts.push(text.all());
    }
    debug!(pages = texts.len(), path = %path.display(), "Extracted text layer");

    let tags = document.metadata();
    let tag = |t: PdfDocumentMetadataTagType| -> Value {
        tags.get(t)
            .map(|m| m.value().to_string())
            .filter(|v| !v.is_empty())
            .map(Value::String)
            .unwrap_or(Value::Null)
    };

    let mut metadata = Map::new();
    metadata.insert("page_count".into(), Value::from(texts.len()));
    metadata.insert(
        "pdf_version".into(),
        Value::String(format!("{:?}", document.version())),
    );
    metadata.insert("title".into(), tag(PdfDocumentMetadataTagType::Title));
    metadata.insert("author".into(), tag(PdfDocumentMetadataTagType::Author));
    metadata.insert("subject".into(), tag(PdfDocumentMetadataTagType::Subject));
    metadata.insert("creator".into(), tag(PdfDocumentMetadataTagType::Creator));
    metadata.insert("producer".into(), tag(PdfDocumentMetadataTagType::Producer));
    metadata.insert(
        "creation_date".into(),
        tag(PdfDocumentMetadataTagType::CreationDate),
    );
    metadata.insert(
        "modification_date".into(),
        tag(PdfDocumentMetadataTagType::ModificationDate),
    );

    Ok(ConversionResult {
        text: separator.join(&texts),
        metadata,
    })
}

// ── Loading ──────────────────────────────────────────────────────────────

/// Locate and bind pdfium once. First match wins:
///
/// 1. `PDFIUM_LIB_PATH`, or a library already in the model cache dir
/// 2. the library embedded at build time (`bundled` feature)
/// 3. the packaged archive at `MODEL_BUCKET`/`MODEL_PATH`, unpacked into the
///    cache dir
/// 4. the system library
pub async fn load_engine(
    config: &ServiceConfig,
    blobs: &dyn BlobStore,
) -> Result<PdfiumEngine, EngineError> {
    let cache_root = config.model_cache_dir.clone();
    let mut attempts: Vec<String> = Vec::new();
    debug!(
        cache = %cache_root.display(),
        bundled = pdfium_cache::has_bundled_library(),
        "Locating conversion engine"
    );

    if let Some(path) = pdfium_cache::cached_library(&cache_root) {
        match bind(&path) {
            Ok(engine) => return Ok(engine),
            Err(e) => attempts.push(e),
        }
    }

    #[cfg(feature = "bundled")]
    {
        match pdfium_cache::install_bundled(&cache_root) {
            Ok(path) => match bind(&path) {
                Ok(engine) => return Ok(engine),
                Err(e) => attempts.push(e),
            },
            Err(e) => attempts.push(format!("bundled: {e}")),
        }
    }

    if let (Some(bucket), Some(key)) = (&config.model_bucket, &config.model_path) {
        match install_from_store(blobs, bucket, key, cache_root.clone()).await {
            Ok(path) => match bind(&path) {
                Ok(engine) => return Ok(engine),
                Err(e) => attempts.push(e),
            },
            Err(e) => {
                warn!(bucket = %bucket, key = %key, error = %e, "Could not install packaged engine");
                attempts.push(e);
            }
        }
    }

    match pdfium_cache::bind_system() {
        Ok(pdfium) => {
            info!("Conversion engine bound to system pdfium");
            Ok(PdfiumEngine::new(pdfium))
        }
        Err(e) => {
            attempts.push(e.to_string());
            Err(EngineError::Unavailable(attempts.join("; ")))
        }
    }
}

fn bind(path: &Path) -> Result<PdfiumEngine, String> {
    match pdfium_cache::bind_from_path(path) {
        Ok(pdfium) => {
            info!(path = %path.display(), "Conversion engine loaded");
            Ok(PdfiumEngine::new(pdfium))
        }
        Err(e) => {
            warn!(error = %e, "Could not bind pdfium");
            Err(e.to_string())
        }
    }
}

async fn install_from_store(
    blobs: &dyn BlobStore,
    bucket: &str,
    key: &str,
    cache_root: PathBuf,
) -> Result<PathBuf, String> {
    info!(bucket, key, "Fetching packaged conversion engine");
    let archive = blobs.get(bucket, key).await.map_err(|e| e.to_string())?;
    tokio::task::spawn_blocking(move || pdfium_cache::install_from_archive(&archive, &cache_root))
        .await
        .map_err(|e| format!("install task panicked: {e}"))?
        .map_err(|e| e.to_string())
}
