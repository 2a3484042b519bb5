//! # pdfium-cache
//!
//! Locate, unpack and bind the [PDFium](https://pdfium.googlesource.com/pdfium/)
//! shared library that backs the pdf-ingest conversion engine.
//!
//! The engine is loaded exactly once per process. This crate only deals with
//! the on-disk side of that: where the library lives, how a packaged archive
//! becomes a library file in the cache, and how the library is bound. Fetching
//! the archive is the caller's job (pdf-ingest pulls it from the object store),
//! so the crate stays free of any network or async dependency.
//!
//! ## Resolution order
//!
//! 1. `PDFIUM_LIB_PATH` — an existing library on disk.
//! 2. `{cache_root}/pdfium-{VERSION}/{lib_name}` — unpacked by an earlier run.
//! 3. The library embedded at build time (`bundled` feature), written to the
//!    cache on first use.
//! 4. A packaged `.tgz` handed to [`install_from_archive`].
//!
//! ```rust,no_run
//! use pdfium_cache::{bind_from_path, cached_library, default_cache_root};
//!
//! let root = default_cache_root();
//! if let Some(path) = cached_library(&root) {
//!     let pdfium = bind_from_path(&path).expect("bind failed");
//!     # drop(pdfium);
//! }
//! ```
//!
//! ## Platform support
//!
//! | OS      | Arch    | Library               |
//! |---------|---------|-----------------------|
//! | macOS   | arm64   | `libpdfium.dylib`     |
//! | macOS   | x86_64  | `libpdfium.dylib`     |
//! | Linux   | x86_64  | `libpdfium.so`        |
//! | Linux   | aarch64 | `libpdfium.so`        |
//! | Windows | x86_64  | `pdfium.dll`          |
//! | Windows | aarch64 | `pdfium.dll`          |

use std::path::{Path, PathBuf};

use pdfium_render::prelude::Pdfium;
use thiserror::Error;

#[cfg(feature = "bundled")]
mod bundled {
    include!(concat!(env!("OUT_DIR"), "/bundled.rs"));
}

// ── Public constants ─────────────────────────────────────────────────────────

/// The pdfium-binaries release the packaged archives are built from.
pub const PDFIUM_VERSION: &str = "7690";

/// Environment variable naming an existing library; skips the cache entirely.
pub const LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by pdfium-cache operations.
#[derive(Error, Debug)]
pub enum PdfiumCacheError {
    /// The current OS/architecture combination is not supported.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// Could not create or write into the cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// gzip/tar extraction failed or the library was not in the archive.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// `pdfium-render` could not load the library.
    #[error("Failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

// ── Platform metadata ────────────────────────────────────────────────────────

/// Where the library sits inside a pdfium-binaries archive and what it is
/// called on disk.
#[derive(Debug, Clone, Copy)]
pub struct PlatformInfo {
    /// Relative path inside the archive, e.g. `lib/libpdfium.so`.
    pub lib_path_in_archive: &'static str,
    /// Filename written to the cache, e.g. `libpdfium.so`.
    pub lib_name: &'static str,
}

/// Detect the library layout for the running platform.
pub fn detect_platform() -> Result<PlatformInfo, PdfiumCacheError> {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    match (os, arch) {
        ("macos", "aarch64") | ("macos", "x86_64") => Ok(PlatformInfo {
            lib_path_in_archive: "lib/libpdfium.dylib",
            lib_name: "libpdfium.dylib",
        }),
        ("linux", "x86_64") | ("linux", "aarch64") => Ok(PlatformInfo {
            lib_path_in_archive: "lib/libpdfium.so",
            lib_name: "libpdfium.so",
        }),
        ("windows", "x86_64") | ("windows", "aarch64") => Ok(PlatformInfo {
            lib_path_in_archive: "bin/pdfium.dll",
            lib_name: "pdfium.dll",
        }),
        (os, arch) => Err(PdfiumCacheError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        }),
    }
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Default cache root when the service is not told otherwise.
///
/// - **Linux**: `~/.cache/pdf-ingest/`
/// - **macOS**: `~/Library/Caches/pdf-ingest/`
/// - **Windows**: `%LOCALAPPDATA%\pdf-ingest\`
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join("pdf-ingest")
}

/// Per-version directory under `cache_root` holding the unpacked library.
pub fn library_dir(cache_root: &Path) -> PathBuf {
    cache_root.join(format!("pdfium-{PDFIUM_VERSION}"))
}

/// Returns the library path if it is already available without unpacking
/// anything: `PDFIUM_LIB_PATH` first, then the cache.
pub fn cached_library(cache_root: &Path) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(LIB_PATH_ENV) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    let info = detect_platform().ok()?;
    let p = library_dir(cache_root).join(info.lib_name);
    p.exists().then_some(p)
}

// ── Installation ─────────────────────────────────────────────────────────────

/// Unpack the platform library from a gzipped tar archive into the cache.
///
/// The file is extracted next to its final name and renamed into place, so a
/// concurrent starter never binds a half-written library.
pub fn install_from_archive(
    archive_bytes: &[u8],
    cache_root: &Path,
) -> Result<PathBuf, PdfiumCacheError> {
    let info = detect_platform()?;
    let dir = library_dir(cache_root);
    std::fs::create_dir_all(&dir).map_err(PdfiumCacheError::CacheDir)?;

    let lib_path = dir.join(info.lib_name);
    let partial = dir.join(format!("{}.partial", info.lib_name));
    extract_entry(archive_bytes, info.lib_path_in_archive, &partial)?;
    std::fs::rename(&partial, &lib_path).map_err(PdfiumCacheError::CacheDir)?;

    Ok(lib_path)
}

/// Write the library embedded at build time into the cache.
#[cfg(feature = "bundled")]
pub fn install_bundled(cache_root: &Path) -> Result<PathBuf, PdfiumCacheError> {
    let info = detect_platform()?;
    let dir = library_dir(cache_root);
    std::fs::create_dir_all(&dir).map_err(PdfiumCacheError::CacheDir)?;

    let lib_path = dir.join(info.lib_name);
    if lib_path.exists() {
        return Ok(lib_path);
    }
    let partial = dir.join(format!("{}.partial", info.lib_name));
    std::fs::write(&partial, bundled::PDFIUM_BYTES).map_err(PdfiumCacheError::CacheDir)?;
    std::fs::rename(&partial, &lib_path).map_err(PdfiumCacheError::CacheDir)?;

    Ok(lib_path)
}

/// Whether this build carries an embedded library.
pub fn has_bundled_library() -> bool {
    cfg!(feature = "bundled")
}

// ── Binding ──────────────────────────────────────────────────────────────────

/// Bind to a PDFium library at an explicit `path`.
pub fn bind_from_path(path: &Path) -> Result<Pdfium, PdfiumCacheError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| PdfiumCacheError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Bind to whatever PDFium the system loader finds.
pub fn bind_system() -> Result<Pdfium, PdfiumCacheError> {
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| PdfiumCacheError::Bind {
            path: PathBuf::from("<system>"),
            reason: e.to_string(),
        })
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Extract a single file from a gzipped tar archive into `dest_path`.
fn extract_entry(
    archive_bytes: &[u8],
    path_in_archive: &str,
    dest_path: &Path,
) -> Result<(), PdfiumCacheError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let gz = GzDecoder::new(archive_bytes);
    let mut archive = Archive::new(gz);

    for entry in archive
        .entries()
        .map_err(|e| PdfiumCacheError::Extract(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| PdfiumCacheError::Extract(e.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|e| PdfiumCacheError::Extract(e.to_string()))?
            .into_owned();

        // Archives built with `tar -C dir .` prefix every entry with "./".
        let entry_str = entry_path.to_string_lossy();
        if entry_str.trim_start_matches("./") == path_in_archive {
            entry
                .unpack(dest_path)
                .map_err(|e| PdfiumCacheError::Extract(format!("Unpack failed: {e}")))?;
            return Ok(());
        }
    }

    Err(PdfiumCacheError::Extract(format!(
        "Library '{}' not found in archive",
        path_in_archive
    )))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
