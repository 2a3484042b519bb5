//! With the `bundled` feature, embeds the library named by `PDFIUM_BUNDLE_LIB`
//! as `bundled::PDFIUM_BYTES`. Without it, does nothing.

use std::env;
use std::fs;
use std::path::PathBuf;

const LIB_VAR: &str = "PDFIUM_BUNDLE_LIB";

fn main() {
    println!("cargo:rerun-if-env-changed={LIB_VAR}");

    if env::var_os("CARGO_FEATURE_BUNDLED").is_none() {
        return;
    }
    if let Err(msg) = write_embedding() {
        panic!("pdfium-cache (bundled): {msg}");
    }
}

/// Generate `$OUT_DIR/bundled.rs`, which points `include_bytes!` straight at
/// the canonical library path.
fn write_embedding() -> Result<(), String> {
    let requested = env::var_os(LIB_VAR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| format!("{LIB_VAR} must name libpdfium.so / libpdfium.dylib / pdfium.dll"))?;
    let library = fs::canonicalize(&requested)
        .map_err(|e| format!("cannot resolve {}: {e}", requested.display()))?;
    println!("cargo:rerun-if-changed={}", library.display());

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| "OUT_DIR is not set".to_string())?;
    let generated = out_dir.join("bundled.rs");
    let source = format!(
        "/// The pdfium shared library embedded at compile time.\n\
         pub static PDFIUM_BYTES: &[u8] = include_bytes!({:?});\n",
        library.to_string_lossy()
    );
    fs::write(&generated, source).map_err(|e| format!("cannot write {}: {e}", generated.display()))
}
