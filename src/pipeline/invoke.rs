//! Conversion invoker: a thin pass-through to the engine.

use crate::engine::{ConversionEngine, ConversionResult};
use crate::error::IngestError;
use crate::pipeline::fetch::StagedArtifact;
use tracing::{debug, info};

const PREVIEW_CHARS: usize = 200;

/// Convert the staged artifact. No retries; a failure aborts the event and
/// leaves redelivery to the caller.
pub async fn invoke(
    engine: &dyn ConversionEngine,
    staged: &StagedArtifact,
) -> Result<ConversionResult, IngestError> {
    let result = engine
        .convert(staged.path())
        .await
        .map_err(|source| IngestError::Conversion {
            key: staged.source_key.clone(),
            source,
        })?;

    info!(
        key = %staged.source_key,
        chars = result.text.chars().count(),
        metadata_keys = result.metadata.len(),
        "Converted artifact"
    );
    debug!(key = %staged.source_key, preview = %preview(&result.text), "Extracted text");
    Ok(result)
}

/// First characters of `text`, cut on a char boundary.
pub(crate) fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_char_bounded() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS);
    }
}
