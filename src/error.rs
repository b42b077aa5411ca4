//! Error types for the slidecite library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`SlideCiteError`]: **Fatal**: the operation cannot proceed at all
//!   (deck missing or malformed, output directory unwritable, rendering
//!   credentials rejected, engine call failed in single-slide mode).
//!   Returned as `Err(SlideCiteError)` from every public entry point.
//!
//! * [`SlideError`]: **Non-fatal**: a single slide failed (thumbnail export
//!   rejected, engine error during a deck-wide run) while the other slides
//!   are fine. Stored inside [`crate::output::SlideReport`] so callers can
//!   inspect partial success instead of losing the whole deck to one slide.
//!
//! * [`EngineError`]: the cause reported by a
//!   [`crate::pipeline::llm::ReasoningEngine`]. It is preserved as the
//!   `source` of [`SlideCiteError::Analysis`] for diagnostics.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the slidecite library.
///
/// Slide-level failures use [`SlideError`] and are stored in
/// [`crate::output::SlideReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum SlideCiteError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The deck is missing, unreadable, or not a valid presentation container.
    #[error("Cannot open deck '{path}': {detail}")]
    DeckOpen { path: PathBuf, detail: String },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create the output directory or write an artefact.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// The conversion service rejected our credentials (401/403) or none
    /// could be loaded. Aborts the whole render run.
    #[error("Rendering service authentication failed: {detail}")]
    RenderAuth { detail: String },

    /// A deck-level remote step (upload, presentation lookup) failed after
    /// all retries.
    #[error("Rendering service error during {stage}: {detail}")]
    RenderFailed { stage: String, detail: String },

    /// The remote presentation does not have the same number of slides as
    /// the locally decoded deck, so thumbnails cannot be paired with text.
    #[error("Slide count mismatch: deck has {decoded} slides, rendered presentation has {rendered}")]
    SlideCountMismatch { decoded: usize, rendered: usize },

    // ── Analysis errors ───────────────────────────────────────────────────
    /// Image bytes could not be decoded as a raster image.
    #[error("Invalid slide image: {detail}")]
    InvalidImage { detail: String },

    /// The reasoning engine call failed.
    #[error("Citation analysis failed: {source}")]
    Analysis {
        #[source]
        source: EngineError,
    },

    /// No reasoning engine could be resolved (missing API key etc.).
    #[error("Reasoning engine '{provider}' is not configured.\n{hint}")]
    EngineNotConfigured { provider: String, hint: String },

    /// Every slide with a thumbnail failed analysis; there is no report.
    #[error("All {total} slides failed analysis.\nFirst error: {first_error}")]
    AllSlidesFailed { total: usize, first_error: String },

    /// The run was cancelled between slides.
    #[error("Run cancelled after {completed} slides")]
    Cancelled { completed: usize },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SlideCiteError {
    /// Shorthand for wrapping an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SlideCiteError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single slide.
///
/// Stored alongside [`crate::output::SlideReport`] when a slide fails.
/// A deck-wide run continues unless every slide fails.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum SlideError {
    /// Thumbnail export returned a non-success response.
    #[error("Slide {slide}: thumbnail export failed: {detail}")]
    RenderExport { slide: usize, detail: String },

    /// No thumbnail exists for the slide, so it could not be analysed.
    #[error("Slide {slide}: no thumbnail available, analysis skipped")]
    MissingThumbnail { slide: usize },

    /// The engine call for this slide failed.
    #[error("Slide {slide}: citation analysis failed: {detail}")]
    AnalysisFailed { slide: usize, detail: String },
}

impl SlideError {
    /// 1-indexed slide number the error belongs to.
    pub fn slide(&self) -> usize {
        match self {
            SlideError::RenderExport { slide, .. }
            | SlideError::MissingThumbnail { slide }
            | SlideError::AnalysisFailed { slide, .. } => *slide,
        }
    }
}

/// Failure reported by a reasoning engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// 401/403 or a missing/invalid API key.
    #[error("authentication rejected by '{provider}': {detail}")]
    Auth { provider: String, detail: String },

    /// 429: quota or rate limit exhausted.
    #[error("rate limit exceeded for '{provider}'")]
    RateLimited { provider: String },

    /// No response within the configured bound.
    #[error("no response after {secs}s")]
    Timeout { secs: u64 },

    /// The call succeeded but returned no text.
    #[error("engine returned an empty response")]
    EmptyResponse,

    /// Any other provider or transport failure.
    #[error("{0}")]
    Provider(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn analysis_error_keeps_engine_cause() {
        let e = SlideCiteError::Analysis {
            source: EngineError::Timeout { secs: 120 },
        };
        let cause = e.source().expect("engine error is the source");
        assert!(cause.to_string().contains("120s"));
    }

    #[test]
    fn analysis_error_message() {
        let e = SlideCiteError::Analysis {
            source: EngineError::EmptyResponse,
        };
        assert_eq!(
            e.to_string(),
            "Citation analysis failed: engine returned an empty response"
        );
    }

    #[test]
    fn io_error_names_path() {
        let e = SlideCiteError::io(
            "/readonly/out",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(e.to_string().contains("/readonly/out"));
    }

    #[test]
    fn slide_error_reports_slide_number() {
        let e = SlideError::RenderExport {
            slide: 4,
            detail: "HTTP 500".into(),
        };
        assert_eq!(e.slide(), 4);
        assert!(e.to_string().contains("HTTP 500"));
    }

    #[test]
    fn slide_count_mismatch_display() {
        let e = SlideCiteError::SlideCountMismatch {
            decoded: 3,
            rendered: 2,
        };
        let msg = e.to_string();
        assert!(msg.contains("3") && msg.contains("2"), "got: {msg}");
    }
}
