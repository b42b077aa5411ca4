//! Data produced by the pipeline: decoded slides, thumbnails, analysis
//! results and the deck-wide report.
//!
//! Everything here is plain data with `serde` derives so it can be written to
//! the JSON manifests, returned over HTTP, or printed with `--json`.

use crate::error::SlideError;
use crate::prompts::NO_NEW_SOURCES;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

static IMAGE_ASSET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^slide(\d+)_img(\d+)\.([A-Za-z0-9]+)$").expect("valid regex"));

// ── Decoded deck ─────────────────────────────────────────────────────────

/// One slide as extracted by [`crate::pipeline::decode::DeckDecoder`].
///
/// `texts` holds the trimmed, non-empty text of each text-bearing shape in
/// shape-traversal order. It is always present, and empty for a slide that
/// only carries graphics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    /// 1-indexed position in the deck's native slide order.
    pub slide_number: usize,
    pub texts: Vec<String>,
    /// Embedded pictures, serialised as their content-store paths.
    pub images: Vec<ImageAsset>,
}

impl Slide {
    pub fn new(slide_number: usize) -> Self {
        Self {
            slide_number,
            texts: Vec::new(),
            images: Vec::new(),
        }
    }

    /// The slide's text as a single block for the analysis request.
    ///
    /// Text boxes are separated by newlines; an all-graphics slide yields "".
    pub fn text_block(&self) -> String {
        self.texts.join("\n")
    }
}

/// An embedded picture written to the content store.
///
/// The store file name is always `slide{N}_img{K}.{ext}`, so the same deck
/// decoded into the same directory produces the same paths on every run.
/// In manifests an asset is serialised as its path alone; deserialisation
/// recovers the slide number, sequence index and extension from the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub slide_number: usize,
    /// 1-based, unique within the slide.
    pub sequence_index: usize,
    /// Native format extension without the dot, e.g. `png`, `jpg`, `emf`.
    pub extension: String,
    pub path: PathBuf,
}

impl ImageAsset {
    /// Build the asset for `slide_number`/`sequence_index` inside `dir`.
    pub fn new(dir: &Path, slide_number: usize, sequence_index: usize, extension: &str) -> Self {
        let extension = extension.to_string();
        let path = dir.join(Self::file_name(slide_number, sequence_index, &extension));
        Self {
            slide_number,
            sequence_index,
            extension,
            path,
        }
    }

    /// Deterministic store file name for an embedded image.
    pub fn file_name(slide_number: usize, sequence_index: usize, extension: &str) -> String {
        format!("slide{slide_number}_img{sequence_index}.{extension}")
    }

    /// Recover an asset from a store path. Returns `None` for foreign names.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?;
        let caps = IMAGE_ASSET_NAME.captures(name)?;
        Some(Self {
            slide_number: caps[1].parse().ok()?,
            sequence_index: caps[2].parse().ok()?,
            extension: caps[3].to_string(),
            path,
        })
    }
}

impl Serialize for ImageAsset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.path.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ImageAsset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let path = PathBuf::deserialize(deserializer)?;
        let shown = path.display().to_string();
        ImageAsset::from_path(path).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "'{shown}' is not an embedded-image path (expected slide{{N}}_img{{K}}.{{ext}})"
            ))
        })
    }
}

// ── Rendered thumbnails ──────────────────────────────────────────────────

/// Whole-slide PNG rendered by the conversion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideThumbnail {
    pub slide_number: usize,
    /// Where the PNG was written (`slide_{N}.png`).
    pub path: PathBuf,
    #[serde(skip)]
    pub png: Vec<u8>,
}

impl SlideThumbnail {
    /// Deterministic file name for a slide thumbnail.
    pub fn file_name(slide_number: usize) -> String {
        format!("slide_{slide_number}.png")
    }
}

/// Result of [`crate::pipeline::render::SlideRenderer::render_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOutput {
    /// Identifier of the converted presentation on the remote service.
    pub presentation_id: String,
    /// Number of slides the remote presentation reported.
    pub remote_slide_count: usize,
    /// Successfully exported thumbnails, in slide order.
    pub thumbnails: Vec<SlideThumbnail>,
    /// Slides whose export failed; absent from `thumbnails` and the manifest.
    pub failures: Vec<SlideError>,
    pub manifest_path: PathBuf,
}

impl RenderOutput {
    pub fn thumbnail(&self, slide_number: usize) -> Option<&SlideThumbnail> {
        self.thumbnails
            .iter()
            .find(|t| t.slide_number == slide_number)
    }
}

// ── Analysis ─────────────────────────────────────────────────────────────

/// The engine's reply for one slide.
///
/// The text is kept verbatim (surrounding whitespace trimmed). The variant
/// only records whether the reply is the exact no-new-sources sentinel; the
/// reference list itself is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum AnalysisResult {
    /// The engine answered with [`NO_NEW_SOURCES`].
    NoNewSources,
    /// A bulleted list of APA references.
    Citations(String),
}

impl AnalysisResult {
    /// Classify a raw engine reply. Returns `None` when it is blank.
    pub fn from_response(raw: &str) -> Option<Self> {
        let text = raw.trim();
        if text.is_empty() {
            None
        } else if text == NO_NEW_SOURCES {
            Some(AnalysisResult::NoNewSources)
        } else {
            Some(AnalysisResult::Citations(text.to_string()))
        }
    }

    /// The reply exactly as returned to callers.
    pub fn as_str(&self) -> &str {
        match self {
            AnalysisResult::NoNewSources => NO_NEW_SOURCES,
            AnalysisResult::Citations(text) => text,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            AnalysisResult::NoNewSources => NO_NEW_SOURCES.to_string(),
            AnalysisResult::Citations(text) => text,
        }
    }

    pub fn has_citations(&self) -> bool {
        matches!(self, AnalysisResult::Citations(_))
    }

    /// Bullet entries of a reference list, marker stripped.
    pub fn references(&self) -> Vec<&str> {
        match self {
            AnalysisResult::NoNewSources => Vec::new(),
            AnalysisResult::Citations(text) => text
                .lines()
                .map(str::trim)
                .filter_map(|line| {
                    ["- ", "* ", "• ", "・", "-", "•"]
                        .iter()
                        .find_map(|marker| line.strip_prefix(marker))
                        .map(str::trim)
                })
                .filter(|entry| !entry.is_empty())
                .collect(),
        }
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Deck-wide report ─────────────────────────────────────────────────────

/// Outcome of one slide in a deck-wide check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideReport {
    pub slide_number: usize,
    pub texts: Vec<String>,
    pub thumbnail: Option<PathBuf>,
    /// `None` when the slide was skipped or its analysis failed.
    pub result: Option<AnalysisResult>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub error: Option<SlideError>,
}

impl SlideReport {
    pub(crate) fn skipped(slide: &Slide, error: SlideError) -> Self {
        Self {
            slide_number: slide.slide_number,
            texts: slide.texts.clone(),
            thumbnail: None,
            result: None,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

/// Aggregate counters for a deck-wide check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckStats {
    pub total_slides: usize,
    pub analyzed_slides: usize,
    pub failed_slides: usize,
    /// Slides without a thumbnail (export failed), never sent to the engine.
    pub skipped_slides: usize,
    pub slides_with_citations: usize,
    pub total_references: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
    pub decode_duration_ms: u64,
    pub render_duration_ms: u64,
    pub analysis_duration_ms: u64,
}

/// Everything a deck-wide check produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckReport {
    pub deck: PathBuf,
    /// Sorted by slide number.
    pub slides: Vec<SlideReport>,
    pub stats: CheckStats,
}

impl DeckReport {
    /// Concatenate the reference lists of every slide that has one.
    pub fn reference_list(&self) -> String {
        self.slides
            .iter()
            .filter_map(|s| match &s.result {
                Some(r @ AnalysisResult::Citations(_)) => {
                    Some(format!("## Slide {}\n\n{}", s.slide_number, r.as_str()))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
