//! Deck-wide and single-slide entry points.
//!
//! [`check_deck`] runs the whole pipeline and returns once every slide has
//! been analysed: resolve input → decode → render → cross-check slide
//! counts → analyse each slide with a thumbnail, bounded by
//! `config.concurrency`. Use [`crate::stream::check_stream`] to receive
//! slide reports as they complete instead.
//!
//! [`suggest`] is the single-slide path the HTTP boundary uses: caller
//! supplied text and image straight into the [`CitationAnalyzer`].

use crate::config::CheckConfig;
use crate::error::{SlideCiteError, SlideError};
use crate::output::{AnalysisResult, CheckStats, DeckReport, RenderOutput, Slide, SlideReport};
use crate::pipeline::decode::DeckDecoder;
use crate::pipeline::google::GoogleSlidesConverter;
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::llm::{CitationAnalyzer, LlmEngine, ReasoningEngine};
use crate::pipeline::manifest;
use crate::pipeline::render::{SlideConverter, SlideRenderer};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Check every slide of a deck for uncited figures and tables.
///
/// # Arguments
/// * `input`: Local file path or HTTP/HTTPS URL to a PPTX deck
/// * `config`: Check configuration
///
/// # Returns
/// `Ok(DeckReport)` when at least one slide was analysed, even if others
/// failed (check `report.stats.failed_slides` / `skipped_slides`).
///
/// # Errors
/// Returns `Err(SlideCiteError)` only for fatal errors:
/// - Deck missing or malformed, output directory unwritable
/// - Conversion credentials rejected, upload failed after retries
/// - Rendered slide count differs from the deck (when verification is on)
/// - Every slide failed, or the run was cancelled
pub async fn check_deck(
    input: impl AsRef<str>,
    config: &CheckConfig,
) -> Result<DeckReport, SlideCiteError> {
    let total_start = Instant::now();
    let prepared = prepare(input.as_ref(), config).await?;
    let total_slides = prepared.slides.len();

    let analysis_start = Instant::now();
    let work = prepared.work_items();
    let candidates = work.iter().filter(|w| w.png.is_some()).count();
    if let Some(ref cb) = config.progress_callback {
        cb.on_check_start(candidates);
    }

    let mut reports: Vec<Option<SlideReport>> = stream::iter(work.into_iter().map(|item| {
        let analyzer = prepared.analyzer.clone();
        async move { analyze_item(&analyzer, item, candidates, config).await }
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await;
    let analysis_duration_ms = analysis_start.elapsed().as_millis() as u64;

    if reports.iter().any(Option::is_none) {
        let completed = reports
            .iter()
            .flatten()
            .filter(|r| r.is_success())
            .count();
        return Err(SlideCiteError::Cancelled { completed });
    }
    let mut slides: Vec<SlideReport> = reports.drain(..).flatten().collect();
    slides.sort_by_key(|r| r.slide_number);

    let stats = CheckStats {
        total_slides,
        analyzed_slides: slides.iter().filter(|r| r.is_success()).count(),
        failed_slides: slides
            .iter()
            .filter(|r| matches!(r.error, Some(SlideError::AnalysisFailed { .. })))
            .count(),
        skipped_slides: slides
            .iter()
            .filter(|r| {
                matches!(
                    r.error,
                    Some(SlideError::MissingThumbnail { .. } | SlideError::RenderExport { .. })
                )
            })
            .count(),
        slides_with_citations: slides
            .iter()
            .filter(|r| r.result.as_ref().is_some_and(AnalysisResult::has_citations))
            .count(),
        total_references: slides
            .iter()
            .filter_map(|r| r.result.as_ref())
            .map(|r| r.references().len())
            .sum(),
        total_input_tokens: slides.iter().map(|r| r.input_tokens as u64).sum(),
        total_output_tokens: slides.iter().map(|r| r.output_tokens as u64).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        decode_duration_ms: prepared.decode_duration_ms,
        render_duration_ms: prepared.render_duration_ms,
        analysis_duration_ms,
    };

    if total_slides > 0 && stats.analyzed_slides == 0 {
        let first_error = slides
            .iter()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(SlideCiteError::AllSlidesFailed {
            total: total_slides,
            first_error,
        });
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_check_complete(candidates, stats.analyzed_slides);
    }
    info!(
        "Check complete: {}/{} slides analysed, {} with citations, {}ms total",
        stats.analyzed_slides, total_slides, stats.slides_with_citations, stats.total_duration_ms
    );

    Ok(DeckReport {
        deck: prepared.deck_path,
        slides,
        stats,
    })
}

/// Check a deck and write the JSON report to `output_path`.
///
/// The report is written through a temp file and renamed into place.
pub async fn check_deck_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &CheckConfig,
) -> Result<CheckStats, SlideCiteError> {
    let report = check_deck(input, config).await?;
    manifest::write_json_atomic(output_path.as_ref(), &report)?;
    Ok(report.stats)
}

/// Synchronous wrapper around [`check_deck`].
///
/// Creates a temporary tokio runtime internally.
pub fn check_sync(
    input: impl AsRef<str>,
    config: &CheckConfig,
) -> Result<DeckReport, SlideCiteError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SlideCiteError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(check_deck(input, config))
}

/// Analyse a single slide's text and image.
///
/// Does not touch the deck pipeline; only the reasoning engine is needed.
pub async fn suggest(
    text: &str,
    image: &[u8],
    config: &CheckConfig,
) -> Result<AnalysisResult, SlideCiteError> {
    let engine = resolve_engine(config)?;
    let analyzer = CitationAnalyzer::new(engine, config);
    Ok(analyzer.analyze(text, image).await?.result)
}

/// Decode a deck into `config.output_dir` without rendering or analysis.
pub async fn extract_deck(input: impl AsRef<str>, config: &CheckConfig) -> Result<Vec<Slide>, SlideCiteError> {
    let resolved = input::resolve_input(input.as_ref(), config.download_timeout_secs).await?;
    DeckDecoder::from_config(config)
        .decompose_async(resolved.path())
        .await
}

/// Render a deck's thumbnails into `config.thumbnail_dir` without analysis.
pub async fn render_deck(input: impl AsRef<str>, config: &CheckConfig) -> Result<RenderOutput, SlideCiteError> {
    let resolved = input::resolve_input(input.as_ref(), config.download_timeout_secs).await?;
    let converter = resolve_converter(config).await?;
    SlideRenderer::new(converter, config)
        .render_all(resolved.path())
        .await
}

// ── Shared with the streaming API ────────────────────────────────────────

/// Everything the analysis phase needs, produced by [`prepare`].
pub(crate) struct Prepared {
    /// Keeps a downloaded deck alive until the run ends.
    _input: ResolvedInput,
    pub deck_path: PathBuf,
    pub slides: Vec<Slide>,
    pub render: RenderOutput,
    pub analyzer: CitationAnalyzer,
    pub decode_duration_ms: u64,
    pub render_duration_ms: u64,
}

/// One slide paired with its thumbnail (or the reason it has none).
pub(crate) struct WorkItem {
    pub slide: Slide,
    pub thumbnail: Option<PathBuf>,
    pub png: Option<Vec<u8>>,
    pub render_error: Option<SlideError>,
}

impl Prepared {
    pub(crate) fn work_items(&self) -> Vec<WorkItem> {
        self.slides
            .iter()
            .map(|slide| {
                let thumb = self.render.thumbnail(slide.slide_number);
                WorkItem {
                    slide: slide.clone(),
                    thumbnail: thumb.map(|t| t.path.clone()),
                    png: thumb.map(|t| t.png.clone()),
                    render_error: self
                        .render
                        .failures
                        .iter()
                        .find(|f| f.slide() == slide.slide_number)
                        .cloned(),
                }
            })
            .collect()
    }
}

/// Resolve input, engine and converter, then decode and render the deck.
pub(crate) async fn prepare(input_str: &str, config: &CheckConfig) -> Result<Prepared, SlideCiteError> {
    info!("Starting check: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let deck_path = resolved.path().to_path_buf();

    // ── Step 2: Resolve capabilities ─────────────────────────────────────
    let engine = resolve_engine(config)?;
    let analyzer = CitationAnalyzer::new(engine, config);
    debug!("Using reasoning engine '{}'", analyzer.engine_name());

    // ── Step 3: Decode ───────────────────────────────────────────────────
    let decode_start = Instant::now();
    let slides = DeckDecoder::from_config(config)
        .decompose_async(&deck_path)
        .await?;
    let decode_duration_ms = decode_start.elapsed().as_millis() as u64;
    info!("Decoded {} slides in {}ms", slides.len(), decode_duration_ms);

    if config.cancellation.is_cancelled() {
        return Err(SlideCiteError::Cancelled { completed: 0 });
    }

    // ── Step 4: Render ───────────────────────────────────────────────────
    let converter = resolve_converter(config).await?;
    let render_start = Instant::now();
    let render = SlideRenderer::new(converter, config)
        .render_all(&deck_path)
        .await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    // ── Step 5: Cross-check slide order correspondence ───────────────────
    if config.verify_slide_count {
        verify_slide_count(slides.len(), render.remote_slide_count)?;
    } else if slides.len() != render.remote_slide_count {
        warn!(
            "Deck has {} slides but rendered presentation has {}; pairing by slide number",
            slides.len(),
            render.remote_slide_count
        );
    }

    Ok(Prepared {
        _input: resolved,
        deck_path,
        slides,
        render,
        analyzer,
        decode_duration_ms,
        render_duration_ms,
    })
}

/// Analyse one work item. Returns `None` when cancelled before starting.
pub(crate) async fn analyze_item(
    analyzer: &CitationAnalyzer,
    item: WorkItem,
    total: usize,
    config: &CheckConfig,
) -> Option<SlideReport> {
    let slide_number = item.slide.slide_number;

    let Some(png) = item.png else {
        let error = item
            .render_error
            .unwrap_or(SlideError::MissingThumbnail {
                slide: slide_number,
            });
        debug!("Slide {}: skipped ({})", slide_number, error);
        return Some(SlideReport::skipped(&item.slide, error));
    };

    if config.cancellation.is_cancelled() {
        return None;
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_slide_start(slide_number, total);
    }

    let start = Instant::now();
    let report = match analyzer.analyze(&item.slide.text_block(), &png).await {
        Ok(analysis) => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_slide_complete(slide_number, total, analysis.result.has_citations());
            }
            SlideReport {
                slide_number,
                texts: item.slide.texts,
                thumbnail: item.thumbnail,
                result: Some(analysis.result),
                input_tokens: analysis.input_tokens,
                output_tokens: analysis.output_tokens,
                duration_ms: analysis.duration_ms,
                error: None,
            }
        }
        Err(e) => {
            let detail = match &e {
                SlideCiteError::Analysis { source, .. } => source.to_string(),
                other => other.to_string(),
            };
            warn!("Slide {}: analysis failed: {}", slide_number, detail);
            if let Some(ref cb) = config.progress_callback {
                cb.on_slide_error(slide_number, total, &detail);
            }
            SlideReport {
                slide_number,
                texts: item.slide.texts,
                thumbnail: item.thumbnail,
                result: None,
                input_tokens: 0,
                output_tokens: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                error: Some(SlideError::AnalysisFailed {
                    slide: slide_number,
                    detail,
                }),
            }
        }
    };
    Some(report)
}

/// Fail when decoded and rendered slide counts differ.
pub fn verify_slide_count(decoded: usize, rendered: usize) -> Result<(), SlideCiteError> {
    if decoded == rendered {
        Ok(())
    } else {
        Err(SlideCiteError::SlideCountMismatch { decoded, rendered })
    }
}

/// Use the injected converter, or connect to Google with the configured
/// credentials.
pub async fn resolve_converter(config: &CheckConfig) -> Result<Arc<dyn SlideConverter>, SlideCiteError> {
    if let Some(ref converter) = config.converter {
        return Ok(Arc::clone(converter));
    }
    Ok(Arc::new(GoogleSlidesConverter::connect(config).await?))
}

/// Instantiate a named provider with the given model.
fn create_engine(provider_name: &str, model: &str) -> Result<Arc<dyn ReasoningEngine>, SlideCiteError> {
    let provider: Arc<dyn LLMProvider> = ProviderFactory::create_llm_provider(provider_name, model)
        .map_err(|e| SlideCiteError::EngineNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        })?;
    Ok(Arc::new(LlmEngine::new(
        provider,
        format!("{provider_name}/{model}"),
    )))
}

/// Resolve the reasoning engine, from most-specific to least-specific.
///
/// 1. **Injected engine** (`config.engine`), used as-is. Tests and the
///    server inject fakes or shared engines here.
/// 2. **Named provider + model** (`config.provider_name`), API key read from
///    the provider's usual environment variable.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_engine(config: &CheckConfig) -> Result<Arc<dyn ReasoningEngine>, SlideCiteError> {
    if let Some(ref engine) = config.engine {
        return Ok(Arc::clone(engine));
    }

    if let Some(ref name) = config.provider_name {
        return create_engine(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_engine(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_engine("openai", config.model_or_default());
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| SlideCiteError::EngineNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No reasoning engine could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(Arc::new(LlmEngine::new(provider, "auto")))
}
