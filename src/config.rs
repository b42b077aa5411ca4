//! Configuration for decoding, rendering and citation analysis.
//!
//! Every knob lives in [`CheckConfig`], built via [`CheckConfigBuilder`].
//! The external capabilities (reasoning engine, slide converter) and the
//! output directories are carried here explicitly instead of being process
//! globals, so each component can be constructed against fakes in tests.

use crate::error::SlideCiteError;
use crate::pipeline::llm::ReasoningEngine;
use crate::pipeline::render::SlideConverter;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1";

/// OAuth scopes requested from Google for upload + thumbnail export.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/presentations.readonly",
];

/// Configuration for a citation check.
///
/// Built via [`CheckConfig::builder()`] or using [`CheckConfig::default()`].
///
/// # Example
/// ```rust
/// use slidecite::CheckConfig;
///
/// let config = CheckConfig::builder()
///     .output_dir("out/texts")
///     .thumbnail_dir("out/thumbs")
///     .concurrency(2)
///     .model("gpt-4.1")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct CheckConfig {
    /// Content store for embedded images and `slide_texts.json`.
    /// Default: `pptx_output`.
    pub output_dir: PathBuf,

    /// Directory for `slide_{N}.png` thumbnails and `slide_images.json`.
    /// Default: `gs_slides_images`.
    pub thumbnail_dir: PathBuf,

    /// Maximum number of slides exported or analysed at once. Default: 4.
    ///
    /// Both the conversion service and the reasoning engine rate-limit per
    /// account; slides are independent so any value ≥ 1 is correct.
    pub concurrency: usize,

    /// Reasoning model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "gemini").
    /// If None along with `engine`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed reasoning engine. Takes precedence over `provider_name`.
    pub engine: Option<Arc<dyn ReasoningEngine>>,

    /// Sampling temperature. Default: 0.7.
    ///
    /// Non-zero so citation phrasing may vary; detection is driven by the
    /// instruction, not by sampling.
    pub temperature: f32,

    /// Maximum tokens the engine may generate per slide. Default: 8192.
    pub max_tokens: usize,

    /// Per-slide engine call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-request timeout against the conversion service. Default: 60.
    pub render_timeout_secs: u64,

    /// Retries for deck-level conversion calls (upload, presentation
    /// lookup). Default: 3. Auth failures are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Conversion-service credential file. If None, the
    /// `SLIDECITE_GOOGLE_ACCESS_TOKEN` and `GOOGLE_APPLICATION_CREDENTIALS`
    /// environment variables are consulted.
    pub credentials_path: Option<PathBuf>,

    /// OAuth scopes put in the service-account token grant.
    pub scopes: Vec<String>,

    /// Pre-constructed slide converter. Takes precedence over credentials.
    pub converter: Option<Arc<dyn SlideConverter>>,

    /// Fail a deck-wide check when the rendered presentation's slide count
    /// differs from the decoded deck's. Default: true.
    pub verify_slide_count: bool,

    /// Optional progress callback for per-slide analysis events.
    pub progress_callback: Option<ProgressCallback>,

    /// Checked between slides; cancelling stops before the next slide.
    pub cancellation: CancellationToken,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("pptx_output"),
            thumbnail_dir: PathBuf::from("gs_slides_images"),
            concurrency: 4,
            model: None,
            provider_name: None,
            engine: None,
            temperature: 0.7,
            max_tokens: 8192,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            render_timeout_secs: 60,
            max_retries: 3,
            retry_backoff_ms: 500,
            credentials_path: None,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            converter: None,
            verify_slide_count: true,
            progress_callback: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for CheckConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckConfig")
            .field("output_dir", &self.output_dir)
            .field("thumbnail_dir", &self.thumbnail_dir)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("engine", &self.engine.as_ref().map(|_| "<dyn ReasoningEngine>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("credentials_path", &self.credentials_path)
            .field("converter", &self.converter.as_ref().map(|_| "<dyn SlideConverter>"))
            .field("verify_slide_count", &self.verify_slide_count)
            .finish()
    }
}

impl CheckConfig {
    /// Create a new builder for `CheckConfig`.
    pub fn builder() -> CheckConfigBuilder {
        CheckConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`CheckConfig`].
#[derive(Debug)]
pub struct CheckConfigBuilder {
    config: CheckConfig,
}

impl CheckConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn thumbnail_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.thumbnail_dir = dir.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ReasoningEngine>) -> Self {
        self.config.engine = Some(engine);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.credentials_path = Some(path.into());
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn converter(mut self, converter: Arc<dyn SlideConverter>) -> Self {
        self.config.converter = Some(converter);
        self
    }

    pub fn verify_slide_count(mut self, v: bool) -> Self {
        self.config.verify_slide_count = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.config.cancellation = token;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CheckConfig, SlideCiteError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(SlideCiteError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(SlideCiteError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 || c.render_timeout_secs == 0 {
            return Err(SlideCiteError::InvalidConfig(
                "Network timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.output_dir == c.thumbnail_dir {
            return Err(SlideCiteError::InvalidConfig(format!(
                "output_dir and thumbnail_dir must differ (both '{}')",
                c.output_dir.display()
            )));
        }
        Ok(self.config)
    }
}
