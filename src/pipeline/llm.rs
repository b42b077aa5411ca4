//! Citation analysis: build the two-block request and call the reasoning engine.
//!
//! The engine is a capability behind the [`ReasoningEngine`] trait so the
//! analyzer, the deck-wide check and the HTTP handler can all run against a
//! fake in tests. [`LlmEngine`] adapts any `edgequake_llm` provider.
//!
//! ## Request layout
//!
//! Every request is single-turn and carries, in order:
//! 1. **System instruction**: [`CITATION_SYSTEM_PROMPT`], verbatim
//! 2. **Text block**: the slide's extracted text, verbatim (may be empty)
//! 3. **Image block**: the whole-slide PNG as base64
//!
//! The reply is trimmed and classified (see [`AnalysisResult`]) but never
//! rewritten. There are no retries here: an engine failure is surfaced as
//! [`SlideCiteError::Analysis`] with the engine's cause preserved.

use crate::config::CheckConfig;
use crate::error::{EngineError, SlideCiteError};
use crate::output::AnalysisResult;
use crate::pipeline::encode::{self, PNG_MEDIA_TYPE};
use crate::prompts::CITATION_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// One user content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Text(String),
    Image { media_type: String, base64: String },
}

impl ContentBlock {
    /// `data:<media_type>;base64,<payload>` for image blocks.
    pub fn data_uri(&self) -> Option<String> {
        match self {
            ContentBlock::Image { media_type, base64 } => {
                Some(format!("data:{media_type};base64,{base64}"))
            }
            ContentBlock::Text(_) => None,
        }
    }
}

/// A complete single-turn request to the reasoning engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub system: String,
    pub blocks: Vec<ContentBlock>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl AnalysisRequest {
    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(t) => Some(t.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What the engine answered, with token usage when the provider reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A vision-capable reasoning service.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Short label used in logs and errors.
    fn name(&self) -> &str;

    async fn submit(&self, request: &AnalysisRequest) -> Result<EngineReply, EngineError>;
}

/// [`ReasoningEngine`] backed by an `edgequake_llm` provider.
pub struct LlmEngine {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl LlmEngine {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }
}

#[async_trait]
impl ReasoningEngine for LlmEngine {
    fn name(&self) -> &str {
        &self.label
    }

    async fn submit(&self, request: &AnalysisRequest) -> Result<EngineReply, EngineError> {
        let images: Vec<ImageData> = request
            .blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Image { media_type, base64 } => {
                    Some(ImageData::new(base64.clone(), media_type.as_str()).with_detail("high"))
                }
                ContentBlock::Text(_) => None,
            })
            .collect();

        let messages = vec![
            ChatMessage::system(&request.system),
            ChatMessage::user_with_images(&request.text(), images),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_provider_error(&self.label, &format!("{}", e)))?;

        Ok(EngineReply {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Map a provider failure message onto an [`EngineError`] kind.
fn classify_provider_error(provider: &str, message: &str) -> EngineError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("authentication")
    {
        EngineError::Auth {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        EngineError::RateLimited {
            provider: provider.to_string(),
        }
    } else {
        EngineError::Provider(message.to_string())
    }
}

/// A classified reply plus usage, as recorded in a slide report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub result: AnalysisResult,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

/// Builds analysis requests and submits them to a [`ReasoningEngine`].
#[derive(Clone)]
pub struct CitationAnalyzer {
    engine: Arc<dyn ReasoningEngine>,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
}

impl CitationAnalyzer {
    pub fn new(engine: Arc<dyn ReasoningEngine>, config: &CheckConfig) -> Self {
        Self {
            engine,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.api_timeout_secs,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// The request for one slide: one system instruction, one text block,
    /// one image block, regardless of input size.
    pub fn build_request(&self, text: &str, png_base64: String) -> AnalysisRequest {
        AnalysisRequest {
            system: CITATION_SYSTEM_PROMPT.to_string(),
            blocks: vec![
                ContentBlock::Text(text.to_string()),
                ContentBlock::Image {
                    media_type: PNG_MEDIA_TYPE.to_string(),
                    base64: png_base64,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Analyse one slide's text and whole-slide image.
    ///
    /// `image` may be any raster format the image decoder understands; it is
    /// sent as PNG. Fails with [`SlideCiteError::InvalidImage`] before any
    /// engine call when the bytes do not decode.
    pub async fn analyze(&self, text: &str, image: &[u8]) -> Result<Analysis, SlideCiteError> {
        let png_base64 = encode::encode_png_base64(image)?;
        let request = self.build_request(text, png_base64);
        self.submit(&request).await
    }

    /// Submit a prepared request, bounded by the configured API timeout.
    pub async fn submit(&self, request: &AnalysisRequest) -> Result<Analysis, SlideCiteError> {
        let start = Instant::now();
        let reply = timeout(
            Duration::from_secs(self.timeout_secs),
            self.engine.submit(request),
        )
        .await
        .map_err(|_| EngineError::Timeout {
            secs: self.timeout_secs,
        })
        .and_then(|r| r)
        .map_err(|source| {
            warn!("Engine '{}' failed: {}", self.engine.name(), source);
            SlideCiteError::Analysis { source }
        })?;

        let result =
            AnalysisResult::from_response(&reply.content).ok_or(SlideCiteError::Analysis {
                source: EngineError::EmptyResponse,
            })?;

        let duration = start.elapsed();
        debug!(
            "{} input tokens, {} output tokens, {:?}, citations: {}",
            reply.input_tokens,
            reply.output_tokens,
            duration,
            result.has_citations()
        );

        Ok(Analysis {
            result,
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            duration_ms: duration.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::NO_NEW_SOURCES;
    use std::sync::Mutex;

    fn tiny_png() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::new(1, 1));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    struct ScriptedEngine {
        reply: Result<String, EngineError>,
        seen: Mutex<Vec<AnalysisRequest>>,
    }

    impl ScriptedEngine {
        fn new(reply: Result<String, EngineError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn submit(&self, request: &AnalysisRequest) -> Result<EngineReply, EngineError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone().map(|content| EngineReply {
                content,
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    struct SlowEngine;

    #[async_trait]
    impl ReasoningEngine for SlowEngine {
        fn name(&self) -> &str {
            "slow"
        }

        async fn submit(&self, _request: &AnalysisRequest) -> Result<EngineReply, EngineError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(EngineReply::default())
        }
    }

    fn analyzer(engine: Arc<dyn ReasoningEngine>) -> CitationAnalyzer {
        CitationAnalyzer::new(engine, &CheckConfig::default())
    }

    #[test]
    fn request_has_two_blocks_and_one_instruction() {
        let a = analyzer(ScriptedEngine::new(Ok(String::new())));
        let long_text = "図1 ".repeat(5000);
        let req = a.build_request(&long_text, "AAAA".into());
        assert_eq!(req.blocks.len(), 2);
        assert_eq!(req.system, CITATION_SYSTEM_PROMPT);
        assert_eq!(req.blocks[0], ContentBlock::Text(long_text));
        assert_eq!(
            req.blocks[1].data_uri().as_deref(),
            Some("data:image/png;base64,AAAA")
        );
        assert_eq!(req.max_tokens, 8192);
    }

    #[tokio::test]
    async fn sentinel_reply_passes_through() {
        let engine = ScriptedEngine::new(Ok(format!("\n{NO_NEW_SOURCES}  ")));
        let a = analyzer(engine.clone());
        let out = a.analyze("(Smith, 2020)", &tiny_png()).await.unwrap();
        assert_eq!(out.result, AnalysisResult::NoNewSources);
        assert_eq!(out.input_tokens, 10);

        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].text(), "(Smith, 2020)");
    }

    #[tokio::test]
    async fn engine_failure_keeps_cause() {
        let a = analyzer(ScriptedEngine::new(Err(EngineError::RateLimited {
            provider: "scripted".into(),
        })));
        let err = a.analyze("", &tiny_png()).await.unwrap_err();
        match err {
            SlideCiteError::Analysis { source, .. } => {
                assert!(matches!(source, EngineError::RateLimited { .. }))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_reply_is_an_error() {
        let a = analyzer(ScriptedEngine::new(Ok("   ".into())));
        let err = a.analyze("", &tiny_png()).await.unwrap_err();
        assert!(matches!(
            err,
            SlideCiteError::Analysis {
                source: EngineError::EmptyResponse,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_image_never_reaches_engine() {
        let engine = ScriptedEngine::new(Ok("- ref".into()));
        let a = analyzer(engine.clone());
        let err = a.analyze("text", b"not an image").await.unwrap_err();
        assert!(matches!(err, SlideCiteError::InvalidImage { .. }));
        assert!(engine.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_engine_times_out() {
        let config = CheckConfig::builder().api_timeout_secs(2).build().unwrap();
        let a = CitationAnalyzer::new(Arc::new(SlowEngine), &config);
        let err = a.analyze("", &tiny_png()).await.unwrap_err();
        assert!(matches!(
            err,
            SlideCiteError::Analysis {
                source: EngineError::Timeout { secs: 2 },
                ..
            }
        ));
    }

    #[test]
    fn provider_errors_are_classified() {
        assert!(matches!(
            classify_provider_error("openai", "HTTP 401 Unauthorized"),
            EngineError::Auth { .. }
        ));
        assert!(matches!(
            classify_provider_error("openai", "429 Too Many Requests"),
            EngineError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_provider_error("openai", "connection reset"),
            EngineError::Provider(_)
        ));
    }
}
