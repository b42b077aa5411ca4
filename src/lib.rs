//! # slidecite
//!
//! Find figures and tables in a slide deck that look reproduced from an
//! external source without a citation, and draft APA references for them
//! with a vision-capable reasoning engine.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PPTX
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Decode   per-slide text + embedded images (ZIP/XML, spawn_blocking)
//!  ├─ 3. Render   whole-slide PNG thumbnails via Google Slides
//!  ├─ 4. Check    decoded and rendered slide counts must agree
//!  ├─ 5. Analyse  text block + image block → reasoning engine, concurrently
//!  └─ 6. Report   per-slide reference lists or the no-new-sources sentinel
//! ```
//!
//! Every reply is either a bulleted list of APA references or exactly
//! [`prompts::NO_NEW_SOURCES`]. Figures whose source already appears in
//! the slide text are excluded by the instruction sent with each request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slidecite::{check_deck, CheckConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Engine auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     // Google credentials from GOOGLE_APPLICATION_CREDENTIALS.
//!     let config = CheckConfig::default();
//!     let report = check_deck("lecture.pptx", &config).await?;
//!     println!("{}", report.reference_list());
//!     Ok(())
//! }
//! ```
//!
//! Single slide, no deck pipeline:
//!
//! ```rust,no_run
//! use slidecite::{suggest, CheckConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let png = std::fs::read("slide_3.png")?;
//! let result = suggest("Figure 1: market share", &png, &CheckConfig::default()).await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | The `POST /api/suggest` HTTP boundary (axum + tower-http) |
//! | `cli`    | on      | The `slidecite` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Library-only use:
//! ```toml
//! slidecite = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod check;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use check::{
    check_deck, check_deck_to_file, check_sync, extract_deck, render_deck, suggest,
    verify_slide_count,
};
pub use config::{CheckConfig, CheckConfigBuilder};
pub use error::{EngineError, SlideCiteError, SlideError};
pub use output::{
    AnalysisResult, CheckStats, DeckReport, ImageAsset, RenderOutput, Slide, SlideReport,
    SlideThumbnail,
};
pub use pipeline::decode::DeckDecoder;
pub use pipeline::llm::{CitationAnalyzer, ReasoningEngine};
pub use pipeline::render::{SlideConverter, SlideRenderer};
pub use progress::{CheckProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::check_stream;
