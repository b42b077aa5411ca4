//! Pipeline stages for the citation check.
//!
//! Each submodule implements one step and can be driven on its own; the
//! CLI exposes `extract`, `render` and `suggest` as separate subcommands.
//!
//! ## Data Flow
//!
//! ```text
//!                 ┌─▶ decode ───────────────┐ (texts, images, slide_texts.json)
//! input ──────────┤                         ├──▶ encode ──▶ llm
//! (URL/path)      └─▶ render ─▶ google ─────┘ (slide_{N}.png, slide_images.json)
//! ```
//!
//! 1. [`input`]   : canonicalise the user-supplied path or URL to a local deck
//! 2. [`decode`]  : split the deck into per-slide text and embedded images;
//!    synchronous ZIP/XML work run under `spawn_blocking`
//! 3. [`render`]  : whole-slide thumbnails through a [`render::SlideConverter`]
//!    ([`google`] in production)
//! 4. [`encode`]  : validate and base64 the slide PNG
//! 5. [`llm`]     : build the two-block request and call the reasoning engine
//!
//! [`manifest`] holds the atomic JSON writers and loaders shared by stages 2
//! and 3.

pub mod decode;
pub mod encode;
pub mod google;
pub mod input;
pub mod llm;
pub mod manifest;
pub mod render;
