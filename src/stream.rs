//! Streaming check API: emit slide reports as they complete.
//!
//! Unlike the eager [`crate::check::check_deck`] which returns only after
//! every slide was analysed, [`check_stream`] decodes and renders the deck
//! up front and then yields one [`SlideReport`] per slide as each analysis
//! finishes. Reports arrive in completion order; sort by `slide_number` if
//! order matters.
//!
//! Slides without a thumbnail are yielded immediately as skipped reports.
//! Once the config's cancellation token fires, slides that have not started
//! are no longer emitted and the stream ends.

use crate::check::{self, analyze_item};
use crate::config::CheckConfig;
use crate::error::SlideCiteError;
use crate::output::SlideReport;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of slide reports.
pub type SlideStream = Pin<Box<dyn Stream<Item = SlideReport> + Send>>;

/// Check a deck, streaming slide reports as they are ready.
///
/// # Returns
/// - `Ok(SlideStream)`: per-slide reports; failed slides carry `error`
/// - `Err(SlideCiteError)`: fatal error before analysis started (deck
///   malformed, credentials rejected, slide count mismatch, …)
pub async fn check_stream(
    input: impl AsRef<str>,
    config: &CheckConfig,
) -> Result<SlideStream, SlideCiteError> {
    let prepared = Arc::new(check::prepare(input.as_ref(), config).await?);
    let work = prepared.work_items();
    let total = work.iter().filter(|w| w.png.is_some()).count();
    info!("Streaming analysis of {} slides", total);

    if let Some(ref cb) = config.progress_callback {
        cb.on_check_start(total);
    }

    let config = Arc::new(config.clone());
    let concurrency = config.concurrency.max(1);

    let s = stream::iter(work.into_iter().map(move |item| {
        // Holding `prepared` keeps a downloaded deck alive for the stream's lifetime.
        let prepared = Arc::clone(&prepared);
        let config = Arc::clone(&config);
        async move { analyze_item(&prepared.analyzer, item, total, &config).await }
    }))
    .buffer_unordered(concurrency)
    .take_while(|report| futures::future::ready(report.is_some()))
    .filter_map(futures::future::ready);

    Ok(Box::pin(s))
}
