//! Progress-callback trait for per-slide analysis events.
//!
//! Inject an [`Arc<dyn CheckProgressCallback>`] via
//! [`crate::config::CheckConfigBuilder::progress_callback`] to receive
//! events as a deck-wide check analyses each slide. The CLI drives its
//! progress bar from these; a server could forward them to a websocket.
//!
//! # Example
//!
//! ```rust
//! use slidecite::{CheckConfig, CheckProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     flagged: AtomicUsize,
//! }
//!
//! impl CheckProgressCallback for CountingCallback {
//!     fn on_slide_complete(&self, _slide: usize, _total: usize, has_citations: bool) {
//!         if has_citations {
//!             self.flagged.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { flagged: AtomicUsize::new(0) });
//! let config = CheckConfig::builder()
//!     .progress_callback(counter as Arc<dyn CheckProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the check pipeline as it analyses each slide.
///
/// Slides are analysed concurrently, so `on_slide_*` may be called from
/// several tasks at once. All methods default to no-ops.
pub trait CheckProgressCallback: Send + Sync {
    /// Called once before the first slide is sent to the engine.
    ///
    /// `total_slides` counts the slides that have a thumbnail.
    fn on_check_start(&self, total_slides: usize) {
        let _ = total_slides;
    }

    /// Called just before the engine request for a slide.
    fn on_slide_start(&self, slide_number: usize, total_slides: usize) {
        let _ = (slide_number, total_slides);
    }

    /// Called when the engine answered for a slide.
    ///
    /// `has_citations` is false when the reply was the no-new-sources sentinel.
    fn on_slide_complete(&self, slide_number: usize, total_slides: usize, has_citations: bool) {
        let _ = (slide_number, total_slides, has_citations);
    }

    /// Called when the engine call for a slide failed.
    fn on_slide_error(&self, slide_number: usize, total_slides: usize, error: &str) {
        let _ = (slide_number, total_slides, error);
    }

    /// Called once after every slide has been attempted.
    fn on_check_complete(&self, total_slides: usize, success_count: usize) {
        let _ = (total_slides, success_count);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl CheckProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::CheckConfig`].
pub type ProgressCallback = Arc<dyn CheckProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        flagged: AtomicUsize,
        clean: AtomicUsize,
        errors: AtomicUsize,
    }

    impl CheckProgressCallback for TrackingCallback {
        fn on_slide_start(&self, _slide: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_slide_complete(&self, _slide: usize, _total: usize, has_citations: bool) {
            if has_citations {
                self.flagged.fetch_add(1, Ordering::SeqCst);
            } else {
                self.clean.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_slide_error(&self, _slide: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_check_start(3);
        cb.on_slide_start(1, 3);
        cb.on_slide_complete(1, 3, true);
        cb.on_slide_error(2, 3, "timeout");
        cb.on_check_complete(3, 2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_slide_start(1, 3);
        tracker.on_slide_complete(1, 3, true);
        tracker.on_slide_start(2, 3);
        tracker.on_slide_complete(2, 3, false);
        tracker.on_slide_start(3, 3);
        tracker.on_slide_error(3, 3, "rate limited");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.flagged.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.clean.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
