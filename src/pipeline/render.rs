//! SlideRenderer: whole-slide PNG thumbnails via a remote conversion service.
//!
//! The deck is uploaded once, the remote presentation's slide objects are
//! listed in presentation order, and each slide is exported as a large PNG
//! and written to `thumbnail_dir/slide_{N}.png`. The remote side sits behind
//! the [`SlideConverter`] trait; [`crate::pipeline::google`] is the
//! production implementation.
//!
//! ## Failure policy
//!
//! * Deck-level steps (upload, slide listing) are retried with exponential
//!   backoff (`retry_backoff_ms * 2^attempt`) and fail the run with
//!   [`SlideCiteError::RenderFailed`] once retries are exhausted.
//! * A single slide's export failure is logged and recorded as
//!   [`SlideError::RenderExport`]; that slide is absent from the thumbnails
//!   and the manifest, the rest of the deck carries on.
//! * [`SlideCiteError::RenderAuth`] is never retried and aborts the run
//!   wherever it occurs.

use crate::config::CheckConfig;
use crate::error::{SlideCiteError, SlideError};
use crate::output::{RenderOutput, SlideThumbnail};
use crate::pipeline::{input, manifest};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// File name of the thumbnail manifest.
pub const SLIDE_IMAGES_MANIFEST: &str = "slide_images.json";

/// Remote service that turns a deck into a presentation and exports
/// per-slide thumbnails.
///
/// Implementations report rejected credentials as
/// [`SlideCiteError::RenderAuth`] and every other remote failure as
/// [`SlideCiteError::RenderFailed`].
#[async_trait]
pub trait SlideConverter: Send + Sync {
    /// Upload the deck and return the remote presentation identifier.
    async fn upload(&self, deck_path: &Path) -> Result<String, SlideCiteError>;

    /// Slide object identifiers of the presentation, in presentation order.
    async fn slide_ids(&self, presentation_id: &str) -> Result<Vec<String>, SlideCiteError>;

    /// Large PNG thumbnail of one slide.
    async fn export_thumbnail(
        &self,
        presentation_id: &str,
        slide_object_id: &str,
    ) -> Result<Vec<u8>, SlideCiteError>;
}

/// Drives a [`SlideConverter`] over a whole deck.
#[derive(Clone)]
pub struct SlideRenderer {
    converter: Arc<dyn SlideConverter>,
    thumbnail_dir: PathBuf,
    concurrency: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    cancellation: CancellationToken,
}

/// Outcome of one slide's export.
enum Export {
    Done(SlideThumbnail),
    Failed(SlideError),
    Fatal(SlideCiteError),
    Cancelled,
}

impl SlideRenderer {
    pub fn new(converter: Arc<dyn SlideConverter>, config: &CheckConfig) -> Self {
        Self {
            converter,
            thumbnail_dir: config.thumbnail_dir.clone(),
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            cancellation: config.cancellation.clone(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.thumbnail_dir.join(SLIDE_IMAGES_MANIFEST)
    }

    /// Render every slide of the deck.
    ///
    /// Returns the thumbnails that were exported, sorted by slide number,
    /// plus the per-slide failures. The manifest is written once, after
    /// every slide has been attempted.
    pub async fn render_all(&self, deck_path: &Path) -> Result<RenderOutput, SlideCiteError> {
        input::validate_deck_file(deck_path)?;
        tokio::fs::create_dir_all(&self.thumbnail_dir)
            .await
            .map_err(|e| SlideCiteError::io(&self.thumbnail_dir, e))?;

        let presentation_id = self
            .with_retry("upload", || self.converter.upload(deck_path))
            .await?;
        info!("Uploaded deck as presentation {}", presentation_id);

        let slide_ids = self
            .with_retry("presentation lookup", || {
                self.converter.slide_ids(&presentation_id)
            })
            .await?;
        let total = slide_ids.len();
        info!("Presentation has {} slides", total);

        let outcomes: Vec<Export> = stream::iter(slide_ids.iter().enumerate().map(|(idx, object_id)| {
            let slide_number = idx + 1;
            let presentation_id = presentation_id.as_str();
            async move { self.export_one(presentation_id, object_id, slide_number).await }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let mut thumbnails = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut cancelled = false;
        for outcome in outcomes {
            match outcome {
                Export::Done(thumb) => thumbnails.push(thumb),
                Export::Failed(err) => failures.push(err),
                Export::Fatal(err) => return Err(err),
                Export::Cancelled => cancelled = true,
            }
        }
        if cancelled {
            return Err(SlideCiteError::Cancelled {
                completed: thumbnails.len(),
            });
        }

        thumbnails.sort_by_key(|t| t.slide_number);
        failures.sort_by_key(SlideError::slide);

        let manifest_path = self.manifest_path();
        let paths: Vec<&Path> = thumbnails.iter().map(|t| t.path.as_path()).collect();
        manifest::write_json_atomic(&manifest_path, &paths)?;

        info!(
            "Rendered {}/{} slides ({} failed)",
            thumbnails.len(),
            total,
            failures.len()
        );

        Ok(RenderOutput {
            presentation_id,
            remote_slide_count: total,
            thumbnails,
            failures,
            manifest_path,
        })
    }

    async fn export_one(&self, presentation_id: &str, object_id: &str, slide_number: usize) -> Export {
        if self.cancellation.is_cancelled() {
            return Export::Cancelled;
        }

        let png = match self
            .converter
            .export_thumbnail(presentation_id, object_id)
            .await
        {
            Ok(png) => png,
            Err(e @ SlideCiteError::RenderAuth { .. }) => return Export::Fatal(e),
            Err(e) => {
                warn!("Slide {}: thumbnail export failed: {}", slide_number, e);
                return Export::Failed(SlideError::RenderExport {
                    slide: slide_number,
                    detail: e.to_string(),
                });
            }
        };

        let path = self.thumbnail_dir.join(SlideThumbnail::file_name(slide_number));
        if let Err(e) = tokio::fs::write(&path, &png).await {
            return Export::Fatal(SlideCiteError::io(&path, e));
        }
        debug!("Slide {}: wrote {} ({} bytes)", slide_number, path.display(), png.len());

        Export::Done(SlideThumbnail {
            slide_number,
            path,
            png,
        })
    }

    async fn with_retry<T, F, Fut>(&self, stage: &str, mut op: F) -> Result<T, SlideCiteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SlideCiteError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e @ SlideCiteError::RenderAuth { .. }) => return Err(e),
                Err(e) if attempt >= self.max_retries => {
                    return Err(match e {
                        SlideCiteError::RenderFailed { .. } => e,
                        other => SlideCiteError::RenderFailed {
                            stage: stage.to_string(),
                            detail: other.to_string(),
                        },
                    })
                }
                Err(e) => {
                    attempt += 1;
                    let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                    warn!(
                        "{}: retry {}/{} after {}ms ({})",
                        stage, attempt, self.max_retries, backoff, e
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the upload `failures` times, then succeeds.
    struct FlakyUpload {
        failures: u32,
        calls: AtomicU32,
        auth: bool,
    }

    #[async_trait]
    impl SlideConverter for FlakyUpload {
        async fn upload(&self, _deck: &Path) -> Result<String, SlideCiteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.auth {
                return Err(SlideCiteError::RenderAuth {
                    detail: "HTTP 401".into(),
                });
            }
            if n < self.failures {
                Err(SlideCiteError::RenderFailed {
                    stage: "upload".into(),
                    detail: "HTTP 503".into(),
                })
            } else {
                Ok("pres-1".into())
            }
        }

        async fn slide_ids(&self, _id: &str) -> Result<Vec<String>, SlideCiteError> {
            Ok(vec!["p1".into()])
        }

        async fn export_thumbnail(&self, _id: &str, _obj: &str) -> Result<Vec<u8>, SlideCiteError> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    fn renderer(converter: Arc<dyn SlideConverter>, dir: &Path) -> SlideRenderer {
        let config = CheckConfig::builder()
            .thumbnail_dir(dir)
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap();
        SlideRenderer::new(converter, &config)
    }

    fn fake_deck(dir: &Path) -> PathBuf {
        let path = dir.join("deck.pptx");
        std::fs::write(&path, b"PK\x03\x04rest-of-zip").unwrap();
        path
    }

    #[tokio::test]
    async fn transient_upload_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let conv = Arc::new(FlakyUpload {
            failures: 2,
            calls: AtomicU32::new(0),
            auth: false,
        });
        let out = renderer(conv.clone(), &dir.path().join("thumbs"))
            .render_all(&fake_deck(dir.path()))
            .await
            .unwrap();
        assert_eq!(conv.calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.thumbnails.len(), 1);
        assert!(out.manifest_path.exists());
    }

    #[tokio::test]
    async fn upload_gives_up_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let conv = Arc::new(FlakyUpload {
            failures: 10,
            calls: AtomicU32::new(0),
            auth: false,
        });
        let err = renderer(conv.clone(), &dir.path().join("thumbs"))
            .render_all(&fake_deck(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SlideCiteError::RenderFailed { .. }));
        assert_eq!(conv.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let conv = Arc::new(FlakyUpload {
            failures: 0,
            calls: AtomicU32::new(0),
            auth: true,
        });
        let err = renderer(conv.clone(), &dir.path().join("thumbs"))
            .render_all(&fake_deck(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SlideCiteError::RenderAuth { .. }));
        assert_eq!(conv.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_deck_is_rejected_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let conv = Arc::new(FlakyUpload {
            failures: 0,
            calls: AtomicU32::new(0),
            auth: false,
        });
        let err = renderer(conv.clone(), dir.path())
            .render_all(&dir.path().join("missing.pptx"))
            .await
            .unwrap_err();
        assert!(matches!(err, SlideCiteError::DeckOpen { .. }));
        assert_eq!(conv.calls.load(Ordering::SeqCst), 0);
    }
}
