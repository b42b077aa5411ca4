//! Input resolution: normalise a user-supplied deck path or URL to a local file.
//!
//! Both the decoder and the uploader need a file-system path, so URL inputs
//! are downloaded into a `TempDir` that lives as long as the
//! [`ResolvedInput`]. Local files are checked for the ZIP local-file magic
//! before anything else touches them, so a wrong file type surfaces as
//! [`SlideCiteError::DeckOpen`] instead of a parser error deep in the run.

use crate::error::SlideCiteError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// First four bytes of every OOXML package.
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// The resolved input: either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; deck downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the deck regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local deck path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, SlideCiteError> {
    if input.trim().is_empty() {
        return Err(SlideCiteError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        validate_deck_file(Path::new(input))?;
        Ok(ResolvedInput::Local(PathBuf::from(input)))
    }
}

/// Validate that `path` exists, is readable, and starts with the ZIP magic.
pub fn validate_deck_file(path: &Path) -> Result<(), SlideCiteError> {
    let deck_open = |detail: String| SlideCiteError::DeckOpen {
        path: path.to_path_buf(),
        detail,
    };

    if !path.exists() {
        return Err(deck_open("file not found".into()));
    }
    if path.is_dir() {
        return Err(deck_open("path is a directory".into()));
    }

    let mut file = std::fs::File::open(path).map_err(|e| deck_open(e.to_string()))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == ZIP_MAGIC => {}
        Ok(()) => {
            return Err(deck_open(format!(
                "not a PPTX container (first bytes {magic:?})"
            )))
        }
        Err(_) => return Err(deck_open("file is too short to be a PPTX container".into())),
    }

    debug!("Resolved local deck: {}", path.display());
    Ok(())
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, SlideCiteError> {
    info!("Downloading deck from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SlideCiteError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            SlideCiteError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            SlideCiteError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(SlideCiteError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let temp_dir = TempDir::new().map_err(|e| SlideCiteError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| SlideCiteError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| SlideCiteError::io(&file_path, e))?;

    validate_deck_file(&file_path)?;
    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pptx".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/deck.pptx"));
        assert!(is_url("http://example.com/deck.pptx"));
        assert!(!is_url("/tmp/deck.pptx"));
        assert!(!is_url("deck.pptx"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_falls_back_for_bare_urls() {
        assert_eq!(filename_from_url("https://example.com/talks/deck.pptx"), "deck.pptx");
        assert_eq!(filename_from_url("https://example.com/download"), "downloaded.pptx");
    }

    #[test]
    fn missing_file_is_deck_open_error() {
        let err = validate_deck_file(Path::new("/definitely/not/here.pptx")).unwrap_err();
        assert!(matches!(err, SlideCiteError::DeckOpen { .. }), "got {err:?}");
    }

    #[test]
    fn non_zip_file_is_deck_open_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7 not a deck").unwrap();
        let err = validate_deck_file(f.path()).unwrap_err();
        assert!(err.to_string().contains("not a PPTX container"), "got {err}");
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = tokio_test::block_on(resolve_input("  ", 5)).err().unwrap();
        assert!(matches!(err, SlideCiteError::InvalidInput { .. }));
    }
}
