//! JSON manifests written next to the pipeline's artefacts.
//!
//! * `slide_texts.json`: array of `{slide_number, texts, images}` objects,
//!   one per slide in deck order (see [`crate::output::Slide`]).
//! * `slide_images.json`: array of thumbnail paths, one per successfully
//!   exported slide, in slide order.
//!
//! Both are written pretty-printed through a temp file in the destination
//! directory that is then renamed over the target, so a reader never sees
//! a half-written manifest and a rerun replaces the previous one whole.

use crate::error::SlideCiteError;
use crate::output::{Slide, SlideThumbnail};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Serialise `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SlideCiteError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| SlideCiteError::Internal(format!("manifest serialisation: {e}")))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| SlideCiteError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| SlideCiteError::io(dir, e))?;
    tmp.write_all(&json).map_err(|e| SlideCiteError::io(path, e))?;
    tmp.write_all(b"\n").map_err(|e| SlideCiteError::io(path, e))?;
    tmp.persist(path).map_err(|e| SlideCiteError::io(path, e.error))?;
    Ok(())
}

/// Read back a `slide_texts.json` manifest.
pub fn load_slide_texts(path: &Path) -> Result<Vec<Slide>, SlideCiteError> {
    let bytes = std::fs::read(path).map_err(|e| SlideCiteError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| SlideCiteError::DeckOpen {
        path: path.to_path_buf(),
        detail: format!("malformed slide_texts manifest: {e}"),
    })
}

/// Read back a `slide_images.json` manifest.
///
/// Slide numbers are recovered from the `slide_{N}.png` file names; entries
/// that do not follow that pattern are ignored. PNG bytes are not loaded.
pub fn load_slide_images(path: &Path) -> Result<Vec<SlideThumbnail>, SlideCiteError> {
    let bytes = std::fs::read(path).map_err(|e| SlideCiteError::io(path, e))?;
    let paths: Vec<PathBuf> =
        serde_json::from_slice(&bytes).map_err(|e| SlideCiteError::RenderFailed {
            stage: "manifest".into(),
            detail: format!("malformed slide_images manifest '{}': {e}", path.display()),
        })?;

    let mut thumbnails: Vec<SlideThumbnail> = paths
        .into_iter()
        .filter_map(|p| {
            let slide_number = thumbnail_slide_number(&p)?;
            Some(SlideThumbnail {
                slide_number,
                path: p,
                png: Vec::new(),
            })
        })
        .collect();
    thumbnails.sort_by_key(|t| t.slide_number);
    Ok(thumbnails)
}

fn thumbnail_slide_number(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix("slide_")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ImageAsset;

    #[test]
    fn slide_texts_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide_texts.json");
        let mut slide = Slide::new(1);
        slide.texts.push("Title".into());
        slide.images.push(ImageAsset::new(dir.path(), 1, 1, "png"));

        write_json_atomic(&path, &vec![slide.clone()]).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  "), "manifest is pretty-printed");

        assert_eq!(load_slide_texts(&path).unwrap(), vec![slide]);
    }

    #[test]
    fn rewrite_replaces_previous_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide_images.json");
        write_json_atomic(&path, &["a/slide_1.png", "a/slide_2.png"]).unwrap();
        write_json_atomic(&path, &["a/slide_2.png"]).unwrap();

        let thumbs = load_slide_images(&path).unwrap();
        assert_eq!(thumbs.len(), 1);
        assert_eq!(thumbs[0].slide_number, 2);

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "no temp files left behind");
    }

    #[test]
    fn thumbnail_numbers_come_from_file_names() {
        assert_eq!(thumbnail_slide_number(Path::new("x/slide_12.png")), Some(12));
        assert_eq!(thumbnail_slide_number(Path::new("x/slide12.png")), None);
        assert_eq!(thumbnail_slide_number(Path::new("x/slide_1.jpg")), None);
    }

    #[test]
    fn missing_manifest_is_io_error() {
        let err = load_slide_texts(Path::new("/no/such/slide_texts.json")).unwrap_err();
        assert!(matches!(err, SlideCiteError::Io { .. }));
    }
}
