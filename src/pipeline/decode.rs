//! DeckDecoder: split a PPTX deck into per-slide text and embedded images.
//!
//! A PPTX file is a ZIP archive of OOXML parts. Slide order comes from
//! `p:sldIdLst` in `ppt/presentation.xml`, resolved through
//! `ppt/_rels/presentation.xml.rels`; that is the deck's native order and
//! the order the conversion service uses when rendering thumbnails.
//!
//! Within a slide the shape tree is walked in document (z-)order. Group
//! shapes are flattened in place. Each text-bearing `p:sp` contributes one
//! entry to [`Slide::texts`]; each `p:pic` has its media part copied to the
//! content store as `slide{N}_img{K}.{ext}`.
//!
//! Shape text uses the same layout as python-pptx's `shape.text`, so
//! manifests from either tool compare equal: every paragraph is kept (empty
//! ones included) and joined with `\n`, a soft line break (`a:br`) is a
//! vertical tab (`\v`), and the result is trimmed. Shapes whose text is
//! blank after trimming are dropped.
//!
//! Parsing is synchronous CPU/disk work, so [`DeckDecoder::decompose_async`]
//! runs it under `spawn_blocking`.

use crate::config::CheckConfig;
use crate::error::SlideCiteError;
use crate::output::{ImageAsset, Slide};
use crate::pipeline::{input, manifest};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// File name of the aggregate text/image manifest.
pub const SLIDE_TEXTS_MANIFEST: &str = "slide_texts.json";

const PRESENTATION_PART: &str = "ppt/presentation.xml";
const PRESENTATION_RELS: &str = "ppt/_rels/presentation.xml.rels";

/// Soft line break inside a paragraph.
const LINE_BREAK: char = '\u{000B}';

/// Extracts slides from a deck into a content store.
#[derive(Debug, Clone)]
pub struct DeckDecoder {
    output_dir: PathBuf,
}

impl DeckDecoder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &CheckConfig) -> Self {
        Self::new(&config.output_dir)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where `slide_texts.json` is written.
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(SLIDE_TEXTS_MANIFEST)
    }

    /// Decompose the deck, write embedded images and the manifest.
    ///
    /// The manifest is written only after every slide succeeded. A failure
    /// midway leaves already-extracted images on disk without a manifest;
    /// callers must treat a missing manifest as an incomplete run.
    pub fn decompose(&self, deck_path: &Path) -> Result<Vec<Slide>, SlideCiteError> {
        input::validate_deck_file(deck_path)?;

        let file = File::open(deck_path).map_err(|e| deck_open(deck_path, e.to_string()))?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| deck_open(deck_path, format!("invalid ZIP container: {e}")))?;

        let slide_parts = slide_order(&mut archive).map_err(|d| deck_open(deck_path, d))?;
        info!("Deck has {} slides", slide_parts.len());

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| SlideCiteError::io(&self.output_dir, e))?;

        let mut slides = Vec::with_capacity(slide_parts.len());
        for (idx, part) in slide_parts.iter().enumerate() {
            let slide = self.decode_slide(&mut archive, deck_path, part, idx + 1)?;
            debug!(
                "Slide {}: {} text shapes, {} images",
                slide.slide_number,
                slide.texts.len(),
                slide.images.len()
            );
            slides.push(slide);
        }

        manifest::write_json_atomic(&self.manifest_path(), &slides)?;
        info!("Wrote {}", self.manifest_path().display());

        Ok(slides)
    }

    /// [`Self::decompose`] on the blocking thread pool.
    pub async fn decompose_async(&self, deck_path: &Path) -> Result<Vec<Slide>, SlideCiteError> {
        let decoder = self.clone();
        let path = deck_path.to_path_buf();
        tokio::task::spawn_blocking(move || decoder.decompose(&path))
            .await
            .map_err(|e| SlideCiteError::Internal(format!("Decode task panicked: {e}")))?
    }

    fn decode_slide<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        deck_path: &Path,
        part: &str,
        slide_number: usize,
    ) -> Result<Slide, SlideCiteError> {
        let xml = read_part_string(archive, part).map_err(|d| deck_open(deck_path, d))?;
        let rels = match read_part_string(archive, &rels_path_for(part)) {
            Ok(content) => parse_relationships(&content, parent_dir(part))
                .map_err(|d| deck_open(deck_path, d))?,
            Err(_) => HashMap::new(),
        };

        let shapes = parse_shapes(&xml).map_err(|d| deck_open(deck_path, format!("{part}: {d}")))?;

        let mut slide = Slide::new(slide_number);
        for shape in shapes {
            match shape {
                Shape::Text(text) => slide.texts.push(text),
                Shape::Picture { embed } => {
                    let Some(target) = rels.get(&embed) else {
                        warn!("Slide {slide_number}: picture relationship '{embed}' not found, skipped");
                        continue;
                    };
                    let bytes = match read_part_bytes(archive, target) {
                        Ok(b) => b,
                        Err(detail) => {
                            warn!("Slide {slide_number}: {detail}, picture skipped");
                            continue;
                        }
                    };
                    let asset = ImageAsset::new(
                        &self.output_dir,
                        slide_number,
                        slide.images.len() + 1,
                        &extension_of(target),
                    );
                    std::fs::write(&asset.path, &bytes)
                        .map_err(|e| SlideCiteError::io(&asset.path, e))?;
                    slide.images.push(asset);
                }
            }
        }

        Ok(slide)
    }
}

fn deck_open(path: &Path, detail: String) -> SlideCiteError {
    SlideCiteError::DeckOpen {
        path: path.to_path_buf(),
        detail,
    }
}

// ── Package structure ────────────────────────────────────────────────────

/// Slide part names in presentation order.
fn slide_order<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<String>, String> {
    let presentation = read_part_string(archive, PRESENTATION_PART)?;
    let rels = parse_relationships(&read_part_string(archive, PRESENTATION_RELS)?, "ppt")?;

    let mut reader = Reader::from_str(&presentation);
    let mut order = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if local_name(e.name().as_ref()) == b"sldId" =>
            {
                let rid = relationship_attribute(e, b"id")
                    .ok_or_else(|| "p:sldId without r:id".to_string())?;
                let part = rels
                    .get(&rid)
                    .ok_or_else(|| format!("slide relationship '{rid}' missing"))?;
                order.push(part.clone());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("{PRESENTATION_PART}: {e}")),
            _ => {}
        }
    }
    Ok(order)
}

/// Parse a `.rels` part into `Id → resolved part name`.
///
/// External targets (hyperlinks, linked pictures) are skipped.
fn parse_relationships(xml: &str, base_dir: &str) -> Result<HashMap<String, String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut rels = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if local_name(e.name().as_ref()) == b"Relationship" =>
            {
                if attribute(e, b"TargetMode").as_deref() == Some("External") {
                    continue;
                }
                if let (Some(id), Some(target)) =
                    (attribute(e, b"Id"), attribute(e, b"Target"))
                {
                    rels.insert(id, resolve_part(base_dir, &target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("error parsing relationships: {e}")),
            _ => {}
        }
    }

    Ok(rels)
}

// ── Shape tree ───────────────────────────────────────────────────────────

/// A content-bearing shape, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Shape {
    /// Trimmed, non-empty text of a `p:sp`.
    Text(String),
    /// A `p:pic` and the relationship id of its image.
    Picture { embed: String },
}

/// The shape currently being read and the depth it was opened at.
enum Open {
    Text {
        depth: usize,
        paragraphs: Vec<String>,
        paragraph: String,
        in_run_text: bool,
    },
    Picture {
        depth: usize,
        embed: Option<String>,
    },
    /// Connectors, graphic frames, content parts: no text, no picture.
    Opaque { depth: usize },
}

impl Open {
    fn depth(&self) -> usize {
        match self {
            Open::Text { depth, .. } | Open::Picture { depth, .. } | Open::Opaque { depth } => {
                *depth
            }
        }
    }
}

fn parse_shapes(xml: &str) -> Result<Vec<Shape>, String> {
    let mut reader = Reader::from_str(xml);
    let mut shapes = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<Open> = None;
    // `mc:Fallback` duplicates the preceding `mc:Choice`; its subtree is ignored.
    let mut skip_until: Option<usize> = None;

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        match event {
            Event::Start(ref e) => {
                depth += 1;
                if skip_until.is_some() {
                    continue;
                }
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"Fallback" {
                    skip_until = Some(depth);
                    continue;
                }
                match open.as_mut() {
                    None => {
                        open = match local {
                            b"sp" => Some(Open::Text {
                                depth,
                                paragraphs: Vec::new(),
                                paragraph: String::new(),
                                in_run_text: false,
                            }),
                            b"pic" => Some(Open::Picture { depth, embed: None }),
                            b"cxnSp" | b"graphicFrame" | b"contentPart" => {
                                Some(Open::Opaque { depth })
                            }
                            _ => None,
                        };
                    }
                    Some(Open::Text {
                        paragraph,
                        in_run_text,
                        ..
                    }) => match local {
                        b"p" => paragraph.clear(),
                        b"t" => *in_run_text = true,
                        b"br" => paragraph.push(LINE_BREAK),
                        _ => {}
                    },
                    Some(Open::Picture { embed, .. }) => {
                        if local == b"blip" && embed.is_none() {
                            *embed = relationship_attribute(e, b"embed");
                        }
                    }
                    Some(Open::Opaque { .. }) => {}
                }
            }
            Event::Empty(ref e) => {
                if skip_until.is_some() {
                    continue;
                }
                let name = e.name();
                let local = local_name(name.as_ref());
                match open.as_mut() {
                    Some(Open::Text { paragraph, .. }) if local == b"br" => {
                        paragraph.push(LINE_BREAK)
                    }
                    Some(Open::Text { paragraphs, .. }) if local == b"p" => {
                        paragraphs.push(String::new())
                    }
                    Some(Open::Picture { embed, .. }) if local == b"blip" && embed.is_none() => {
                        *embed = relationship_attribute(e, b"embed");
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if skip_until.is_some() {
                    continue;
                }
                if let Some(Open::Text {
                    paragraph,
                    in_run_text: true,
                    ..
                }) = open.as_mut()
                {
                    let text = t.unescape().map_err(|e| e.to_string())?;
                    paragraph.push_str(&text);
                }
            }
            Event::End(ref e) => {
                if let Some(level) = skip_until {
                    if depth == level {
                        skip_until = None;
                    }
                    depth -= 1;
                    continue;
                }

                let closes_shape = open.as_ref().map(Open::depth) == Some(depth);
                if closes_shape {
                    match open.take() {
                        Some(Open::Text { paragraphs, .. }) => {
                            let text = paragraphs.join("\n").trim().to_string();
                            if !text.is_empty() {
                                shapes.push(Shape::Text(text));
                            }
                        }
                        Some(Open::Picture {
                            embed: Some(embed), ..
                        }) => shapes.push(Shape::Picture { embed }),
                        _ => {}
                    }
                } else if let Some(Open::Text {
                    paragraphs,
                    paragraph,
                    in_run_text,
                    ..
                }) = open.as_mut()
                {
                    let name = e.name();
                    match local_name(name.as_ref()) {
                        b"t" => *in_run_text = false,
                        b"p" => paragraphs.push(std::mem::take(paragraph)),
                        _ => {}
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(shapes)
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Extract the local name from a potentially namespaced XML name.
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().position(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Value of the unprefixed attribute `key`.
fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

/// Value of a relationship reference such as `r:id` or `r:embed`.
///
/// Only prefixed attributes match: `p:sldId` also carries a plain `id`
/// (the slide's numeric id), which must not be taken for `r:id`.
fn relationship_attribute(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| {
            let name = attr.key.as_ref();
            name.contains(&b':') && local_name(name) == local
        })
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

/// `ppt/slides/slide1.xml` → `ppt/slides/_rels/slide1.xml.rels`.
fn rels_path_for(part: &str) -> String {
    let (dir, file) = part.rsplit_once('/').unwrap_or(("", part));
    if dir.is_empty() {
        format!("_rels/{file}.rels")
    } else {
        format!("{dir}/_rels/{file}.rels")
    }
}

fn parent_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolve a relationship target against the source part's directory.
fn resolve_part(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Native extension of a media part, lowercased; `jpeg` is reported as `jpg`.
fn extension_of(part: &str) -> String {
    let ext = Path::new(part)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "bin".to_string());
    match ext.as_str() {
        "jpeg" => "jpg".to_string(),
        _ => ext,
    }
}

fn read_part_string<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<String, String> {
    let bytes = read_part_bytes(archive, path)?;
    String::from_utf8(bytes).map_err(|e| format!("'{path}' is not UTF-8: {e}"))
}

fn read_part_bytes<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<Vec<u8>, String> {
    let mut file = archive
        .by_name(path)
        .map_err(|e| format!("part '{path}' not found in archive: {e}"))?;
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)
        .map_err(|e| format!("failed to read '{path}': {e}"))?;
    Ok(buf)
}
