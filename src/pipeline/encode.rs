//! Image encoding for the analysis request.
//!
//! Engines accept the slide picture as base64 PNG inside the JSON body.
//! Thumbnails from the conversion service are already PNG and are passed
//! through untouched; anything else the HTTP boundary receives (a JPEG
//! pasted by a client) is decoded and re-encoded as PNG first.

use crate::error::SlideCiteError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Media type every encoded image carries.
pub const PNG_MEDIA_TYPE: &str = "image/png";

/// Validate raster bytes and return them as base64 PNG.
///
/// Fails with [`SlideCiteError::InvalidImage`] when the bytes are empty or
/// cannot be decoded as an image.
pub fn encode_png_base64(bytes: &[u8]) -> Result<String, SlideCiteError> {
    if bytes.is_empty() {
        return Err(invalid("image is empty"));
    }

    let format = image::guess_format(bytes).map_err(|e| invalid(e.to_string()))?;
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| invalid(e.to_string()))?;

    let b64 = if format == ImageFormat::Png {
        STANDARD.encode(bytes)
    } else {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| invalid(e.to_string()))?;
        debug!("Transcoded {:?} {}x{} to PNG", format, img.width(), img.height());
        STANDARD.encode(&buf)
    };

    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(b64)
}

/// Decode a client-supplied base64 image.
///
/// Accepts raw base64 or a `data:<type>;base64,` URI; surrounding and
/// embedded line-break whitespace is ignored.
pub fn decode_base64_image(input: &str) -> Result<Vec<u8>, SlideCiteError> {
    let payload = strip_data_uri(input.trim());
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(invalid("image payload is empty"));
    }
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| invalid(format!("not valid base64: {e}")))
}

fn strip_data_uri(s: &str) -> &str {
    if !s.starts_with("data:") {
        return s;
    }
    match s.find(";base64,") {
        Some(pos) => &s[pos + ";base64,".len()..],
        None => s,
    }
}

fn invalid(detail: impl Into<String>) -> SlideCiteError {
    SlideCiteError::InvalidImage {
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn sample(format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])));
        let img = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(img.to_rgb8())
        } else {
            img
        };
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn png_passes_through_unchanged() {
        let png = sample(ImageFormat::Png);
        let b64 = encode_png_base64(&png).unwrap();
        assert_eq!(STANDARD.decode(b64).unwrap(), png);
    }

    #[test]
    fn jpeg_is_transcoded_to_png() {
        let jpeg = sample(ImageFormat::Jpeg);
        let b64 = encode_png_base64(&jpeg).unwrap();
        let bytes = STANDARD.decode(b64).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn garbage_is_invalid_image() {
        let err = encode_png_base64(b"definitely not an image").unwrap_err();
        assert!(matches!(err, SlideCiteError::InvalidImage { .. }));
        assert!(matches!(
            encode_png_base64(&[]).unwrap_err(),
            SlideCiteError::InvalidImage { .. }
        ));
    }

    #[test]
    fn data_uri_prefix_is_optional() {
        let png = sample(ImageFormat::Png);
        let raw = STANDARD.encode(&png);
        let uri = format!("data:image/png;base64,{raw}");
        assert_eq!(decode_base64_image(&raw).unwrap(), png);
        assert_eq!(decode_base64_image(&uri).unwrap(), png);
    }

    #[test]
    fn bad_base64_is_invalid_image() {
        let err = decode_base64_image("***").unwrap_err();
        assert!(err.to_string().contains("base64"));
        assert!(decode_base64_image("   ").is_err());
    }
}
