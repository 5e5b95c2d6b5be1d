//! Cover art extraction, optional downscaling, and embedding.
//!
//! The front-cover PICTURE block is preferred; any picture is a fallback.
//! Oversized images are rescaled to the policy's longest-side limit and
//! re-encoded as JPEG. Art failures are warnings at the call sites, not
//! errors.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use lofty::config::ParseOptions;
use lofty::file::AudioFile;
use lofty::flac::FlacFile;
use lofty::ogg::OggPictureStorage;
use lofty::picture::{MimeType, Picture, PictureType};
use thiserror::Error;

use crate::policy::ArtPolicy;

#[derive(Debug, Error)]
pub enum ArtError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source parse failed: {0}")]
    Parse(String),
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("image encode failed: {0}")]
    Encode(String),
}

/// Pull the cover picture out of a FLAC source, if it has one.
pub fn extract_cover(flac_path: &Path) -> Result<Option<Picture>, ArtError> {
    let mut file = File::open(flac_path)?;
    let flac = FlacFile::read_from(&mut file, ParseOptions::new())
        .map_err(|e| ArtError::Parse(e.to_string()))?;

    let pictures = flac.pictures();
    let chosen = pictures
        .iter()
        .find(|(p, _)| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first());
    Ok(chosen.map(|(p, _)| p.clone()))
}

/// Apply the resize policy: returns the picture unchanged when it fits,
/// otherwise a JPEG re-encode scaled so the longest side is `max_px`.
pub fn prepare_cover(picture: Picture, policy: &ArtPolicy) -> Result<Picture, ArtError> {
    if !policy.resize {
        return Ok(picture);
    }

    let img = image::load_from_memory(picture.data())
        .map_err(|e| ArtError::Decode(e.to_string()))?;
    let longest = img.width().max(img.height());
    if longest <= policy.max_px {
        return Ok(picture);
    }

    let scaled = img.resize(policy.max_px, policy.max_px, FilterType::Lanczos3);
    let mut out = Vec::new();
    let mut cursor = Cursor::new(&mut out);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, 90);
    scaled
        .write_with_encoder(encoder)
        .map_err(|e| ArtError::Encode(e.to_string()))?;

    tracing::debug!(
        from_px = longest,
        to_px = policy.max_px,
        bytes = out.len(),
        "cover art downscaled"
    );

    Ok(Picture::new_unchecked(
        PictureType::CoverFront,
        Some(MimeType::Jpeg),
        picture.description().map(str::to_string),
        out,
    ))
}

/// Decode just enough of an image to report its longest side, for
/// verification reporting.
pub fn longest_side(data: &[u8]) -> Option<u32> {
    let format = image::guess_format(data).ok()?;
    let reader = image::ImageReader::with_format(Cursor::new(data), format);
    let (w, h) = reader.into_dimensions().ok()?;
    Some(w.max(h))
}
