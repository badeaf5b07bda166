// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provenance metadata embedded in saved images, and output file naming.

use crate::models::ImageFormat;
use chrono::{DateTime, Utc};
use png::text_metadata::{EncodableTextChunk, ITXtChunk};
use std::io::Cursor;

/// Keyword of the PNG text chunk carrying the prompt.
pub const DESCRIPTION_KEYWORD: &str = "Description";

/// Characters of the prompt used in file names.
pub const MAX_PROMPT_SLUG_CHARS: usize = 75;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// JPEG markers.
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_COM: u8 = 0xFE;
const JPEG_APP0: u8 = 0xE0;
const JPEG_APP15: u8 = 0xEF;
/// Segment length field counts itself.
const JPEG_MAX_COMMENT: usize = u16::MAX as usize - 2;

/// Embed the prompt as a description inside the image container.
///
/// PNG gets an iTXt chunk, JPEG a comment segment. Anything else is
/// returned unchanged.
pub fn embed_description(bytes: &[u8], format: ImageFormat, description: &str) -> Result<Vec<u8>, MetadataError> {
    match format {
        ImageFormat::Png => embed_png(bytes, description),
        ImageFormat::Jpeg => embed_jpeg(bytes, description),
        ImageFormat::Webp => {
            tracing::warn!("Provenance metadata is not supported for WebP, saving as-is");
            Ok(bytes.to_vec())
        }
    }
}

/// Splice an iTXt chunk in front of the first IDAT, keeping every other
/// chunk byte for byte. An existing description is replaced.
fn embed_png(bytes: &[u8], description: &str) -> Result<Vec<u8>, MetadataError> {
    if !bytes.starts_with(&PNG_SIGNATURE) {
        return Err(MetadataError::Png("missing PNG signature".to_string()));
    }

    let mut itxt = Vec::new();
    ITXtChunk::new(DESCRIPTION_KEYWORD, description)
        .encode(&mut itxt)
        .map_err(|e| MetadataError::Png(e.to_string()))?;

    let mut out = Vec::with_capacity(bytes.len() + itxt.len());
    out.extend_from_slice(&PNG_SIGNATURE);

    let mut inserted = false;
    let mut pos = PNG_SIGNATURE.len();
    while pos < bytes.len() {
        let header = bytes
            .get(pos..pos + 8)
            .ok_or_else(|| MetadataError::Png("truncated chunk header".to_string()))?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = &header[4..8];
        let chunk_end = pos
            .checked_add(12 + length)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| MetadataError::Png("truncated chunk".to_string()))?;
        let data = &bytes[pos + 8..pos + 8 + length];

        if !inserted && (kind == b"IDAT" || kind == b"IEND") {
            out.extend_from_slice(&itxt);
            inserted = true;
        }
        if kind == b"IEND" {
            out.extend_from_slice(&bytes[pos..chunk_end]);
            return Ok(out);
        }
        if !is_description_chunk(kind, data) {
            out.extend_from_slice(&bytes[pos..chunk_end]);
        }
        pos = chunk_end;
    }
    Err(MetadataError::Png("missing IEND chunk".to_string()))
}

fn is_description_chunk(kind: &[u8], data: &[u8]) -> bool {
    matches!(kind, b"tEXt" | b"zTXt" | b"iTXt")
        && data.split(|b| *b == 0).next() == Some(DESCRIPTION_KEYWORD.as_bytes())
}

/// Insert a COM segment after SOI and any leading APPn segments, so JFIF
/// and EXIF headers stay first.
fn embed_jpeg(bytes: &[u8], description: &str) -> Result<Vec<u8>, MetadataError> {
    if !bytes.starts_with(&JPEG_SOI) {
        return Err(MetadataError::Jpeg("missing SOI marker".to_string()));
    }

    let mut insert_at = JPEG_SOI.len();
    while let &[0xFF, marker, hi, lo, ..] = &bytes[insert_at..] {
        if !(JPEG_APP0..=JPEG_APP15).contains(&marker) {
            break;
        }
        let segment_end = insert_at + 2 + u16::from_be_bytes([hi, lo]) as usize;
        if segment_end > bytes.len() {
            return Err(MetadataError::Jpeg("truncated APP segment".to_string()));
        }
        insert_at = segment_end;
    }

    let mut comment = description.as_bytes();
    if comment.len() > JPEG_MAX_COMMENT {
        comment = &comment[..JPEG_MAX_COMMENT];
    }
    let segment_len = (comment.len() + 2) as u16;

    let mut out = Vec::with_capacity(bytes.len() + comment.len() + 4);
    out.extend_from_slice(&bytes[..insert_at]);
    out.extend_from_slice(&[0xFF, JPEG_COM]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(comment);
    out.extend_from_slice(&bytes[insert_at..]);
    Ok(out)
}

/// Read back the embedded description of a PNG.
pub fn read_png_description(bytes: &[u8]) -> Option<String> {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let reader = decoder.read_info().ok()?;
    let info = reader.info();
    info.utf8_text
        .iter()
        .find(|chunk| chunk.keyword == DESCRIPTION_KEYWORD)
        .and_then(|chunk| chunk.get_text().ok())
        .or_else(|| {
            info.uncompressed_latin1_text
                .iter()
                .find(|chunk| chunk.keyword == DESCRIPTION_KEYWORD)
                .map(|chunk| chunk.text.clone())
        })
}

/// File name for a saved image: timestamp plus a sanitized prompt slice.
pub fn output_file_name(prompt: &str, generated_at: DateTime<Utc>, format: ImageFormat) -> String {
    let slug = prompt_slug(prompt);
    let stamp = generated_at.format("%Y%m%d_%H%M%S");
    if slug.is_empty() {
        format!("{stamp}.{}", format.extension())
    } else {
        format!("{stamp}_{slug}.{}", format.extension())
    }
}

/// First [`MAX_PROMPT_SLUG_CHARS`] characters of the prompt without
/// characters that are invalid in file names.
pub fn prompt_slug(prompt: &str) -> String {
    let slug: String = prompt
        .chars()
        .take(MAX_PROMPT_SLUG_CHARS)
        .filter(|c| !is_invalid_file_char(*c))
        .collect();
    slug.trim().trim_end_matches('.').trim_end().to_string()
}

fn is_invalid_file_char(c: char) -> bool {
    c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

/// Errors while embedding metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("PNG metadata error: {0}")]
    Png(String),

    #[error("JPEG metadata error: {0}")]
    Jpeg(String),
}
