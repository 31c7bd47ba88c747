//! Compression pipeline
//!
//! Deterministic, format-preserving recompression of uploaded images.
//!
//! Policy:
//! - image larger than 1MB: PNG is re-encoded losslessly with the strongest
//!   settings, JPEG is re-encoded at quality 80
//! - video larger than 50MB: candidate for compression, currently passed
//!   through unmodified (logged)
//! - everything else: passed through unchanged
//!
//! The pipeline never returns a buffer larger than its input and never fails
//! an upload: any decode/encode error falls back to the original bytes.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};

/// Images at or below this size are stored as-is
pub const IMAGE_COMPRESSION_THRESHOLD: usize = 1024 * 1024;

/// Videos above this size would be worth transcoding
pub const VIDEO_COMPRESSION_THRESHOLD: usize = 50 * 1024 * 1024;

/// Quality used when re-encoding lossy formats
pub const JPEG_QUALITY: u8 = 80;

/// What the policy decided to do with a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionPlan {
    Skip(SkipReason),
    RecompressPng,
    RecompressJpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotImage,
    BelowThreshold,
    UnsupportedImage,
    /// Large video; transcoding is not implemented
    VideoPassthrough,
}

/// Final decision recorded on the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionDecision {
    Applied,
    Skipped(SkipReason),
    /// Re-encoding did not make the buffer smaller
    NoGain,
    /// Re-encoding failed; the original is kept
    Failed,
}

/// Result of running the pipeline over a buffer
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub decision: CompressionDecision,
    /// Re-encoded bytes, only present when strictly smaller than the input
    pub output: Option<Vec<u8>>,
    pub compression_ratio: Option<f64>,
}

impl CompressionOutcome {
    fn unchanged(decision: CompressionDecision) -> Self {
        Self {
            decision,
            output: None,
            compression_ratio: None,
        }
    }

    /// Outcome used when the compression worker itself died
    pub fn failed() -> Self {
        Self::unchanged(CompressionDecision::Failed)
    }

    pub fn compressed(&self) -> bool {
        self.output.is_some()
    }

    /// The buffer to store: the re-encoded bytes, or the original
    pub fn into_buffer(self, original: Vec<u8>) -> Vec<u8> {
        self.output.unwrap_or(original)
    }
}

/// Decide what to do with a buffer of `size` bytes of type `mime_type`
pub fn plan(mime_type: &str, size: usize) -> CompressionPlan {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime.starts_with("video/") && size > VIDEO_COMPRESSION_THRESHOLD {
        return CompressionPlan::Skip(SkipReason::VideoPassthrough);
    }

    if !mime.starts_with("image/") {
        return CompressionPlan::Skip(SkipReason::NotImage);
    }

    if size <= IMAGE_COMPRESSION_THRESHOLD {
        return CompressionPlan::Skip(SkipReason::BelowThreshold);
    }

    match mime.as_str() {
        "image/png" => CompressionPlan::RecompressPng,
        "image/jpeg" | "image/jpg" | "image/pjpeg" => CompressionPlan::RecompressJpeg,
        _ => CompressionPlan::Skip(SkipReason::UnsupportedImage),
    }
}

/// Run the compression policy over `data`
pub fn compress(data: &[u8], mime_type: &str) -> CompressionOutcome {
    let encoded = match plan(mime_type, data.len()) {
        CompressionPlan::Skip(reason) => {
            if reason == SkipReason::VideoPassthrough {
                tracing::info!(
                    mime_type = %mime_type,
                    size = data.len(),
                    "Large video stored without compression"
                );
            }
            return CompressionOutcome::unchanged(CompressionDecision::Skipped(reason));
        }
        CompressionPlan::RecompressPng => recompress_png(data),
        CompressionPlan::RecompressJpeg => recompress_jpeg(data),
    };

    match encoded {
        Ok(output) if output.len() < data.len() => {
            let ratio = (data.len() - output.len()) as f64 / data.len() as f64;
            tracing::debug!(
                mime_type = %mime_type,
                original = data.len(),
                compressed = output.len(),
                ratio = format!("{:.3}", ratio),
                "Image recompressed"
            );
            CompressionOutcome {
                decision: CompressionDecision::Applied,
                output: Some(output),
                compression_ratio: Some(ratio),
            }
        }
        Ok(_) => CompressionOutcome::unchanged(CompressionDecision::NoGain),
        Err(e) => {
            tracing::warn!(
                mime_type = %mime_type,
                size = data.len(),
                error = %e,
                "Recompression failed, keeping original"
            );
            CompressionOutcome::unchanged(CompressionDecision::Failed)
        }
    }
}

fn recompress_png(data: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Png)?;

    let mut output = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        &mut output,
        CompressionType::Best,
        FilterType::Adaptive,
    );
    img.write_with_encoder(encoder)?;

    Ok(output)
}

fn recompress_jpeg(data: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;

    // The JPEG encoder only takes 8-bit gray or RGB
    let img = match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };

    let mut output = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut output, JPEG_QUALITY);
    img.write_with_encoder(encoder)?;

    Ok(output.into_inner())
}
