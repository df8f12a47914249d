use crate::config::GenerationOptions;
use base64::{Engine, engine::general_purpose::STANDARD};
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use reqwest::Client;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image acquisition failed: {0}")]
    Acquisition(String),
    #[error("not a decodable raster image: {0}")]
    Format(String),
}

/// Where the bytes come from. Decided once by syntactic inspection, never
/// re-detected downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Local(PathBuf),
    Remote(String),
}

impl ImageSource {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            ImageSource::Remote(trimmed.to_string())
        } else {
            ImageSource::Local(PathBuf::from(trimmed))
        }
    }
}

/// A normalized product photo: JPEG bytes, base64-encoded, plus the pixel
/// dimensions after bounding. Produced per request and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn as_data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.data)
    }
}

/// Acquires, decodes, bounds, and re-encodes a product photo into a
/// transport-safe payload.
pub async fn normalize(
    client: &Client,
    source: &str,
    options: &GenerationOptions,
) -> Result<EncodedImage, ImageError> {
    let bytes = match ImageSource::parse(source) {
        ImageSource::Remote(url) => fetch_remote(client, &url).await?,
        ImageSource::Local(path) => tokio::fs::read(&path).await.map_err(|err| {
            ImageError::Acquisition(format!("cannot read {}: {err}", path.display()))
        })?,
    };
    let encoded = encode_normalized(&bytes, options.max_image_size, options.image_quality)?;
    debug!(
        target = "listforge.image",
        source = %source,
        width = encoded.width,
        height = encoded.height,
        payload_chars = encoded.data.len(),
        "image normalized"
    );
    Ok(encoded)
}

async fn fetch_remote(client: &Client, url: &str) -> Result<Vec<u8>, ImageError> {
    let response = client.get(url).send().await.map_err(|err| {
        if err.is_timeout() {
            ImageError::Acquisition(format!("timed out fetching {url}"))
        } else {
            ImageError::Acquisition(format!("fetch failed for {url}: {err}"))
        }
    })?;
    if !response.status().is_success() {
        return Err(ImageError::Acquisition(format!(
            "HTTP {} fetching {url}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|err| ImageError::Acquisition(format!("body read failed for {url}: {err}")))?;
    Ok(bytes.to_vec())
}

/// The pure decode → convert → bound → re-encode core. Deterministic for
/// identical input bytes and options.
pub fn encode_normalized(
    bytes: &[u8],
    max_size: (u32, u32),
    quality: u8,
) -> Result<EncodedImage, ImageError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|err| ImageError::Format(err.to_string()))?;
    let bounded = bound_dimensions(flatten_colors(decoded), max_size);
    let (width, height) = (bounded.width(), bounded.height());

    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
    bounded
        .write_with_encoder(encoder)
        .map_err(|err| ImageError::Format(err.to_string()))?;

    Ok(EncodedImage {
        data: STANDARD.encode(&jpeg),
        width,
        height,
    })
}

// RGB and grayscale pass through; everything else (alpha, palette, 16-bit)
// collapses to RGB. Dropped alpha is accepted.
fn flatten_colors(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

// Downscale only. `resize` keeps aspect ratio and fits within the bound.
fn bound_dimensions(img: DynamicImage, (max_w, max_h): (u32, u32)) -> DynamicImage {
    if img.width() > max_w || img.height() > max_h {
        img.resize(max_w, max_h, FilterType::Lanczos3)
    } else {
        img
    }
}
