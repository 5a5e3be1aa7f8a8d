use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use tokio::fs;

use crate::error::{GenError, Result};
use crate::models::{GeneratedImage, ReferenceImage};

pub const FALLBACK_REFERENCE_MIME: &str = "image/jpeg";

pub fn encode_bytes(bytes: &[u8], mime_type: impl Into<String>) -> ReferenceImage {
    ReferenceImage {
        data: BASE64_ENGINE.encode(bytes),
        mime_type: mime_type.into(),
    }
}

/// Reads an image from disk. The MIME type comes from the extension, then
/// from the leading bytes.
pub async fn encode_file(path: impl AsRef<Path>) -> Result<ReferenceImage> {
    let path = path.as_ref();
    let bytes = fs::read(path).await.map_err(|e| {
        GenError::IoError(std::io::Error::new(
            e.kind(),
            format!("Unable to read image '{}': {}", path.display(), e),
        ))
    })?;

    let mime_type = detect_mime_type(path, &bytes);
    if !mime_type.starts_with("image/") {
        return Err(GenError::ValidationError(format!(
            "'{}' does not look like an image ({})",
            path.display(),
            mime_type
        )));
    }

    log::debug!(
        "Encoded reference image {} ({}, {} bytes)",
        path.display(),
        mime_type,
        bytes.len()
    );
    Ok(encode_bytes(&bytes, mime_type))
}

/// Accepts `data:<mime>;base64,<payload>` as produced by browser file readers.
pub fn parse_data_url(url: &str) -> Result<ReferenceImage> {
    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| GenError::DecodeError("Data URL must start with 'data:'".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| GenError::DecodeError("Data URL has no payload".into()))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| GenError::DecodeError("Only base64 data URLs are supported".into()))?;

    BASE64_ENGINE
        .decode(payload)
        .map_err(|e| GenError::DecodeError(format!("Invalid base64 payload: {}", e)))?;

    Ok(ReferenceImage {
        data: payload.to_string(),
        mime_type: if mime_type.is_empty() {
            FALLBACK_REFERENCE_MIME.to_string()
        } else {
            mime_type.to_string()
        },
    })
}

pub fn decode_image(image: &GeneratedImage) -> Result<Vec<u8>> {
    decode_payload(&image.data)
}

pub fn decode_reference(image: &ReferenceImage) -> Result<Vec<u8>> {
    decode_payload(&image.data)
}

fn decode_payload(data: &str) -> Result<Vec<u8>> {
    BASE64_ENGINE
        .decode(data.trim())
        .map_err(|e| GenError::DecodeError(format!("Failed to decode image payload: {}", e)))
}

/// `generated-image-<n>.png`, with `n` counted from 1.
pub fn download_file_name(index: usize) -> String {
    format!("generated-image-{}.png", index + 1)
}

pub fn to_data_url(image: &GeneratedImage) -> String {
    format!("data:{};base64,{}", image.mime_type, image.data)
}

/// Writes one image under its download name, never overwriting.
pub async fn save_image(image: &GeneratedImage, index: usize, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let bytes = decode_image(image)?;
    let name = ensure_unique_file_name(dir, &download_file_name(index)).await?;
    let path = dir.join(name);
    fs::write(&path, &bytes).await?;
    log::info!("💾 Saved {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

pub async fn save_images(images: &[GeneratedImage], dir: &Path) -> Result<Vec<PathBuf>> {
    let mut saved = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        saved.push(save_image(image, index, dir).await?);
    }
    Ok(saved)
}

async fn ensure_unique_file_name(dir: &Path, original: &str) -> Result<String> {
    if !fs::try_exists(dir.join(original)).await? {
        return Ok(original.to_string());
    }

    let original_path = Path::new(original);
    let stem = original_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("generated-image");
    let extension = original_path.extension().and_then(|ext| ext.to_str());

    let mut counter = 1;
    loop {
        let candidate = match extension {
            Some(ext) => format!("{stem}-{counter}.{ext}"),
            None => format!("{stem}-{counter}"),
        };
        if !fs::try_exists(dir.join(&candidate)).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

pub fn detect_mime_type(path: &Path, bytes: &[u8]) -> String {
    if let Some(mime) = mime_guess::from_path(path).first_raw() {
        return mime.to_string();
    }
    sniff_image_mime(bytes)
        .unwrap_or(FALLBACK_REFERENCE_MIME)
        .to_string()
}

fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}
