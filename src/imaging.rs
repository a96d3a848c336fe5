use anyhow::Context;
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Stored photos are always exactly this square canvas.
pub const IMAGE_SIZE: u32 = 300;
/// Report thumbnails are shrunk independently of the stored size.
pub const THUMB_SIZE: u32 = 100;
pub const JPEG_QUALITY: u8 = 70;
pub const MAX_FILE_BYTES: usize = 500 * 1024;
/// Documented ceiling for a 300x300 JPEG at the fixed quality.
#[allow(dead_code)]
pub const MAX_NORMALIZED_BYTES: usize = 128 * 1024;

const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug)]
pub enum ImagingError {
    InvalidFormat { extension: String },
    FileTooLarge { size: usize },
    Unsupported(String),
}

impl ImagingError {
    pub fn code(&self) -> &'static str {
        match self {
            ImagingError::InvalidFormat { .. } => "invalid_format",
            ImagingError::FileTooLarge { .. } => "file_too_large",
            ImagingError::Unsupported(_) => "unsupported_image_data",
        }
    }
}

impl std::fmt::Display for ImagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImagingError::InvalidFormat { extension } => write!(
                f,
                "invalid file format '{}'; only JPG and PNG files are allowed",
                extension
            ),
            ImagingError::FileTooLarge { size } => write!(
                f,
                "file size {} bytes exceeds the {} KB limit",
                size,
                MAX_FILE_BYTES / 1024
            ),
            ImagingError::Unsupported(msg) => write!(f, "unsupported image data: {}", msg),
        }
    }
}

impl std::error::Error for ImagingError {}

/// Pre-condition gate: the file extension must be in the allowed set. Runs
/// before any decoding, so normalization never sees disallowed input.
pub fn validate_extension(filename: &str) -> Result<(), ImagingError> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(())
    } else {
        Err(ImagingError::InvalidFormat { extension })
    }
}

/// Pre-condition gate: uploads over 500 KB are rejected before decoding.
pub fn validate_size(byte_len: usize) -> Result<(), ImagingError> {
    if byte_len <= MAX_FILE_BYTES {
        Ok(())
    } else {
        Err(ImagingError::FileTooLarge { size: byte_len })
    }
}

/// Decode, flatten transparency onto white, resize to the fixed canvas and
/// re-encode as JPEG at the fixed quality.
pub fn normalize(raw: &[u8]) -> Result<Vec<u8>, ImagingError> {
    render(raw, IMAGE_SIZE)
}

/// Same pipeline at thumbnail size, for report embedding.
pub fn thumbnail(raw: &[u8]) -> Result<Vec<u8>, ImagingError> {
    render(raw, THUMB_SIZE)
}

fn render(raw: &[u8], target: u32) -> Result<Vec<u8>, ImagingError> {
    let decoded =
        image::load_from_memory(raw).map_err(|e| ImagingError::Unsupported(e.to_string()))?;
    let flat = flatten_onto_white(decoded);
    // Exact target dimensions; distortion of non-square sources is accepted.
    let resized = image::imageops::resize(&flat, target, target, FilterType::Lanczos3);
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(resized)
        .write_to(
            &mut Cursor::new(&mut out),
            ImageOutputFormat::Jpeg(JPEG_QUALITY),
        )
        .map_err(|e| ImagingError::Unsupported(e.to_string()))?;
    Ok(out)
}

/// Composite transparent sources onto an opaque white background at the
/// source's own dimensions, before any resize touches the pixels.
fn flatten_onto_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut flat = RgbImage::from_pixel(w, h, Rgb([255, 255, 255]));
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        if a == 0 {
            continue;
        }
        let a = a as u16;
        let blend = |src: u8| ((src as u16 * a + 255 * (255 - a)) / 255) as u8;
        flat.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    flat
}

/// `uploads/{year}/{SECTION}/{registerNumber}.jpg`, workspace-relative.
pub fn photo_rel_path(year: i64, section: &str, register_number: &str) -> PathBuf {
    PathBuf::from("uploads")
        .join(year.to_string())
        .join(section.to_ascii_uppercase())
        .join(format!("{}.jpg", register_number))
}

/// Signatures sit next to the photo as `{registerNumber}_sign.jpg`.
pub fn signature_rel_path(year: i64, section: &str, register_number: &str) -> PathBuf {
    PathBuf::from("uploads")
        .join(year.to_string())
        .join(section.to_ascii_uppercase())
        .join(format!("{}_sign.jpg", register_number))
}

/// Write normalized bytes under the workspace root, creating intermediate
/// directories if absent. Returns the absolute path written.
pub fn save(root: &Path, rel: &Path, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    let abs = root.join(rel);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    std::fs::write(&abs, bytes)
        .with_context(|| format!("failed to write image {}", abs.to_string_lossy()))?;
    Ok(abs)
}
