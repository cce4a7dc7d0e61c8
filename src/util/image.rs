use std::{
    io::{self, Cursor},
    path::Path,
};

use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilterType, PngEncoder},
    },
    imageops::{self, FilterType},
    ColorType, DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageFormat,
    ImageReader, Rgb, RgbImage,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    constants::{DEFAULT_BLUR_AMOUNT, DEFAULT_JPEG_QUALITY, MAX_IMAGE_DIMENSION, PENDING_EXTENSION},
    util::path::get_pending_path,
};

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileType {
    JPEG,
    PNG,
    GIF,
    WEBP,
    BMP,
}

#[derive(Debug)]
pub struct FileIdentification {
    pub file_type: FileType,
    file_header: &'static [u8],
}

const FILE_MAPPINGS: [FileIdentification; 5] = [
    FileIdentification {
        file_type: FileType::JPEG,
        file_header: &[0xff, 0xd8, 0xff],
    },
    FileIdentification {
        file_type: FileType::PNG,
        file_header: &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a],
    },
    FileIdentification {
        file_type: FileType::GIF,
        file_header: b"GIF8",
    },
    FileIdentification {
        file_type: FileType::WEBP,
        file_header: &[0x52, 0x49, 0x46, 0x46],
    },
    FileIdentification {
        file_type: FileType::BMP,
        file_header: b"BM",
    },
];

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("File size exceeds maximum allowed size of {max_mb}MB")]
    TooLarge { max_mb: usize },

    #[error("File type not allowed. Allowed types: {}", .0.join(", "))]
    ExtensionNotAllowed(Vec<String>),

    #[error("Invalid image file")]
    InvalidImage,

    #[error("Invalid image dimensions")]
    InvalidDimensions,

    #[error("Image dimensions too large (max {max}x{max})", max = MAX_IMAGE_DIMENSION)]
    DimensionsTooLarge,

    #[error("{0}")]
    InvalidParameters(String),

    #[error("Pack configuration produced no outputs")]
    EmptyPack,

    #[error("Error encoding image: {0}")]
    Encode(#[from] image::ImageError),
}

impl ProcessingError {
    /// Whether the error was caused by the request rather than by the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ProcessingError::Encode(_))
    }
}

/// Metadata reported back to the client after an upload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub size: usize,
    pub mode: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressMode {
    Quality(u8),
    TargetSize { kilobytes: u64 },
}

pub struct CompressedImage {
    pub data: Vec<u8>,
    pub size: usize,
    pub quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeMode {
    Percentage(u32),
    Exact { width: u32, height: u32 },
    Width(u32),
    Height(u32),
    MaxDimensions {
        max_width: Option<u32>,
        max_height: Option<u32>,
    },
}

pub struct ResizedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackMethod {
    #[default]
    Blur,
    Resize,
    #[serde(other)]
    Unsupported,
}

/// One output of a pack recipe. `compress_target` is expressed in bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackOutput {
    #[serde(default = "default_output_name")]
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub method: PackMethod,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub compress_target: Option<u64>,
}

fn default_output_name() -> String {
    "output".to_owned()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PackConfigRepr {
    Wrapped { outputs: Vec<PackOutput> },
    Bare(Vec<PackOutput>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PackConfig {
    pub outputs: Vec<PackOutput>,
}

impl PackConfig {
    /// Accepts either `{"outputs": [...]}` or a bare array of outputs.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let outputs = match serde_json::from_str::<PackConfigRepr>(raw)? {
            PackConfigRepr::Wrapped { outputs } => outputs,
            PackConfigRepr::Bare(outputs) => outputs,
        };
        Ok(PackConfig { outputs })
    }
}

#[derive(Debug)]
pub struct PackResult {
    pub name: String,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub extension: &'static str,
}

pub fn determine_file_type(image: &[u8]) -> Option<&'static FileIdentification> {
    FILE_MAPPINGS.iter().find(|mapping| {
        image.starts_with(mapping.file_header)
            && (mapping.file_type != FileType::WEBP || image.get(8..12) == Some(b"WEBP"))
    })
}

/// Checks size, extension, magic bytes and dimensions of an uploaded file.
pub fn validate_image(
    data: &[u8],
    filename: &str,
    max_size: usize,
    allowed_extensions: &[String],
) -> Result<&'static FileIdentification, ProcessingError> {
    if data.len() > max_size {
        return Err(ProcessingError::TooLarge {
            max_mb: max_size / (1024 * 1024),
        });
    }

    if !allowed_extensions.is_empty() {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();
        if !allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(ProcessingError::ExtensionNotAllowed(
                allowed_extensions.to_vec(),
            ));
        }
    }

    let identification = determine_file_type(data).ok_or(ProcessingError::InvalidImage)?;

    let (width, height) = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|_| ProcessingError::InvalidImage)?
        .into_dimensions()
        .map_err(|_| ProcessingError::InvalidImage)?;

    if width < 1 || height < 1 {
        return Err(ProcessingError::InvalidDimensions);
    }
    if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
        return Err(ProcessingError::DimensionsTooLarge);
    }

    // Headers can lie; make sure the pixel data decodes too
    decode(data)?;

    Ok(identification)
}

pub fn image_info(data: &[u8]) -> Result<ImageInfo, ProcessingError> {
    let format = image::guess_format(data).map_err(|_| ProcessingError::InvalidImage)?;
    let image = decode(data)?;

    Ok(ImageInfo {
        width: image.width(),
        height: image.height(),
        format: format_name(format),
        size: data.len(),
        mode: color_mode(image.color()).to_owned(),
    })
}

/// Places the image, scaled to fit, on a `width`x`height` canvas whose borders
/// are filled with a blurred, cover-scaled copy of the same image.
pub fn blur_borders(
    data: &[u8],
    width: u32,
    height: u32,
    blur_amount: u32,
) -> Result<Vec<u8>, ProcessingError> {
    check_dimension("width", width)?;
    check_dimension("height", height)?;

    let source = flatten_alpha(&decode(data)?);
    let (src_w, src_h) = source.dimensions();
    let image_ratio = src_w as f64 / src_h as f64;
    let canvas_ratio = width as f64 / height as f64;

    let (fit_w, fit_h, cover_w, cover_h) = if image_ratio > canvas_ratio {
        (
            width,
            scaled(width as f64 / image_ratio),
            scaled(height as f64 * image_ratio),
            height,
        )
    } else {
        (
            scaled(height as f64 * image_ratio),
            height,
            width,
            scaled(width as f64 / image_ratio),
        )
    };

    let background = imageops::resize(&source, cover_w, cover_h, FilterType::Lanczos3);
    let background = if blur_amount > 0 {
        imageops::fast_blur(&background, blur_amount as f32)
    } else {
        background
    };
    let foreground = imageops::resize(&source, fit_w, fit_h, FilterType::Lanczos3);

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    imageops::overlay(
        &mut canvas,
        &background,
        centered(width, cover_w),
        centered(height, cover_h),
    );
    imageops::overlay(
        &mut canvas,
        &foreground,
        centered(width, fit_w),
        centered(height, fit_h),
    );

    encode_png(&DynamicImage::ImageRgb8(canvas))
}

pub fn compress(data: &[u8], mode: CompressMode) -> Result<CompressedImage, ProcessingError> {
    let rgb = flatten_alpha(&decode(data)?);

    match mode {
        CompressMode::Quality(quality) => {
            if !(1..=100).contains(&quality) {
                return Err(ProcessingError::InvalidParameters(
                    "Quality must be between 1 and 100".to_owned(),
                ));
            }
            let data = encode_jpeg(&rgb, quality)?;
            Ok(CompressedImage {
                size: data.len(),
                data,
                quality,
            })
        }
        CompressMode::TargetSize { kilobytes } => {
            if kilobytes == 0 {
                return Err(ProcessingError::InvalidParameters(
                    "Target size must be at least 1 KB".to_owned(),
                ));
            }
            let target_bytes = kilobytes.saturating_mul(1024);
            let (mut low, mut high) = (1u8, 100u8);
            let mut best: Option<(Vec<u8>, u8)> = None;

            // Highest quality whose output still fits the target
            while low <= high {
                let mid = low + (high - low) / 2;
                let encoded = encode_jpeg(&rgb, mid)?;
                if encoded.len() as u64 <= target_bytes {
                    best = Some((encoded, mid));
                    low = mid + 1;
                } else {
                    high = mid - 1;
                }
            }

            let (data, quality) = match best {
                Some(found) => found,
                None => (encode_jpeg(&rgb, 1)?, 1),
            };
            Ok(CompressedImage {
                size: data.len(),
                data,
                quality,
            })
        }
    }
}

pub fn resize(data: &[u8], mode: ResizeMode) -> Result<ResizedImage, ProcessingError> {
    let image = decode(data)?;
    let (width, height) = image.dimensions();
    let (new_width, new_height) = target_dimensions(width, height, mode)?;

    let resized = image.resize_exact(new_width, new_height, FilterType::Lanczos3);
    Ok(ResizedImage {
        data: encode_png(&resized)?,
        width: new_width,
        height: new_height,
    })
}

/// Computes output dimensions for `mode`. Results are never smaller than 1x1.
pub fn target_dimensions(
    width: u32,
    height: u32,
    mode: ResizeMode,
) -> Result<(u32, u32), ProcessingError> {
    let (width_f, height_f) = (width as f64, height as f64);

    let dimensions = match mode {
        ResizeMode::Percentage(percentage) => {
            if !(1..=100).contains(&percentage) {
                return Err(ProcessingError::InvalidParameters(
                    "Percentage must be between 1 and 100".to_owned(),
                ));
            }
            let scale = percentage as f64 / 100.0;
            (scaled(width_f * scale), scaled(height_f * scale))
        }
        ResizeMode::Exact {
            width: target_w,
            height: target_h,
        } => {
            check_dimension("width", target_w)?;
            check_dimension("height", target_h)?;
            (target_w, target_h)
        }
        ResizeMode::Width(target_w) => {
            check_dimension("width", target_w)?;
            (target_w, scaled(height_f * (target_w as f64 / width_f)))
        }
        ResizeMode::Height(target_h) => {
            check_dimension("height", target_h)?;
            (scaled(width_f * (target_h as f64 / height_f)), target_h)
        }
        ResizeMode::MaxDimensions {
            max_width,
            max_height,
        } => {
            let scale = match (max_width, max_height) {
                (Some(max_w), Some(max_h)) => {
                    check_dimension("max width", max_w)?;
                    check_dimension("max height", max_h)?;
                    (max_w as f64 / width_f).min(max_h as f64 / height_f)
                }
                (Some(max_w), None) => {
                    check_dimension("max width", max_w)?;
                    max_w as f64 / width_f
                }
                (None, Some(max_h)) => {
                    check_dimension("max height", max_h)?;
                    max_h as f64 / height_f
                }
                (None, None) => {
                    return Err(ProcessingError::InvalidParameters(
                        "No resize parameters specified".to_owned(),
                    ))
                }
            };
            if scale >= 1.0 {
                (width, height)
            } else {
                (scaled(width_f * scale), scaled(height_f * scale))
            }
        }
    };

    Ok(dimensions)
}

/// Runs every supported output of a pack against the same source image.
pub fn process_pack(data: &[u8], config: &PackConfig) -> Result<Vec<PackResult>, ProcessingError> {
    let mut results = Vec::with_capacity(config.outputs.len());

    for output in &config.outputs {
        let processed = match output.method {
            PackMethod::Blur => {
                blur_borders(data, output.width, output.height, DEFAULT_BLUR_AMOUNT)?
            }
            PackMethod::Resize => {
                resize(
                    data,
                    ResizeMode::Exact {
                        width: output.width,
                        height: output.height,
                    },
                )?
                .data
            }
            PackMethod::Unsupported => {
                log::warn!("Skipping pack output '{}' with unsupported method", output.name);
                continue;
            }
        };

        let (processed, extension) = if output.compress {
            let mode = match output.compress_target.map(|bytes| bytes / 1024) {
                Some(kilobytes) if kilobytes > 0 => CompressMode::TargetSize { kilobytes },
                _ => CompressMode::Quality(DEFAULT_JPEG_QUALITY),
            };
            (compress(&processed, mode)?.data, "jpg")
        } else {
            (processed, "png")
        };

        results.push(PackResult {
            name: output.name.clone(),
            data: processed,
            width: output.width,
            height: output.height,
            extension,
        });
    }

    if results.is_empty() {
        return Err(ProcessingError::EmptyPack);
    }

    Ok(results)
}

/// Human readable file size, e.g. `2.3 MB`.
pub fn format_file_size(size_bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let size = size_bytes as f64;
    if size_bytes < 1024 {
        format!("{} B", size_bytes)
    } else if size < KB * KB {
        format!("{:.1} KB", size / KB)
    } else if size < KB * KB * KB {
        format!("{:.1} MB", size / (KB * KB))
    } else {
        format!("{:.1} GB", size / (KB * KB * KB))
    }
}

pub fn mime_type_for(filename: &str) -> &'static str {
    if filename.to_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

pub async fn save_pending(data_dir: &Path, data: &[u8]) -> Result<Uuid, io::Error> {
    let uuid = Uuid::new_v4();
    let directory = get_pending_path(data_dir);
    tokio::fs::create_dir_all(&directory).await?;

    let path = directory.join(format!("{}.{}", uuid, PENDING_EXTENSION));
    tokio::fs::write(&path, data).await?;
    log::info!("Saved pending upload to {:?}", path);

    Ok(uuid)
}

pub async fn read_pending(data_dir: &Path, uuid: Uuid) -> Result<Vec<u8>, io::Error> {
    let path = get_pending_path(data_dir).join(format!("{}.{}", uuid, PENDING_EXTENSION));
    tokio::fs::read(path).await
}

/// Deletes a staged upload. A missing file is the expected state and not an error.
pub async fn delete_pending(data_dir: &Path, uuid: Uuid) -> Result<(), io::Error> {
    let path = get_pending_path(data_dir).join(format!("{}.{}", uuid, PENDING_EXTENSION));
    match tokio::fs::remove_file(&path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => {
            log::error!("Error while removing '{:?}': {}", path, err);
            Err(err)
        }
        _ => Ok(()),
    }
}

fn decode(data: &[u8]) -> Result<DynamicImage, ProcessingError> {
    image::load_from_memory(data).map_err(|_| ProcessingError::InvalidImage)
}

fn check_dimension(name: &str, value: u32) -> Result<(), ProcessingError> {
    if value < 1 || value > MAX_IMAGE_DIMENSION {
        return Err(ProcessingError::InvalidParameters(format!(
            "{} must be between 1 and {}",
            capitalize(name),
            MAX_IMAGE_DIMENSION
        )));
    }
    Ok(())
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn scaled(value: f64) -> u32 {
    (value as u32).max(1)
}

fn centered(outer: u32, inner: u32) -> i64 {
    (outer as i64 - inner as i64).div_euclid(2)
}

/// Composites transparent pixels onto white, as JPEG has no alpha channel.
fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend = |channel: u8| ((channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        rgb.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    rgb
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ProcessingError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ProcessingError> {
    let mut buffer = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilterType::Adaptive);
    image.write_with_encoder(encoder)?;
    Ok(buffer)
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG".to_owned(),
        ImageFormat::Png => "PNG".to_owned(),
        ImageFormat::Gif => "GIF".to_owned(),
        ImageFormat::WebP => "WEBP".to_owned(),
        ImageFormat::Bmp => "BMP".to_owned(),
        other => format!("{:?}", other).to_uppercase(),
    }
}

fn color_mode(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 | ColorType::L16 => "L",
        ColorType::La8 | ColorType::La16 => "LA",
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => "RGBA",
        _ => "RGB",
    }
}
