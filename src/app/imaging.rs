//! Image normalisation for uploads: JPEG re-encode, size cap, thumbnail.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

pub const MAX_DIMENSION: u32 = 1920;
pub const THUMBNAIL_SIZE: u32 = 320;
const IMAGE_QUALITY: u8 = 85;
const THUMBNAIL_QUALITY: u8 = 80;

/// Raster formats we decode and re-encode. GIF and SVG are stored as-is.
const PROCESSABLE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/bmp",
    "image/tiff",
];

pub fn is_processable_image(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    PROCESSABLE_TYPES.contains(&essence.as_str())
}

#[derive(Debug)]
pub struct ProcessedImage {
    pub data: Vec<u8>,
    pub thumbnail: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode `bytes`, fit them inside 1920×1920 (never enlarging) as JPEG q85,
/// and cut a centred 320×320 JPEG q80 thumbnail.
pub fn process_image(bytes: &[u8]) -> Result<ProcessedImage, image::ImageError> {
    let source = image::load_from_memory(bytes)?;

    let (w, h) = source.dimensions();
    let resized = if w > MAX_DIMENSION || h > MAX_DIMENSION {
        source.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
    } else {
        source.clone()
    };
    let (width, height) = resized.dimensions();
    let data = encode_jpeg(&resized, IMAGE_QUALITY)?;

    let thumb = source.resize_to_fill(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Triangle);
    let thumbnail = encode_jpeg(&thumb, THUMBNAIL_QUALITY)?;

    Ok(ProcessedImage {
        data,
        thumbnail,
        width,
        height,
    })
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([200, 30, 30, 128]),
        ));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn decoded(bytes: &[u8]) -> DynamicImage {
        assert_eq!(image::guess_format(bytes).unwrap(), ImageFormat::Jpeg);
        image::load_from_memory(bytes).unwrap()
    }

    #[test]
    fn processable_types() {
        assert!(is_processable_image("image/png"));
        assert!(is_processable_image("IMAGE/JPEG; charset=binary"));
        assert!(!is_processable_image("image/gif"));
        assert!(!is_processable_image("image/svg+xml"));
        assert!(!is_processable_image("application/pdf"));
    }

    #[test]
    fn large_images_are_capped_on_long_edge() {
        let processed = process_image(&png(3000, 1500)).unwrap();
        assert_eq!((processed.width, processed.height), (1920, 960));
        assert_eq!(decoded(&processed.data).dimensions(), (1920, 960));
    }

    #[test]
    fn tall_images_are_capped_on_height() {
        let processed = process_image(&png(1000, 4000)).unwrap();
        assert_eq!((processed.width, processed.height), (480, 1920));
    }

    #[test]
    fn small_images_are_not_enlarged() {
        let processed = process_image(&png(200, 100)).unwrap();
        assert_eq!(decoded(&processed.data).dimensions(), (200, 100));
    }

    #[test]
    fn thumbnail_is_square_jpeg() {
        let processed = process_image(&png(800, 200)).unwrap();
        assert_eq!(decoded(&processed.thumbnail).dimensions(), (320, 320));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(process_image(b"definitely not an image").is_err());
    }
}
