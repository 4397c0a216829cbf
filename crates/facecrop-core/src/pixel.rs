//! Pixel buffer adapter: decode, BT.601 grayscale, crop, resample and encode.

use crate::types::CropRect;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, GrayImage, ImageEncoder, ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

// BT.601 luma weights in 14-bit fixed point (0.299, 0.587, 0.114).
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image data provided")]
    Empty,
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("malformed image: {0}")]
    Malformed(String),
    #[error("image has zero width or height")]
    ZeroDimensions,
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to encode {format}: {source}")]
    Codec {
        format: &'static str,
        #[source]
        source: image::ImageError,
    },
}

/// Channel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Rgb,
    Gray,
}

impl Colorspace {
    pub fn channels(self) -> usize {
        match self {
            Colorspace::Rgb => 3,
            Colorspace::Gray => 1,
        }
    }
}

/// Encoded output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg { quality: u8 },
    Png,
}

impl OutputFormat {
    fn name(self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "JPEG",
            OutputFormat::Png => "PNG",
        }
    }
}

/// An owned 8-bit pixel grid tagged with its colourspace.
///
/// Each request owns its buffers; nothing here is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelBuffer {
    Rgb(RgbImage),
    Gray(GrayImage),
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        match self {
            PixelBuffer::Rgb(img) => img.width(),
            PixelBuffer::Gray(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            PixelBuffer::Rgb(img) => img.height(),
            PixelBuffer::Gray(img) => img.height(),
        }
    }

    pub fn colorspace(&self) -> Colorspace {
        match self {
            PixelBuffer::Rgb(_) => Colorspace::Rgb,
            PixelBuffer::Gray(_) => Colorspace::Gray,
        }
    }

    /// Row-major interleaved samples (`width * height * channels` bytes).
    pub fn samples(&self) -> &[u8] {
        match self {
            PixelBuffer::Rgb(img) => img.as_raw(),
            PixelBuffer::Gray(img) => img.as_raw(),
        }
    }

    /// Copy out the pixels inside `rect`.
    ///
    /// `rect` must have been validated against this buffer's dimensions.
    pub fn crop(&self, rect: &CropRect) -> PixelBuffer {
        let (x, y, w, h) = (rect.start_x(), rect.start_y(), rect.width(), rect.height());
        match self {
            PixelBuffer::Rgb(img) => PixelBuffer::Rgb(imageops::crop_imm(img, x, y, w, h).to_image()),
            PixelBuffer::Gray(img) => {
                PixelBuffer::Gray(imageops::crop_imm(img, x, y, w, h).to_image())
            }
        }
    }

    /// Lanczos3 resample to exactly `width` × `height`.
    pub fn resize(&self, width: u32, height: u32) -> PixelBuffer {
        match self {
            PixelBuffer::Rgb(img) => {
                PixelBuffer::Rgb(imageops::resize(img, width, height, FilterType::Lanczos3))
            }
            PixelBuffer::Gray(img) => {
                PixelBuffer::Gray(imageops::resize(img, width, height, FilterType::Lanczos3))
            }
        }
    }
}

/// Decode an in-memory image of any supported format into an RGB buffer.
pub fn decode(bytes: &[u8]) -> Result<PixelBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let format = reader.format().ok_or(DecodeError::UnknownFormat)?;

    let decoded = reader.decode().map_err(|e| match e {
        image::ImageError::Unsupported(_) => DecodeError::UnknownFormat,
        other => DecodeError::Malformed(other.to_string()),
    })?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(DecodeError::ZeroDimensions);
    }

    tracing::debug!(
        ?format,
        width = decoded.width(),
        height = decoded.height(),
        color = ?decoded.color(),
        "decoded image"
    );

    Ok(PixelBuffer::Rgb(decoded.to_rgb8()))
}

/// Single-channel view with identical dimensions.
///
/// A grayscale input is returned as a copy; RGB is reduced with BT.601 weights.
pub fn to_grayscale(buffer: &PixelBuffer) -> PixelBuffer {
    match buffer {
        PixelBuffer::Gray(img) => PixelBuffer::Gray(img.clone()),
        PixelBuffer::Rgb(img) => {
            let luma: Vec<u8> = img
                .as_raw()
                .chunks_exact(3)
                .map(|px| luma_601(px[0], px[1], px[2]))
                .collect();
            // Length is width * height by construction.
            let gray = GrayImage::from_raw(img.width(), img.height(), luma)
                .unwrap_or_else(|| GrayImage::new(img.width(), img.height()));
            PixelBuffer::Gray(gray)
        }
    }
}

fn luma_601(r: u8, g: u8, b: u8) -> u8 {
    let weighted = u32::from(r) * LUMA_R + u32::from(g) * LUMA_G + u32::from(b) * LUMA_B;
    ((weighted + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT).min(255) as u8
}

/// Encode a buffer in memory. No filesystem access.
pub fn encode(buffer: &PixelBuffer, format: OutputFormat) -> Result<Vec<u8>, EncodeError> {
    let color = match buffer.colorspace() {
        Colorspace::Rgb => ExtendedColorType::Rgb8,
        Colorspace::Gray => ExtendedColorType::L8,
    };
    let (width, height) = (buffer.width(), buffer.height());

    let mut out = Vec::new();
    let result = match format {
        OutputFormat::Jpeg { quality } => {
            let quality = quality.clamp(1, 100);
            JpegEncoder::new_with_quality(&mut out, quality).encode(
                buffer.samples(),
                width,
                height,
                color,
            )
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut out).write_image(buffer.samples(), width, height, color)
        }
    };
    result.map_err(|source| EncodeError::Codec {
        format: format.name(),
        source,
    })?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(40, 30, Rgb([10, 20, 30]));
        let buffer = decode(&png_bytes(&img)).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (40, 30));
        assert_eq!(buffer.colorspace(), Colorspace::Rgb);
        assert_eq!(buffer.samples().len(), 40 * 30 * Colorspace::Rgb.channels());
        assert_eq!(buffer, PixelBuffer::Rgb(img));
    }

    #[test]
    fn test_decode_text_payload_fails() {
        let result = decode(b"not an image");
        assert!(matches!(result, Err(DecodeError::UnknownFormat)));
    }

    #[test]
    fn test_decode_empty_fails() {
        assert!(matches!(decode(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_truncated_png_fails() {
        let img = RgbImage::from_pixel(64, 64, Rgb([200, 100, 50]));
        let bytes = png_bytes(&img);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(decode(truncated), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_grayscale_bt601_weights() {
        let mut img = RgbImage::new(4, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        img.put_pixel(3, 0, Rgb([255, 255, 255]));

        let gray = to_grayscale(&PixelBuffer::Rgb(img));
        assert_eq!(gray.colorspace(), Colorspace::Gray);
        assert_eq!((gray.width(), gray.height()), (4, 1));
        // 0.299 * 255 = 76.2, 0.587 * 255 = 149.7, 0.114 * 255 = 29.1
        assert_eq!(gray.samples(), &[76, 150, 29, 255]);
    }

    #[test]
    fn test_grayscale_of_gray_is_identity() {
        let gray = PixelBuffer::Gray(GrayImage::from_pixel(3, 3, image::Luma([42])));
        assert_eq!(to_grayscale(&gray), gray);
    }

    #[test]
    fn test_crop_extracts_region() {
        let img = RgbImage::from_fn(10, 10, |x, y| Rgb([x as u8, y as u8, 0]));
        let buffer = PixelBuffer::Rgb(img);
        let rect = CropRect::new(2, 3, 6, 8, 10, 10).unwrap();
        let cropped = buffer.crop(&rect);
        assert_eq!((cropped.width(), cropped.height()), (4, 5));
        // Top-left sample of the crop is the (2, 3) source pixel.
        assert_eq!(&cropped.samples()[..3], &[2, 3, 0]);
    }

    #[test]
    fn test_resize_exact_dimensions() {
        let buffer = PixelBuffer::Rgb(RgbImage::from_pixel(100, 50, Rgb([128, 128, 128])));
        let resized = buffer.resize(56, 100);
        assert_eq!((resized.width(), resized.height()), (56, 100));
    }

    #[test]
    fn test_encode_jpeg_decodes_back() {
        let buffer = PixelBuffer::Rgb(RgbImage::from_pixel(32, 24, Rgb([90, 160, 220])));
        let bytes = encode(&buffer, OutputFormat::Jpeg { quality: 75 }).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = decode(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_encode_png_is_lossless() {
        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8 * 30, y as u8 * 30, 7]));
        let buffer = PixelBuffer::Rgb(img);
        let bytes = encode(&buffer, OutputFormat::Png).unwrap();
        assert_eq!(decode(&bytes).unwrap(), buffer);
    }
}
