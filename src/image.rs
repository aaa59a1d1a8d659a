//! Image payloads.
//!
//! The engine treats image conversion as a pluggable collaborator. The
//! bundled [`StandardImageCodec`] picks the encoding from the native format
//! name and handles PNG, JPEG, GIF, BMP files and raw DIBs (`CF_DIB`).

use std::io::Cursor;

use bytes::{BufMut, BytesMut};
use image::{DynamicImage, ImageFormat};
use tracing::trace;

use crate::error::{DataTransferError, Result};
use crate::format::NativeFormat;

const BITMAPINFOHEADER_LEN: usize = 40;
const BMP_FILE_HEADER_LEN: usize = 14;

/// Converts images to and from native image formats
pub trait ImageCodec: Send + Sync {
    /// Encode `image` for `native`
    fn encode(&self, image: &DynamicImage, native: &NativeFormat) -> Result<Vec<u8>>;

    /// Decode bytes of `native` into an image
    fn decode(&self, bytes: &[u8], native: &NativeFormat) -> Result<DynamicImage>;
}

/// Encoding a native image format uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    /// BITMAPINFOHEADER followed by pixels
    Dib,
    /// BMP file
    Bmp,
    /// PNG
    Png,
    /// JPEG
    Jpeg,
    /// GIF
    Gif,
}

impl ImageEncoding {
    /// Infer from a native format name such as `CF_DIB`, `PNG` or `image/png`
    pub fn for_native_name(name: &str) -> Option<Self> {
        let base = name.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        let encoding = match base.as_str() {
            "cf_dib" | "cf_dibv5" | "dib" => Self::Dib,
            "bmp" | "image/bmp" | "image/x-bmp" => Self::Bmp,
            "png" | "image/png" => Self::Png,
            "jfif" | "jpeg" | "image/jpeg" | "image/jpg" => Self::Jpeg,
            "gif" | "image/gif" => Self::Gif,
            _ => return None,
        };
        Some(encoding)
    }
}

/// Standard image codec backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardImageCodec;

impl StandardImageCodec {
    fn encoding(native: &NativeFormat) -> Option<ImageEncoding> {
        ImageEncoding::for_native_name(&native.name)
    }

    fn write(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut data), format)
            .map_err(|e| DataTransferError::ImageEncode(e.to_string()))?;
        Ok(data)
    }
}

impl ImageCodec for StandardImageCodec {
    fn encode(&self, image: &DynamicImage, native: &NativeFormat) -> Result<Vec<u8>> {
        let encoding = Self::encoding(native).ok_or_else(|| {
            DataTransferError::ImageEncode(format!("no image encoding for {}", native.name))
        })?;
        trace!(?encoding, format = %native.id, "Encoding image");

        match encoding {
            ImageEncoding::Dib => create_dib_from_image(image),
            ImageEncoding::Bmp => Self::write(&DynamicImage::ImageRgba8(image.to_rgba8()), ImageFormat::Bmp),
            ImageEncoding::Png => Self::write(image, ImageFormat::Png),
            // JPEG has no alpha channel
            ImageEncoding::Jpeg => Self::write(&DynamicImage::ImageRgb8(image.to_rgb8()), ImageFormat::Jpeg),
            ImageEncoding::Gif => Self::write(&DynamicImage::ImageRgba8(image.to_rgba8()), ImageFormat::Gif),
        }
    }

    fn decode(&self, bytes: &[u8], native: &NativeFormat) -> Result<DynamicImage> {
        let encoding = Self::encoding(native).ok_or_else(|| {
            DataTransferError::ImageDecode(format!("no image encoding for {}", native.name))
        })?;

        let format = match encoding {
            ImageEncoding::Dib => return parse_dib_to_image(bytes),
            ImageEncoding::Bmp => ImageFormat::Bmp,
            ImageEncoding::Png => ImageFormat::Png,
            ImageEncoding::Jpeg => ImageFormat::Jpeg,
            ImageEncoding::Gif => ImageFormat::Gif,
        };
        image::load_from_memory_with_format(bytes, format)
            .map_err(|e| DataTransferError::ImageDecode(e.to_string()))
    }
}

// ===== DIB Functions =====

fn dib_too_large() -> DataTransferError {
    DataTransferError::InvalidData("DIB dimensions too large".to_string())
}

/// Create a top-down 32-bit DIB from an image
pub fn create_dib_from_image(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgba = image.to_rgba8();
    let (width, height) = (rgba.width(), rgba.height());

    let image_size = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(dib_too_large)?;
    let bi_width = i32::try_from(width).map_err(|_| dib_too_large())?;
    let bi_height = i32::try_from(height).map_err(|_| dib_too_large())?;

    let mut dib = BytesMut::with_capacity(BITMAPINFOHEADER_LEN + image_size as usize);

    // BITMAPINFOHEADER structure (40 bytes)
    dib.put_u32_le(BITMAPINFOHEADER_LEN as u32); // biSize
    dib.put_i32_le(bi_width); // biWidth
    dib.put_i32_le(-bi_height); // biHeight (negative for top-down)
    dib.put_u16_le(1); // biPlanes
    dib.put_u16_le(32); // biBitCount (32 bits for BGRA)
    dib.put_u32_le(0); // biCompression (BI_RGB = 0)
    dib.put_u32_le(image_size); // biSizeImage
    dib.put_i32_le(0); // biXPelsPerMeter
    dib.put_i32_le(0); // biYPelsPerMeter
    dib.put_u32_le(0); // biClrUsed
    dib.put_u32_le(0); // biClrImportant

    // RGBA to BGRA
    for pixel in rgba.pixels() {
        dib.put_u8(pixel[2]);
        dib.put_u8(pixel[1]);
        dib.put_u8(pixel[0]);
        dib.put_u8(pixel[3]);
    }

    Ok(dib.to_vec())
}

/// Parse a 24- or 32-bit DIB, either row order
pub fn parse_dib_to_image(dib_data: &[u8]) -> Result<DynamicImage> {
    if dib_data.len() < BITMAPINFOHEADER_LEN {
        return Err(DataTransferError::InvalidData("DIB too small".to_string()));
    }

    let bi_size = u32::from_le_bytes([dib_data[0], dib_data[1], dib_data[2], dib_data[3]]) as usize;
    if bi_size < BITMAPINFOHEADER_LEN || bi_size > dib_data.len() {
        return Err(DataTransferError::InvalidData("invalid DIB header".to_string()));
    }

    let raw_width = i32::from_le_bytes([dib_data[4], dib_data[5], dib_data[6], dib_data[7]]);
    let raw_height = i32::from_le_bytes([dib_data[8], dib_data[9], dib_data[10], dib_data[11]]);
    let bit_count = u16::from_le_bytes([dib_data[14], dib_data[15]]);

    let width = raw_width.unsigned_abs();
    let height = raw_height.unsigned_abs();
    let bottom_up = raw_height > 0;

    let bytes_per_pixel = match bit_count {
        32 => 4,
        24 => 3,
        other => {
            return Err(DataTransferError::ImageDecode(format!(
                "unsupported DIB bit depth: {other}"
            )))
        }
    };

    let (width_px, height_px) = (width as usize, height as usize);

    // Rows are padded to 4 bytes
    let row_len = width_px.checked_mul(bytes_per_pixel).ok_or_else(dib_too_large)?;
    let row_size = row_len.checked_add(3).ok_or_else(dib_too_large)? / 4 * 4;
    let image_len = row_size.checked_mul(height_px).ok_or_else(dib_too_large)?;
    let rgba_len = width_px
        .checked_mul(height_px)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(dib_too_large)?;

    let pixel_data = &dib_data[bi_size..];
    if pixel_data.len() < image_len {
        return Err(DataTransferError::InvalidData("DIB pixel data truncated".to_string()));
    }

    let mut rgba = Vec::with_capacity(rgba_len);
    for y in 0..height_px {
        let src_row = if bottom_up { height_px - 1 - y } else { y };
        let start = src_row * row_size;
        let row = &pixel_data[start..start + row_len];
        for px in row.chunks_exact(bytes_per_pixel) {
            let alpha = if bytes_per_pixel == 4 { px[3] } else { 255 };
            rgba.extend_from_slice(&[px[2], px[1], px[0], alpha]);
        }
    }

    image::RgbaImage::from_raw(width, height, rgba)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| DataTransferError::ImageDecode("failed to build image from DIB".to_string()))
}

/// Wrap a DIB in a BMP file header
pub fn dib_to_bmp(dib_data: &[u8]) -> Result<Vec<u8>> {
    if dib_data.len() < BITMAPINFOHEADER_LEN {
        return Err(DataTransferError::InvalidData("DIB too small".to_string()));
    }

    let bi_size = u32::from_le_bytes([dib_data[0], dib_data[1], dib_data[2], dib_data[3]]);
    let file_size = (BMP_FILE_HEADER_LEN + dib_data.len()) as u32;
    let pixel_offset = BMP_FILE_HEADER_LEN as u32 + bi_size;

    let mut bmp = BytesMut::with_capacity(file_size as usize);
    bmp.put_slice(b"BM");
    bmp.put_u32_le(file_size);
    bmp.put_u16_le(0);
    bmp.put_u16_le(0);
    bmp.put_u32_le(pixel_offset);
    bmp.put_slice(dib_data);

    Ok(bmp.to_vec())
}
