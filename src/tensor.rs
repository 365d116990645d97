//! Image tensor convention
//!
//! Every image handed back to the host is a dense `(1, H, W, 3)` `f32`
//! array with samples in `[0, 1]`. This module converts decoded buffers
//! into that shape and back out again for saving.

use crate::error::{RawError, Result};
use fast_image_resize as fr;
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use ndarray::{Array3, Array4, Axis};

/// `(batch=1, height, width, channels=3)` float image
pub type ImageTensor = Array4<f32>;

/// Long-edge limit applied to embedded previews
pub const PREVIEW_MAX_EDGE: u32 = 1024;

/// 1x1 black image returned when no auxiliary image can be recovered
pub fn black_pixel() -> ImageTensor {
    Array4::zeros((1, 1, 1, 3))
}

/// Returns true for the 1x1 all-zero sentinel
pub fn is_sentinel(tensor: &ImageTensor) -> bool {
    tensor.shape() == [1, 1, 1, 3] && tensor.iter().all(|&v| v == 0.0)
}

/// Fixed linear rescale of an `H x W x 3` buffer, with the batch axis prepended.
///
/// Values are not clamped.
pub fn normalize<T>(pixels: &Array3<T>, divisor: f32) -> ImageTensor
where
    T: Copy + Into<f32>,
{
    pixels.mapv(|v| v.into() / divisor).insert_axis(Axis(0))
}

pub fn rgb8_to_tensor(img: &RgbImage) -> ImageTensor {
    let (width, height) = img.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        img.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
    .insert_axis(Axis(0))
}

/// Decode a JPEG payload and force it to 3-channel RGB
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    Ok(img.to_rgb8())
}

/// Target size when clamping the long edge to `max_edge`.
///
/// The short edge scales proportionally, rounded to the nearest pixel.
pub fn fit_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let long = width.max(height);
    if long <= max_edge {
        return (width, height);
    }

    let scale = max_edge as f64 / long as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).max(1);

    if width >= height {
        (max_edge, scaled(height))
    } else {
        (scaled(width), max_edge)
    }
}

/// Downscale with Lanczos3 so the long edge is at most `max_edge`
pub fn fit_long_edge(img: RgbImage, max_edge: u32) -> Result<RgbImage> {
    let (width, height) = img.dimensions();
    let (dst_width, dst_height) = fit_dimensions(width, height, max_edge);
    if (dst_width, dst_height) == (width, height) {
        return Ok(img);
    }

    let src_image = fr::images::Image::from_vec_u8(width, height, img.into_raw(), fr::PixelType::U8x3)
        .map_err(|e| RawError::Resize(format!("Failed to create source image: {:?}", e)))?;
    let mut dst_image = fr::images::Image::new(dst_width, dst_height, src_image.pixel_type());

    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3));
    let mut resizer = fr::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, &options)
        .map_err(|e| RawError::Resize(format!("{:?}", e)))?;

    RgbImage::from_raw(dst_width, dst_height, dst_image.buffer().to_vec())
        .ok_or_else(|| RawError::Resize("resized buffer has the wrong length".to_string()))
}

fn dims(tensor: &ImageTensor) -> (u32, u32) {
    let shape = tensor.shape();
    (shape[2] as u32, shape[1] as u32)
}

/// First batch entry as 8-bit RGB, clamped
pub fn tensor_to_rgb8(tensor: &ImageTensor) -> RgbImage {
    let (width, height) = dims(tensor);
    ImageBuffer::from_fn(width, height, |x, y| {
        let px = |c: usize| (tensor[[0, y as usize, x as usize, c]].clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgb([px(0), px(1), px(2)])
    })
}

/// First batch entry as 16-bit RGB, clamped
pub fn tensor_to_rgb16(tensor: &ImageTensor) -> ImageBuffer<Rgb<u16>, Vec<u16>> {
    let (width, height) = dims(tensor);
    ImageBuffer::from_fn(width, height, |x, y| {
        let px = |c: usize| (tensor[[0, y as usize, x as usize, c]].clamp(0.0, 1.0) * 65535.0).round() as u16;
        Rgb([px(0), px(1), px(2)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_black_pixel_sentinel() {
        let black = black_pixel();
        assert_eq!(black.shape(), &[1, 1, 1, 3]);
        assert!(is_sentinel(&black));
        assert!(!is_sentinel(&Array4::ones((1, 1, 1, 3))));
    }

    #[test]
    fn test_normalize_16bit() {
        let pixels = Array3::<u16>::from_elem((4, 6, 3), 65535);
        let tensor = normalize(&pixels, 65535.0);
        assert_eq!(tensor.shape(), &[1, 4, 6, 3]);
        assert!((tensor.fold(0.0f32, |m, &v| m.max(v)) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_normalize_does_not_clamp() {
        // 16-bit data divided as if it were 8-bit
        let pixels = Array3::<u16>::from_elem((1, 1, 3), 510);
        let tensor = normalize(&pixels, 255.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 2.0);
    }

    #[test]
    fn test_fit_dimensions() {
        assert_eq!(fit_dimensions(800, 600, 1024), (800, 600));
        assert_eq!(fit_dimensions(1024, 1024, 1024), (1024, 1024));
        assert_eq!(fit_dimensions(2048, 1536, 1024), (1024, 768));
        assert_eq!(fit_dimensions(1500, 6000, 1024), (256, 1024));
        // 1999 * 1024 / 3000 = 682.33
        assert_eq!(fit_dimensions(3000, 1999, 1024), (1024, 682));
        // 2001 * 1024 / 3000 = 682.99
        assert_eq!(fit_dimensions(3000, 2001, 1024), (1024, 683));
        assert_eq!(fit_dimensions(100_000, 10, 1024), (1024, 1));
    }

    #[test]
    fn test_fit_long_edge_resizes() {
        let img = RgbImage::from_pixel(2000, 1000, Rgb([10, 200, 30]));
        let out = fit_long_edge(img, 1024).unwrap();
        assert_eq!(out.dimensions(), (1024, 512));
        let px = out.get_pixel(512, 256);
        assert!((px[1] as i32 - 200).abs() <= 2);
    }

    #[test]
    fn test_fit_long_edge_passthrough() {
        let img = RgbImage::from_pixel(64, 32, Rgb([1, 2, 3]));
        let out = fit_long_edge(img.clone(), 1024).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_decode_jpeg_red() {
        let bytes = solid_jpeg(50, 30, [255, 0, 0]);
        let tensor = rgb8_to_tensor(&decode_jpeg(&bytes).unwrap());
        assert_eq!(tensor.shape(), &[1, 30, 50, 3]);
        assert!(tensor[[0, 0, 0, 0]] > 0.9);
        assert!(tensor[[0, 0, 0, 1]] < 0.1);
    }

    #[test]
    fn test_decode_jpeg_rejects_garbage() {
        assert!(decode_jpeg(b"\xff\xd8\xff\xe0not really a jpeg").is_err());
    }

    #[test]
    fn test_tensor_roundtrip_to_rgb() {
        let mut tensor = Array4::<f32>::zeros((1, 2, 3, 3));
        tensor[[0, 1, 2, 0]] = 1.0;
        tensor[[0, 1, 2, 2]] = 1.5;
        let rgb8 = tensor_to_rgb8(&tensor);
        assert_eq!(rgb8.dimensions(), (3, 2));
        assert_eq!(rgb8.get_pixel(2, 1), &Rgb([255, 0, 255]));
        let rgb16 = tensor_to_rgb16(&tensor);
        assert_eq!(rgb16.get_pixel(2, 1), &Rgb([65535, 0, 65535]));
    }
}
