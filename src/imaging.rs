//! 图片变换适配层：解码校验、缩放、旋转、对比度与编码。
//!
//! 每个变换消费并返回同一个 [`DynamicImage`]，调用方按固定顺序串联。

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, ImageFormat, Pixel, RgbImage};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("content is not a PNG or JPEG image")]
    NotAnImage,
    #[error("unsupported image format")]
    UnsupportedFormat,
}

/// 只接受 PNG 与 JPEG 内容。
fn detect_format(data: &[u8]) -> Result<ImageFormat, TransformError> {
    match image::guess_format(data) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg)) => Ok(format),
        _ => Err(TransformError::NotAnImage),
    }
}

/// 校验字节流能完整解码为图片。
pub fn verify(data: &[u8]) -> Result<(), TransformError> {
    decode(data).map(|_| ())
}

pub fn decode(data: &[u8]) -> Result<DynamicImage, TransformError> {
    let format = detect_format(data)?;
    image::load_from_memory_with_format(data, format).map_err(TransformError::Decode)
}

/// 按文件扩展名决定输出格式并编码。JPEG 不支持透明通道，编码前先去掉。
pub fn encode_for_path(image: &DynamicImage, name: &str) -> Result<Vec<u8>, TransformError> {
    let format = ImageFormat::from_path(Path::new(name))
        .map_err(|_| TransformError::UnsupportedFormat)?;
    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut out, ImageFormat::Jpeg)
            .map_err(TransformError::Encode)?,
        ImageFormat::Png => image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(TransformError::Encode)?,
        _ => return Err(TransformError::UnsupportedFormat),
    }
    Ok(out.into_inner())
}

pub fn resize(image: DynamicImage, width: u32, height: u32) -> DynamicImage {
    image.resize_exact(width, height, FilterType::CatmullRom)
}

/// 以中心为轴逆时针旋转 `degrees` 度，画布尺寸不变，最近邻采样，空白处填零。
pub fn rotate(image: DynamicImage, degrees: u32) -> DynamicImage {
    let degrees = degrees % 360;
    if degrees == 0 {
        return image;
    }
    match image {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(rotate_buffer(&buf, degrees)),
        DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(rotate_buffer(&buf, degrees)),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(rotate_buffer(&buf, degrees)),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(rotate_buffer(&buf, degrees)),
        DynamicImage::ImageLuma16(buf) => DynamicImage::ImageLuma16(rotate_buffer(&buf, degrees)),
        DynamicImage::ImageRgb16(buf) => DynamicImage::ImageRgb16(rotate_buffer(&buf, degrees)),
        DynamicImage::ImageRgba16(buf) => {
            DynamicImage::ImageRgba16(rotate_buffer(&buf, degrees))
        }
        other => DynamicImage::ImageRgba8(rotate_buffer(&other.to_rgba8(), degrees)),
    }
}

fn rotate_buffer<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    degrees: u32,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
{
    let (width, height) = src.dimensions();
    let mut dst: ImageBuffer<P, Vec<P::Subpixel>> = ImageBuffer::new(width, height);
    let theta = (degrees as f64).to_radians();
    let (sin, cos) = theta.sin_cos();
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;

    for (x, y, pixel) in dst.enumerate_pixels_mut() {
        let dx = x as f64 + 0.5 - cx;
        let dy = y as f64 + 0.5 - cy;
        // y 轴向下，逆时针旋转的反向映射
        let sx = (cos * dx - sin * dy + cx).floor();
        let sy = (sin * dx + cos * dy + cy).floor();
        if sx >= 0.0 && sy >= 0.0 && (sx as u32) < width && (sy as u32) < height {
            *pixel = *src.get_pixel(sx as u32, sy as u32);
        }
    }
    dst
}

/// 对比度增强：以平均亮度为中心线性拉伸，`factor` 为 1 时不变，为 0 时变为纯灰。
pub fn enhance_contrast(image: DynamicImage, factor: f32) -> DynamicImage {
    let mut rgb: RgbImage = match image {
        DynamicImage::ImageRgb8(buf) => buf,
        other => other.to_rgb8(),
    };
    let mean = mean_luma(&rgb);
    for pixel in rgb.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            let value = mean + factor * (*channel as f32 - mean);
            *channel = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    DynamicImage::ImageRgb8(rgb)
}

fn mean_luma(rgb: &RgbImage) -> f32 {
    let count = u64::from(rgb.width()) * u64::from(rgb.height());
    if count == 0 {
        return 0.0;
    }
    let total: u64 = rgb
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            (u64::from(r) * 299 + u64::from(g) * 587 + u64::from(b) * 114) / 1000
        })
        .sum();
    (total as f64 / count as f64).round() as f32
}
