use std::io::Cursor;

use anyhow::Context as _;
use image::{ColorType, DynamicImage, ImageDecoder as _, ImageFormat, ImageReader, Rgb, RgbImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Gray,
    Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Color space when the bytes are a baseline JPEG that can be embedded
    /// as-is, `None` when the image must be re-encoded first.
    pub jpeg: Option<ColorSpace>,
}

/// Reads dimensions and format without decoding pixel data.
pub fn inspect(bytes: &[u8]) -> anyhow::Result<ImageInfo> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("guess image format")?;
    let format = reader.format();
    let decoder = reader.into_decoder().context("read image header")?;
    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();

    let jpeg = match (format, color) {
        (Some(ImageFormat::Jpeg), ColorType::L8) => Some(ColorSpace::Gray),
        (Some(ImageFormat::Jpeg), ColorType::Rgb8) => Some(ColorSpace::Rgb),
        _ => None,
    };
    Ok(ImageInfo {
        width,
        height,
        jpeg,
    })
}

/// Returns `bytes` unchanged when already an embeddable JPEG, otherwise
/// re-encodes the image as an RGB JPEG.
pub fn to_jpeg(bytes: Vec<u8>) -> anyhow::Result<Vec<u8>> {
    if inspect(&bytes)?.jpeg.is_some() {
        return Ok(bytes);
    }
    let decoded = image::load_from_memory(&bytes).context("decode image")?;
    encode_jpeg(DynamicImage::ImageRgb8(decoded.to_rgb8()))
}

/// A white page of the given size.
pub fn blank_jpeg(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    let page = RgbImage::from_pixel(width.max(1), height.max(1), Rgb([255, 255, 255]));
    encode_jpeg(DynamicImage::ImageRgb8(page))
}

fn encode_jpeg(image: DynamicImage) -> anyhow::Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Jpeg)
        .context("encode jpeg")?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    pub(crate) fn jpeg(width: u32, height: u32) -> Vec<u8> {
        to_jpeg(png(width, height)).expect("encode jpeg")
    }

    #[test]
    fn png_is_reencoded_as_rgb_jpeg() -> anyhow::Result<()> {
        let source = png(40, 60);
        assert_eq!(inspect(&source)?.jpeg, None);

        let converted = to_jpeg(source)?;
        let info = inspect(&converted)?;
        assert_eq!((info.width, info.height), (40, 60));
        assert_eq!(info.jpeg, Some(ColorSpace::Rgb));
        Ok(())
    }

    #[test]
    fn jpeg_passes_through_untouched() -> anyhow::Result<()> {
        let original = jpeg(16, 16);
        assert_eq!(to_jpeg(original.clone())?, original);
        Ok(())
    }

    #[test]
    fn blank_page_has_requested_size() -> anyhow::Result<()> {
        let info = inspect(&blank_jpeg(200, 258)?)?;
        assert_eq!((info.width, info.height), (200, 258));
        Ok(())
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(inspect(b"not an image").is_err());
    }
}
