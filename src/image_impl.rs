//! Owned raster image used as the pipeline input.
//!
//! Every derived view (grayscale, RGB, variants) is a fresh buffer; the
//! original bitmap is never mutated after decoding.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, GenericImageView, GrayImage, ImageReader, RgbImage};

use crate::error::AnalysisError;

#[derive(Clone, Debug)]
pub struct RasterImage {
    image: DynamicImage,
}

impl RasterImage {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Decode from an in-memory encoded file (PNG, JPEG).
    pub fn from_bytes(data: &[u8]) -> Result<Self, AnalysisError> {
        if data.is_empty() {
            return Err(AnalysisError::InvalidImage("empty image data".to_string()));
        }
        let img = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| AnalysisError::InvalidImage(e.to_string()))?
            .decode()
            .map_err(|e| AnalysisError::InvalidImage(e.to_string()))?;
        Self::checked(img)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AnalysisError::InvalidImage(format!(
                "image file not found: {}",
                path.display()
            )));
        }
        let img = image::open(path).map_err(|e| AnalysisError::InvalidImage(e.to_string()))?;
        Self::checked(img)
    }

    fn checked(image: DynamicImage) -> Result<Self, AnalysisError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(AnalysisError::InvalidImage("image has zero size".to_string()));
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    /// Bits per pixel of the decoded color type.
    pub fn color_depth(&self) -> u16 {
        self.image.color().bits_per_pixel()
    }

    pub fn to_gray(&self) -> GrayImage {
        self.image.to_luma8()
    }

    pub fn to_rgb8(&self) -> RgbImage {
        self.image.to_rgb8()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    /// Encode to `path`; the format follows the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AnalysisError> {
        self.image.save(path)?;
        Ok(())
    }
}

impl From<DynamicImage> for RasterImage {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

impl From<GrayImage> for RasterImage {
    fn from(image: GrayImage) -> Self {
        Self::new(DynamicImage::ImageLuma8(image))
    }
}

impl From<RgbImage> for RasterImage {
    fn from(image: RgbImage) -> Self {
        Self::new(DynamicImage::ImageRgb8(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Luma};

    #[test]
    fn test_from_bytes_roundtrips_png() {
        let img = GrayImage::from_pixel(12, 8, Luma([200]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();

        let raster = RasterImage::from_bytes(&buf).unwrap();
        assert_eq!(raster.dimensions(), (12, 8));
        assert_eq!(raster.to_gray().get_pixel(3, 3)[0], 200);
        assert_eq!(raster.color_depth(), 8);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(matches!(
            RasterImage::from_bytes(b"definitely not a png"),
            Err(AnalysisError::InvalidImage(_))
        ));
        assert!(matches!(
            RasterImage::from_bytes(&[]),
            Err(AnalysisError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_save_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        RasterImage::from(GrayImage::from_pixel(5, 4, Luma([42]))).save(&path).unwrap();
        let back = RasterImage::open(&path).unwrap();
        assert_eq!(back.dimensions(), (5, 4));
        assert_eq!(back.to_gray().get_pixel(0, 0)[0], 42);
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            RasterImage::open("/nonexistent/scrawl/page.png"),
            Err(AnalysisError::InvalidImage(_))
        ));
    }
}
