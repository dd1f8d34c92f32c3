use image::imageops;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::median_filter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnalysisError;
use crate::geometry::increase_min_side;
use crate::types::PreprocessConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Grayscale,
    Enhanced,
    Aggressive,
}

/// A derived grayscale image handed to the recognition engine.
#[derive(Clone, Debug)]
pub struct ImageVariant {
    pub kind: VariantKind,
    pub inverted: bool,
    pub image: GrayImage,
    /// Variant size / original size.
    pub scale: f32,
}

pub struct PreProcess {
    cfg: PreprocessConfig,
}

impl PreProcess {
    pub fn new(cfg: PreprocessConfig) -> Self {
        Self { cfg }
    }

    /// Build every variant, in a fixed order: grayscale, enhanced, aggressive,
    /// then their inverted copies when enabled.
    pub fn run(&self, gray: &GrayImage) -> Result<Vec<ImageVariant>, AnalysisError> {
        if gray.width() == 0 || gray.height() == 0 {
            return Err(AnalysisError::Preprocess("empty input image".to_string()));
        }

        let mut variants = vec![
            ImageVariant {
                kind: VariantKind::Grayscale,
                inverted: false,
                image: gray.clone(),
                scale: 1.0,
            },
            self.enhanced(gray)?,
            self.aggressive(gray)?,
        ];

        if self.cfg.include_inverted {
            let inverted: Vec<ImageVariant> = variants
                .iter()
                .map(|v| {
                    let mut image = v.image.clone();
                    imageops::invert(&mut image);
                    ImageVariant {
                        kind: v.kind,
                        inverted: true,
                        image,
                        scale: v.scale,
                    }
                })
                .collect();
            variants.extend(inverted);
        }

        debug!(count = variants.len(), "built image variants");
        Ok(variants)
    }

    fn enhanced(&self, gray: &GrayImage) -> Result<ImageVariant, AnalysisError> {
        let r = self.cfg.median_radius;
        let denoised = if r > 0 { median_filter(gray, r, r) } else { gray.clone() };
        let (resized, scale) = increase_min_side(&denoised, self.cfg.enhanced_min_side)?;
        let contrasted = adjust_contrast(&resized, self.cfg.enhanced_contrast);
        let level = mean_intensity(&contrasted);
        Ok(ImageVariant {
            kind: VariantKind::Enhanced,
            inverted: false,
            image: threshold_above(&contrasted, level),
            scale,
        })
    }

    fn aggressive(&self, gray: &GrayImage) -> Result<ImageVariant, AnalysisError> {
        let (resized, scale) = increase_min_side(gray, self.cfg.aggressive_min_side)?;
        let contrasted = adjust_contrast(&resized, self.cfg.aggressive_contrast);
        let sharpened = imageops::unsharpen(
            &contrasted,
            self.cfg.unsharp_sigma,
            self.cfg.unsharp_threshold,
        );
        let level = percentile_level(&sharpened, 0.5) as f32;
        Ok(ImageVariant {
            kind: VariantKind::Aggressive,
            inverted: false,
            image: threshold_above(&sharpened, level),
            scale,
        })
    }
}

pub fn mean_intensity(img: &GrayImage) -> f32 {
    let n = img.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    let sum: u64 = img.as_raw().iter().map(|&p| p as u64).sum();
    sum as f32 / n as f32
}

/// Population standard deviation of pixel intensities.
pub fn std_dev(img: &GrayImage) -> f32 {
    let n = img.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    let mean = mean_intensity(img) as f64;
    let var: f64 = img
        .as_raw()
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    var.sqrt() as f32
}

/// Smallest intensity whose cumulative share reaches `fraction`.
pub fn percentile_level(img: &GrayImage, fraction: f32) -> u8 {
    let mut hist = [0u64; 256];
    for &p in img.as_raw() {
        hist[p as usize] += 1;
    }
    let total = img.as_raw().len() as f64;
    let target = (fraction.clamp(0.0, 1.0) as f64 * total).max(1.0);
    let mut acc = 0u64;
    for (level, &count) in hist.iter().enumerate() {
        acc += count;
        if acc as f64 >= target {
            return level as u8;
        }
    }
    255
}

/// Mean-pivoted contrast stretch: `mean + factor * (p - mean)`.
pub fn adjust_contrast(img: &GrayImage, factor: f32) -> GrayImage {
    let mean = mean_intensity(img);
    let mut out = img.clone();
    for p in out.pixels_mut() {
        let v = mean + factor * (p[0] as f32 - mean);
        p[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Pixels strictly above `level` become white, the rest black.
pub fn threshold_above(img: &GrayImage, level: f32) -> GrayImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        if img.get_pixel(x, y)[0] as f32 > level {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}
