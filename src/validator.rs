//! Heuristic gate deciding whether an image plausibly shows handwriting, plus
//! a photo quality report with user-facing suggestions.

use image::{GrayImage, RgbImage};
use imageproc::edges::canny;
use tracing::debug;

use crate::image_impl::RasterImage;
use crate::model::{ContentType, ImageQuality, ValidatorVerdict};
use crate::preprocess::{mean_intensity, std_dev};
use crate::types::ValidatorConfig;

/// Optional face detection hook; returns the number of faces found.
pub trait FaceDetector: Send + Sync {
    fn detect_faces(&self, image: &RgbImage) -> usize;
}

pub struct ContentValidator {
    cfg: ValidatorConfig,
    face_detector: Option<Box<dyn FaceDetector>>,
}

impl ContentValidator {
    pub fn new(cfg: ValidatorConfig) -> Self {
        Self {
            cfg,
            face_detector: None,
        }
    }

    pub fn with_face_detector(mut self, detector: Box<dyn FaceDetector>) -> Self {
        self.face_detector = Some(detector);
        self
    }

    /// Checks run in a fixed order and the first failing one decides the verdict.
    pub fn validate(&self, image: &RasterImage) -> ValidatorVerdict {
        let gray = image.to_gray();
        let (w, h) = gray.dimensions();

        let sd = std_dev(&gray);
        if sd < self.cfg.min_std_dev {
            return reject(
                ContentType::UniformColor,
                format!("Image is almost a single color (std dev {sd:.1}); it looks like a blank page"),
            );
        }

        if w < self.cfg.min_width || h < self.cfg.min_height {
            return reject(
                ContentType::TooSmall,
                format!(
                    "Image is too small ({w}x{h}); at least {}x{} is needed",
                    self.cfg.min_width, self.cfg.min_height
                ),
            );
        }

        let density = edge_density(&gray, self.cfg.canny_low, self.cfg.canny_high);
        debug!(std_dev = sd, edge_density = density, "validator measurements");
        if density < self.cfg.min_edge_density {
            return reject(
                ContentType::NoContent,
                "No handwriting detected: the image has almost no strokes".to_string(),
            );
        }
        if density > self.cfg.max_edge_density {
            return reject(
                ContentType::ComplexScene,
                "Image looks like a busy scene rather than a page of handwriting".to_string(),
            );
        }

        let rgb = image.to_rgb8();
        let skin = skin_ratio(&rgb);
        if skin > self.cfg.max_skin_ratio {
            return reject(
                ContentType::PersonPhoto,
                format!("Image looks like a photo of a person ({:.0}% skin tones)", skin * 100.0),
            );
        }

        if let Some(detector) = &self.face_detector {
            let faces = detector.detect_faces(&rgb);
            if faces > 0 {
                return reject(
                    ContentType::Face,
                    format!("Detected {faces} face(s) in the image"),
                );
            }
        }

        ValidatorVerdict {
            is_handwriting: true,
            detected_type: ContentType::Handwriting,
            message: "Image appears to contain handwriting".to_string(),
        }
    }
}

fn reject(detected_type: ContentType, message: String) -> ValidatorVerdict {
    ValidatorVerdict {
        is_handwriting: false,
        detected_type,
        message,
    }
}

/// Fraction of pixels marked as edges by Canny.
pub fn edge_density(gray: &GrayImage, low: f32, high: f32) -> f32 {
    let total = gray.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    let edges = canny(gray, low, high);
    let count = edges.as_raw().iter().filter(|&&p| p > 0).count();
    count as f32 / total as f32
}

/// Fraction of pixels in the HSV skin band (H <= 50 deg, 0.23 <= S <= 0.68, V >= 0.35).
pub fn skin_ratio(rgb: &RgbImage) -> f32 {
    let total = rgb.width() as usize * rgb.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let skin = rgb
        .pixels()
        .filter(|p| {
            let (h, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
            h <= 50.0 && (0.23..=0.68).contains(&s) && v >= 0.35
        })
        .count();
    skin as f32 / total as f32
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

/// Summed absolute row and column differences per pixel.
fn sharpness(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let mut total = 0u64;
    for y in 0..h {
        for x in 0..w {
            let p = gray.get_pixel(x, y)[0] as i32;
            if x + 1 < w {
                total += (gray.get_pixel(x + 1, y)[0] as i32 - p).unsigned_abs() as u64;
            }
            if y + 1 < h {
                total += (gray.get_pixel(x, y + 1)[0] as i32 - p).unsigned_abs() as u64;
            }
        }
    }
    total as f32 / (w as f32 * h as f32)
}

pub fn assess_quality(gray: &GrayImage) -> ImageQuality {
    let (width, height) = gray.dimensions();
    let brightness = mean_intensity(gray);
    let contrast = std_dev(gray);
    let sharp = sharpness(gray);
    let level = brightness - contrast;
    let total = (width as usize * height as usize).max(1);
    let dark = gray.as_raw().iter().filter(|&&p| (p as f32) < level).count();
    let text_density = dark as f32 / total as f32;

    let mut issues = Vec::new();
    let mut suggestions = Vec::new();
    let mut flag = |issue: &str, suggestion: &str| {
        issues.push(issue.to_string());
        suggestions.push(suggestion.to_string());
    };

    if brightness < 80.0 {
        flag("Image is too dark", "Increase lighting");
    } else if brightness > 200.0 {
        flag("Image is overexposed", "Reduce lighting");
    }
    if contrast < 30.0 {
        flag("Low contrast", "Use darker ink");
    }
    if sharp < 50.0 {
        flag("Image appears blurry", "Hold camera steady");
    }
    if width < 300 || height < 300 {
        flag("Low resolution", "Take photo closer");
    }
    if text_density < 0.02 {
        flag("Very little text detected", "Ensure handwriting fills image");
    }

    ImageQuality {
        brightness,
        contrast,
        sharpness: sharp,
        text_density,
        width,
        height,
        issues,
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn page_with_strokes(w: u32, h: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([235]));
        for i in 0..8u32 {
            let x0 = 20 + i * 40;
            for y in 40..90 {
                for x in x0..x0 + 4 {
                    img.put_pixel(x, y, Luma([20]));
                }
            }
            for x in x0..x0 + 25 {
                for y in 60..63 {
                    img.put_pixel(x, y, Luma([20]));
                }
            }
        }
        img
    }

    struct AlwaysFace;

    impl FaceDetector for AlwaysFace {
        fn detect_faces(&self, _image: &RgbImage) -> usize {
            1
        }
    }

    #[test]
    fn test_blank_page_is_uniform_color() {
        let img = RasterImage::from(GrayImage::from_pixel(40, 40, Luma([255])));
        let verdict = ContentValidator::new(ValidatorConfig::default()).validate(&img);
        assert!(!verdict.is_handwriting);
        assert_eq!(verdict.detected_type, ContentType::UniformColor);
    }

    #[test]
    fn test_small_image_is_too_small() {
        let page = page_with_strokes(360, 120);
        let img = RasterImage::from(image::imageops::crop_imm(&page, 0, 30, 90, 40).to_image());
        let verdict = ContentValidator::new(ValidatorConfig::default()).validate(&img);
        assert_eq!(verdict.detected_type, ContentType::TooSmall);
    }

    #[test]
    fn test_strokes_pass_as_handwriting() {
        let img = RasterImage::from(page_with_strokes(360, 120));
        let verdict = ContentValidator::new(ValidatorConfig::default()).validate(&img);
        assert!(verdict.is_handwriting, "{}", verdict.message);
        assert_eq!(verdict.detected_type, ContentType::Handwriting);
    }

    #[test]
    fn test_face_detector_rejects() {
        let img = RasterImage::from(page_with_strokes(360, 120));
        let validator =
            ContentValidator::new(ValidatorConfig::default()).with_face_detector(Box::new(AlwaysFace));
        assert_eq!(validator.validate(&img).detected_type, ContentType::Face);
    }

    #[test]
    fn test_skin_tones_detected() {
        let mut rgb = RgbImage::from_pixel(10, 10, Rgb([224, 172, 140]));
        assert!(skin_ratio(&rgb) > 0.99);
        for p in rgb.pixels_mut() {
            *p = Rgb([40, 90, 200]);
        }
        assert_eq!(skin_ratio(&rgb), 0.0);
    }

    #[test]
    fn test_quality_flags_dark_small_image() {
        let img = GrayImage::from_pixel(50, 50, Luma([30]));
        let q = assess_quality(&img);
        assert!(q.issues.contains(&"Image is too dark".to_string()));
        assert!(q.issues.contains(&"Low resolution".to_string()));
        assert!(q.suggestions.contains(&"Use darker ink".to_string()));
        assert_eq!(q.issues.len(), q.suggestions.len());
        assert_eq!(q.sharpness, 0.0);
    }
}
