use std::f32::consts::PI;

use image::GrayImage;

use crate::contours::{find_contours, find_holes};
use crate::error::{AnalysisError, Degradable};
use crate::geometry::{approx_poly_dp, convex_hull, polygon_area};
use crate::model::FeatureSet;
use crate::types::FeatureConfig;

pub struct FeatureExtractor {
    cfg: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(cfg: FeatureConfig) -> Self {
        Self { cfg }
    }

    /// Measure a character (ink = 255, both images cropped to its bounding box).
    ///
    /// Shape measures come from the character's own component in `mask`;
    /// strokes and loops are counted on the full binary `crop`.
    pub fn extract(&self, mask: &GrayImage, crop: &GrayImage) -> Result<FeatureSet, AnalysisError> {
        let (w, h) = mask.dimensions();
        if w == 0 || h == 0 {
            return Err(AnalysisError::Features("empty character crop".to_string()));
        }

        let contours = find_contours(mask);
        let largest = contours
            .iter()
            .max_by(|a, b| a.area().total_cmp(&b.area()))
            .ok_or_else(|| AnalysisError::Features("no ink in character crop".to_string()))?;

        let area = largest.area();
        let perimeter = largest.perimeter();
        let circularity = if perimeter > 0.0 {
            4.0 * PI * area / (perimeter * perimeter)
        } else {
            0.0
        };

        let has_loop = find_holes(crop)
            .iter()
            .any(|hole| hole.area > self.cfg.min_loop_area);

        let simplified = approx_poly_dp(&largest.points, self.cfg.curve_epsilon_fraction * perimeter);
        let has_curve = simplified.len() > self.cfg.curve_min_vertices;

        let stroke_count = find_contours(crop)
            .iter()
            .filter(|c| c.area() > self.cfg.min_stroke_area)
            .count() as u32;

        let hull_area = polygon_area(&convex_hull(&largest.points));
        let solidity = if hull_area > 0.0 { area / hull_area } else { 0.0 };

        Ok(FeatureSet {
            area,
            perimeter,
            aspect_ratio: w as f32 / h as f32,
            circularity,
            has_loop,
            has_curve,
            stroke_count,
            solidity,
        })
    }

    /// Like [`extract`](Self::extract) but falls back to the safe default on failure.
    pub fn extract_or_default(&self, mask: &GrayImage, crop: &GrayImage) -> Degradable<FeatureSet> {
        Degradable::from_result(self.extract(mask, crop), FeatureSet::default())
    }
}
