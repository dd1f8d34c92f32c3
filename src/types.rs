use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::PageSegMode;
use crate::error::AnalysisError;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Median filter radius applied before moderate enhancement.
    pub median_radius: u32,
    pub enhanced_min_side: u32,
    pub enhanced_contrast: f32,
    pub aggressive_min_side: u32,
    pub aggressive_contrast: f32,
    pub unsharp_sigma: f32,
    pub unsharp_threshold: i32,
    pub include_inverted: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            median_radius: 1,
            enhanced_min_side: 300,
            enhanced_contrast: 2.0,
            aggressive_min_side: 600,
            aggressive_contrast: 3.0,
            unsharp_sigma: 1.0,
            unsharp_threshold: 2,
            include_inverted: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub min_std_dev: f32,
    pub min_width: u32,
    pub min_height: u32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub min_edge_density: f32,
    pub max_edge_density: f32,
    pub max_skin_ratio: f32,
    /// Stop the pipeline when the verdict is not handwriting.
    pub reject_non_handwriting: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_std_dev: 8.0,
            min_width: 100,
            min_height: 50,
            canny_low: 50.0,
            canny_high: 150.0,
            min_edge_density: 0.002,
            max_edge_density: 0.25,
            max_skin_ratio: 0.30,
            reject_non_handwriting: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub confidence: f32,
    pub alphabetic: f32,
    pub length: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            confidence: 0.6,
            alphabetic: 0.3,
            length: 0.1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub tesseract_cmd: PathBuf,
    pub modes: Vec<PageSegMode>,
    pub weights: ScoreWeights,
    /// Size of the attempt pool; 0 means one per CPU.
    pub workers: usize,
    pub attempt_timeout_ms: u64,
    /// Lines are grouped when centre distance is below this fraction of the median glyph height.
    pub line_merge_factor: f32,
    pub postprocess: bool,
}

impl RecognitionConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: PathBuf::from("tesseract"),
            modes: vec![
                PageSegMode::SingleBlock,
                PageSegMode::SingleWord,
                PageSegMode::SingleLine,
                PageSegMode::RawLine,
                PageSegMode::Auto,
                PageSegMode::SparseText,
            ],
            weights: ScoreWeights::default(),
            workers: 0,
            attempt_timeout_ms: 20_000,
            line_merge_factor: 0.5,
            postprocess: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub max_plausible_components: usize,
    pub min_area_floor: f32,
    pub min_area_fraction: f32,
    pub max_area_fraction: f32,
    pub min_box_side: u32,
    pub split_aspect: f32,
    pub valley_percentile: f32,
    pub min_slice_width: u32,
    pub min_slice_height_fraction: f32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_plausible_components: 150,
            min_area_floor: 30.0,
            min_area_fraction: 5e-5,
            max_area_fraction: 0.10,
            min_box_side: 5,
            split_aspect: 1.8,
            valley_percentile: 0.30,
            min_slice_width: 5,
            min_slice_height_fraction: 0.25,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub min_loop_area: u32,
    pub curve_epsilon_fraction: f32,
    pub curve_min_vertices: usize,
    pub min_stroke_area: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_loop_area: 20,
            curve_epsilon_fraction: 0.02,
            curve_min_vertices: 6,
            min_stroke_area: 10.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierStrategy {
    Template,
    Glyph,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub strategy: ClassifierStrategy,
    pub canvas_size: usize,
    pub fit_size: u32,
    pub min_score: f32,
    pub max_candidates: usize,
    pub glyph_whitelist: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            strategy: ClassifierStrategy::Template,
            canvas_size: 32,
            fit_size: 28,
            min_score: 0.25,
            max_candidates: 3,
            glyph_whitelist: "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub incomplete_curve_circularity: f32,
    pub unclosed_loop_circularity: f32,
    pub flipped_aspect: f32,
    pub compressed_aspect: f32,
    pub max_strokes: u32,
    /// Word reach is `reach_factor * (w + 2h)` of the token box.
    pub reach_factor: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            incomplete_curve_circularity: 0.3,
            unclosed_loop_circularity: 0.6,
            flipped_aspect: 2.5,
            compressed_aspect: 0.3,
            max_strokes: 2,
            reach_factor: 1.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    /// Defaults to the system temp directory.
    pub output_dir: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub font_scale: f32,
    pub high_confidence: f32,
    pub medium_confidence: f32,
    pub dot_radius: i32,
}

impl OverlayConfig {
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: None,
            font_path: None,
            font_scale: 16.0,
            high_confidence: 0.7,
            medium_confidence: 0.4,
            dot_radius: 4,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocess: PreprocessConfig,
    pub validator: ValidatorConfig,
    pub recognition: RecognitionConfig,
    pub segment: SegmentConfig,
    pub features: FeatureConfig,
    pub classifier: ClassifierConfig,
    pub analyzer: AnalyzerConfig,
    pub overlay: OverlayConfig,
}

impl PipelineConfig {
    /// Load overrides from a JSON file; missing fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, AnalysisError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, AnalysisError> {
        serde_json::from_str(data).map_err(|e| AnalysisError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = PipelineConfig::from_json_str(
            r#"{"recognition": {"weights": {"confidence": 0.8}, "modes": ["single_line"]},
                "validator": {"reject_non_handwriting": true}}"#,
        )
        .unwrap();
        assert_eq!(cfg.recognition.weights.confidence, 0.8);
        assert_eq!(cfg.recognition.weights.alphabetic, 0.3);
        assert_eq!(cfg.recognition.modes, vec![PageSegMode::SingleLine]);
        assert!(cfg.validator.reject_non_handwriting);
        assert_eq!(cfg.segment.max_plausible_components, 150);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        assert!(matches!(
            PipelineConfig::from_json_str("{not json"),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn test_default_modes_and_workers() {
        let cfg = RecognitionConfig::default();
        assert_eq!(cfg.modes.len(), 6);
        assert!(cfg.worker_count() >= 1);
        assert_eq!(cfg.attempt_timeout(), Duration::from_secs(20));
    }
}
