//! # Scrawl - handwriting image analysis
//!
//! Scrawl takes a photographed or scanned page of handwriting, checks that it
//! really shows handwriting, transcribes it through a text-recognition engine
//! (Tesseract by default), segments and measures the individual letters and
//! turns the measurements into per-word, per-character feedback plus an
//! annotated overlay image.
//!
//! ## Features
//!
//! - **Variant search**: several preprocessed variants × page-segmentation
//!   modes, scored and selected deterministically
//! - **Character shapes**: contour-based segmentation, loop/curve/stroke
//!   measurements and template letter hypotheses
//! - **Feedback**: rule-based issues mapped back onto recognized words
//! - **Graceful**: a missing engine or a bad region degrades the result
//!   instead of failing the call
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scrawl::{HandwritingAnalyzer, PipelineConfig};
//!
//! let analyzer = HandwritingAnalyzer::new(PipelineConfig::default())?;
//! let result = analyzer.recognize_path("page.jpg", "en");
//!
//! println!("{} ({:.2})", result.recognized_text, result.confidence);
//! for word in &result.word_feedback {
//!     for issue in &word.issues {
//!         println!("{} #{}: {}", word.word_text, issue.char_index, issue.suggestion);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Core modules
mod cls;
mod contours;
mod engine;
mod error;
mod features;
mod feedback;
mod geometry;
mod image_impl;
mod model;
mod overlay;
mod pipeline;
mod postprocess;
mod preprocess;
mod rec;
mod segment;
mod types;
mod validator;
mod word_map;

// Public API exports
pub use crate::cls::{CharacterClassifier, GlyphClassifier, TemplateClassifier};
pub use crate::engine::{engine_language, parse_tsv, EngineError, GlyphGuess, PageSegMode, RecognitionEngine, TesseractEngine};
pub use crate::error::{AnalysisError, Degradable};
pub use crate::features::FeatureExtractor;
pub use crate::geometry::BBox;
pub use crate::image_impl::RasterImage;
pub use crate::model::{
    AnalysisResult, Candidate, CharacterAnalysis, CharacterIssue, CharacterRegion, ContentType, Correction,
    FeatureSet, ImageQuality, Issue, IssueKind, OcrConfusion, TranscriptSource, ValidatorVerdict, WordFeedback,
    WordToken,
};
pub use crate::pipeline::{AnalysisContext, Pipeline};
pub use crate::segment::{Segment, Segmenter};
pub use crate::types::{
    AnalyzerConfig, ClassifierConfig, ClassifierStrategy, FeatureConfig, OverlayConfig, PipelineConfig,
    PreprocessConfig, RecognitionConfig, ScoreWeights, SegmentConfig, ValidatorConfig,
};
pub use crate::validator::FaceDetector;

use std::path::Path;
use std::sync::Arc;

const DEFAULT_STEM: &str = "scrawl";

/// Main analysis interface.
pub struct HandwritingAnalyzer<E: RecognitionEngine + 'static = TesseractEngine> {
    inner: Pipeline<E>,
}

impl HandwritingAnalyzer<TesseractEngine> {
    /// Create an analyzer backed by the Tesseract command line tool.
    pub fn new(config: PipelineConfig) -> Result<Self, AnalysisError> {
        let engine = TesseractEngine::new(
            config.recognition.tesseract_cmd.clone(),
            config.recognition.attempt_timeout(),
        );
        Self::with_engine(engine, config)
    }
}

impl<E: RecognitionEngine + 'static> HandwritingAnalyzer<E> {
    /// Create an analyzer over any recognition backend.
    pub fn with_engine(engine: E, config: PipelineConfig) -> Result<Self, AnalysisError> {
        let inner = Pipeline::new(Arc::new(engine), config)?;
        Ok(Self { inner })
    }

    pub fn with_face_detector(self, detector: Box<dyn FaceDetector>) -> Self {
        Self {
            inner: self.inner.with_face_detector(detector),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.inner.config()
    }

    /// Analyze a decoded image.
    pub fn recognize(&self, image: &RasterImage, language: &str) -> AnalysisResult {
        self.inner.recognize(image, language, DEFAULT_STEM)
    }

    /// Analyze a decoded image and apply whole-word spelling corrections.
    pub fn correct(&self, image: &RasterImage, language: &str) -> AnalysisResult {
        self.inner.correct(image, language, DEFAULT_STEM)
    }

    /// Analyze an image file. The overlay is named after the file stem.
    pub fn recognize_path<P: AsRef<Path>>(&self, path: P, language: &str) -> AnalysisResult {
        let path = path.as_ref();
        match RasterImage::open(path) {
            Ok(image) => self.inner.recognize(&image, language, &file_stem(path)),
            Err(e) => AnalysisResult::failure(e.to_string()),
        }
    }

    pub fn correct_path<P: AsRef<Path>>(&self, path: P, language: &str) -> AnalysisResult {
        let path = path.as_ref();
        match RasterImage::open(path) {
            Ok(image) => self.inner.correct(&image, language, &file_stem(path)),
            Err(e) => AnalysisResult::failure(e.to_string()),
        }
    }

    /// Analyze an encoded image held in memory.
    pub fn recognize_bytes(&self, data: &[u8], language: &str) -> AnalysisResult {
        match RasterImage::from_bytes(data) {
            Ok(image) => self.recognize(&image, language),
            Err(e) => AnalysisResult::failure(e.to_string()),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_STEM.to_string())
}
