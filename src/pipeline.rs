//! Stage wiring for a single analysis call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::GrayImage;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cls::{CharacterClassifier, GlyphClassifier, TemplateClassifier};
use crate::engine::{engine_language, RecognitionEngine};
use crate::error::AnalysisError;
use crate::features::FeatureExtractor;
use crate::feedback::{synthesize, ErrorAnalyzer};
use crate::image_impl::RasterImage;
use crate::model::{AnalysisResult, BestTranscription, CharacterAnalysis, CharacterRegion, WordFeedback, WordToken};
use crate::overlay::OverlayRenderer;
use crate::postprocess::{apply_corrections, ocr_confusions};
use crate::preprocess::PreProcess;
use crate::rec::{assemble_from_regions, TextRecognizer};
use crate::segment::Segmenter;
use crate::types::{ClassifierStrategy, PipelineConfig};
use crate::validator::{assess_quality, ContentValidator, FaceDetector};
use crate::word_map::WordMapper;

/// Per-call state. Every buffer is owned by the call and dropped with it.
pub struct AnalysisContext {
    /// Engine language code.
    pub language: String,
    pub gray: GrayImage,
    pub dimensions: (u32, u32),
    pub warnings: Vec<String>,
}

impl AnalysisContext {
    pub fn new(image: &RasterImage, language_hint: &str) -> Self {
        Self {
            language: engine_language(language_hint.trim()),
            gray: image.to_gray(),
            dimensions: image.dimensions(),
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }
}

pub struct Pipeline<E: RecognitionEngine + 'static> {
    cfg: PipelineConfig,
    validator: ContentValidator,
    preprocess: PreProcess,
    recognizer: TextRecognizer<E>,
    segmenter: Segmenter,
    features: FeatureExtractor,
    classifier: Box<dyn CharacterClassifier>,
    mapper: WordMapper,
    analyzer: ErrorAnalyzer,
    overlay: Option<OverlayRenderer>,
}

impl<E: RecognitionEngine + 'static> Pipeline<E> {
    pub fn new(engine: Arc<E>, cfg: PipelineConfig) -> Result<Self, AnalysisError> {
        let classifier: Box<dyn CharacterClassifier> = match cfg.classifier.strategy {
            ClassifierStrategy::Template => Box::new(TemplateClassifier::new(cfg.classifier.clone())),
            ClassifierStrategy::Glyph => Box::new(GlyphClassifier::new(engine.clone(), cfg.classifier.clone())),
        };
        let overlay = cfg
            .overlay
            .enabled
            .then(|| OverlayRenderer::new(cfg.overlay.clone()));

        Ok(Self {
            validator: ContentValidator::new(cfg.validator.clone()),
            preprocess: PreProcess::new(cfg.preprocess.clone()),
            recognizer: TextRecognizer::new(engine, cfg.recognition.clone())?,
            segmenter: Segmenter::new(cfg.segment.clone()),
            features: FeatureExtractor::new(cfg.features.clone()),
            classifier,
            mapper: WordMapper::new(cfg.analyzer.reach_factor),
            analyzer: ErrorAnalyzer::new(cfg.analyzer.clone()),
            overlay,
            cfg,
        })
    }

    pub fn with_face_detector(mut self, detector: Box<dyn FaceDetector>) -> Self {
        self.validator = self.validator.with_face_detector(detector);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Full analysis. `stem` names the overlay file.
    pub fn recognize(&self, image: &RasterImage, language: &str, stem: &str) -> AnalysisResult {
        let start = Instant::now();
        let mut ctx = AnalysisContext::new(image, language);
        let result = self.analyze(image, &mut ctx, stem);
        info!(
            success = result.success,
            regions = result.character_analysis.total_found,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "analysis finished"
        );
        result
    }

    /// [`recognize`](Self::recognize) followed by whole-word spelling corrections.
    pub fn correct(&self, image: &RasterImage, language: &str, stem: &str) -> AnalysisResult {
        let mut result = self.recognize(image, language, stem);
        if result.success {
            let (text, corrections) = apply_corrections(&result.recognized_text);
            debug!(count = corrections.len(), "applied corrections");
            result.corrected_text = Some(text);
            result.corrections_applied = corrections;
        }
        result
    }

    fn analyze(&self, image: &RasterImage, ctx: &mut AnalysisContext, stem: &str) -> AnalysisResult {
        let verdict = self.validator.validate(image);
        if !verdict.is_handwriting {
            if self.cfg.validator.reject_non_handwriting {
                let mut result =
                    AnalysisResult::failure(AnalysisError::NoContentDetected(verdict.message.clone()).to_string());
                result.validator = Some(verdict);
                return result;
            }
            ctx.warn(verdict.message.clone());
        }
        let quality = assess_quality(&ctx.gray);

        let variants = match self.preprocess.run(&ctx.gray) {
            Ok(v) => v,
            Err(e) => {
                let mut result = AnalysisResult::failure(e.to_string());
                result.validator = Some(verdict);
                return result;
            }
        };

        let mut engine_ran = true;
        let mut best = match self.recognizer.run(&variants, ctx.dimensions, &ctx.language) {
            Ok(best) => best,
            Err(e @ AnalysisError::EngineUnavailable(_)) => {
                engine_ran = false;
                ctx.warn(format!("{e}; only character analysis was performed"));
                BestTranscription::empty()
            }
            Err(e) => {
                ctx.warn(format!("recognition failed: {e}"));
                BestTranscription::empty()
            }
        };
        drop(variants);

        let mut regions = self.character_regions(&ctx.gray, &ctx.language);

        if engine_ran && best.text.is_empty() {
            let assembled = assemble_from_regions(&regions, self.cfg.recognition.line_merge_factor);
            if !assembled.text.is_empty() {
                debug!("transcript assembled from character candidates");
                best = assembled;
            }
        }

        let mapped = self.mapper.map(&mut regions, &best.tokens);
        self.analyzer.annotate(&mut regions);
        let word_feedback = synthesize(&regions, &best.tokens);
        debug!(mapped, flagged_words = word_feedback.len(), "character feedback ready");

        let overlay_path = self.write_overlay(image, &best.tokens, &regions, &word_feedback, stem, ctx);

        AnalysisResult {
            success: true,
            ocr_confusions: ocr_confusions(&best.text),
            recognized_text: best.text,
            confidence: best.confidence.clamp(0.0, 1.0),
            validator: Some(verdict),
            tokens: best.tokens,
            character_analysis: CharacterAnalysis {
                total_found: regions.len(),
                characters: regions,
            },
            word_feedback,
            overlay_path,
            error: None,
            warnings: std::mem::take(&mut ctx.warnings),
            image_quality: Some(quality),
            transcript_source: best.source,
            corrected_text: None,
            corrections_applied: Vec::new(),
        }
    }

    /// Segment, measure and classify every character region.
    fn character_regions(&self, gray: &GrayImage, language: &str) -> Vec<CharacterRegion> {
        let (mut regions, segments) = self.segmenter.regions(gray);
        regions
            .par_iter_mut()
            .zip(segments.par_iter())
            .for_each(|(region, segment)| {
                let measured = self.features.extract_or_default(&segment.mask, &segment.crop);
                if measured.degraded {
                    debug!(id = region.id, reason = ?measured.reason, "features degraded to defaults");
                }
                region.features = measured.value;
                region.degraded = measured.degraded;
                region.candidates = self.classifier.classify_region(&segment.mask, &region.features, language);
            });
        regions
    }

    fn write_overlay(
        &self,
        image: &RasterImage,
        tokens: &[WordToken],
        regions: &[CharacterRegion],
        feedback: &[WordFeedback],
        stem: &str,
        ctx: &mut AnalysisContext,
    ) -> Option<PathBuf> {
        let renderer = self.overlay.as_ref()?;
        let canvas = renderer.render(&image.to_rgb8(), tokens, regions, feedback);
        match renderer.save(&canvas, stem) {
            Ok(path) => Some(path),
            Err(e) => {
                ctx.warn(format!("overlay not written: {e}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, GlyphGuess, PageSegMode};
    use crate::model::{ContentType, TranscriptSource};
    use image::Luma;

    struct NoEngine;

    impl RecognitionEngine for NoEngine {
        fn is_available(&self) -> bool {
            false
        }

        fn extract_tokens(&self, _: &GrayImage, _: &str, _: PageSegMode) -> Result<Vec<WordToken>, EngineError> {
            Err(EngineError::Unavailable("missing".into()))
        }

        fn extract_text(&self, _: &GrayImage, _: &str) -> Result<String, EngineError> {
            Err(EngineError::Unavailable("missing".into()))
        }

        fn recognize_glyph(&self, _: &GrayImage, _: &str, _: &str) -> Result<Vec<GlyphGuess>, EngineError> {
            Err(EngineError::Unavailable("missing".into()))
        }
    }

    fn config(dir: &std::path::Path) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.recognition.workers = 1;
        cfg.overlay.output_dir = Some(dir.to_path_buf());
        cfg.overlay.font_path = Some(dir.join("no-font.ttf"));
        cfg
    }

    fn strokes_page() -> RasterImage {
        let mut img = GrayImage::from_pixel(320, 160, Luma([250]));
        for (x0, x1) in [(40u32, 70u32), (120, 150), (200, 230)] {
            for y in 40..120 {
                for x in x0..x1 {
                    if x < x0 + 8 || y < 48 || y >= 112 {
                        img.put_pixel(x, y, Luma([20]));
                    }
                }
            }
        }
        RasterImage::from(img)
    }

    #[test]
    fn test_context_defaults_language() {
        let ctx = AnalysisContext::new(&strokes_page(), "  ");
        assert_eq!(ctx.language, "eng");
        assert_eq!(ctx.dimensions, (320, 160));
    }

    #[test]
    fn test_unavailable_engine_still_segments() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(Arc::new(NoEngine), config(dir.path())).unwrap();
        let result = pipeline.recognize(&strokes_page(), "en", "page");

        assert!(result.success);
        assert_eq!(result.confidence, 0.0);
        assert!(result.recognized_text.is_empty());
        assert_eq!(result.transcript_source, TranscriptSource::None);
        assert!(result.warnings.iter().any(|w| w.contains("unavailable")));
        assert_eq!(result.character_analysis.total_found, 3);
        assert!(result.word_feedback.is_empty());
        let overlay = result.overlay_path.expect("overlay written");
        assert_eq!(overlay.parent(), Some(dir.path()));
        assert!(overlay.file_name().unwrap().to_string_lossy().starts_with("page_overlay"));
    }

    #[test]
    fn test_reject_non_handwriting() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.validator.reject_non_handwriting = true;
        let pipeline = Pipeline::new(Arc::new(NoEngine), cfg).unwrap();
        let blank = RasterImage::from(GrayImage::from_pixel(200, 200, Luma([255])));

        let result = pipeline.recognize(&blank, "en", "blank");
        assert!(!result.success);
        assert_eq!(result.validator.unwrap().detected_type, ContentType::UniformColor);
        assert!(result.error.unwrap().starts_with("No handwriting detected"));
    }
}
