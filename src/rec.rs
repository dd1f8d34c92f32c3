//! Recognition search: every preprocessed variant is tried with every
//! configured page-segmentation mode, attempts are scored and the best one
//! is kept. Fallbacks cover engines that return no tokens.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::engine::{PageSegMode, RecognitionEngine};
use crate::error::AnalysisError;
use crate::geometry::map_bbox_to_original;
use crate::model::{BestTranscription, CharacterRegion, TranscriptSource, TranscriptionAttempt, WordToken};
use crate::postprocess::{clean_line, clean_text, text_confidence};
use crate::preprocess::ImageVariant;
use crate::types::{RecognitionConfig, ScoreWeights};

pub struct TextRecognizer<E: RecognitionEngine> {
    engine: Arc<E>,
    cfg: RecognitionConfig,
    pool: ThreadPool,
}

impl<E: RecognitionEngine> TextRecognizer<E> {
    pub fn new(engine: Arc<E>, cfg: RecognitionConfig) -> Result<Self, AnalysisError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(cfg.worker_count())
            .thread_name(|i| format!("scrawl-rec-{i}"))
            .build()
            .map_err(|e| AnalysisError::Config(format!("failed to build recognition pool: {e}")))?;
        Ok(Self { engine, cfg, pool })
    }

    /// Best transcription over all variant × mode attempts, falling back to
    /// whole-image text. Returns an empty transcription when neither yields text;
    /// character assembly is left to the caller, which owns the regions.
    ///
    /// `original` is the (width, height) of the source image; token boxes are
    /// returned in that space.
    pub fn run(
        &self,
        variants: &[ImageVariant],
        original: (u32, u32),
        language: &str,
    ) -> Result<BestTranscription, AnalysisError> {
        if !self.engine.is_available() {
            return Err(AnalysisError::EngineUnavailable(
                "text recognition engine is not installed or not runnable".to_string(),
            ));
        }

        let start = Instant::now();
        let attempts = self.attempts(variants, original, language);
        debug!(
            attempts = attempts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "recognition search finished"
        );

        if let Some(best) = select_best(attempts) {
            info!(
                variant = ?best.variant,
                inverted = best.inverted,
                mode = ?best.mode,
                score = best.score,
                "selected transcription"
            );
            let (text, tokens) = if self.cfg.postprocess {
                (clean_text(&best.joined_text), clean_tokens(&best.tokens))
            } else {
                (best.joined_text.clone(), best.tokens.clone())
            };
            return Ok(BestTranscription {
                text,
                confidence: (best.mean_confidence / 100.0).clamp(0.0, 1.0),
                tokens,
                source: TranscriptSource::EngineTokens,
                attempt: Some(best),
            });
        }

        Ok(self.whole_image_text(variants, language))
    }

    /// Scored attempts in (variant, mode) order. Failed or empty attempts are dropped.
    fn attempts(&self, variants: &[ImageVariant], original: (u32, u32), language: &str) -> Vec<TranscriptionAttempt> {
        let jobs: Vec<(&ImageVariant, PageSegMode)> = variants
            .iter()
            .flat_map(|v| self.cfg.modes.iter().map(move |&m| (v, m)))
            .collect();

        let results: Vec<Option<TranscriptionAttempt>> = self.pool.install(|| {
            jobs.par_iter()
                .map(|&(variant, mode)| self.attempt(variant, mode, original, language))
                .collect()
        });
        results.into_iter().flatten().collect()
    }

    fn attempt(
        &self,
        variant: &ImageVariant,
        mode: PageSegMode,
        (ori_w, ori_h): (u32, u32),
        language: &str,
    ) -> Option<TranscriptionAttempt> {
        let tokens = match self.engine.extract_tokens(&variant.image, language, mode) {
            Ok(t) => t,
            Err(e) => {
                debug!(variant = ?variant.kind, mode = ?mode, "attempt failed: {e}");
                return None;
            }
        };
        if tokens.is_empty() {
            return None;
        }

        let mut tokens: Vec<WordToken> = tokens
            .into_iter()
            .map(|mut t| {
                t.bbox = map_bbox_to_original(t.bbox, variant.scale, ori_w, ori_h);
                t
            })
            .collect();
        tokens.sort_by_key(|t| (t.paragraph_index, t.line_index, t.bbox.x));

        let joined_text = join_tokens(&tokens);
        let (mean_confidence, score) = score_attempt(&tokens, &joined_text, &self.cfg.weights);
        Some(TranscriptionAttempt {
            variant: variant.kind,
            inverted: variant.inverted,
            mode,
            tokens,
            joined_text,
            mean_confidence,
            score,
        })
    }

    fn whole_image_text(&self, variants: &[ImageVariant], language: &str) -> BestTranscription {
        let Some(base) = variants.first() else {
            return BestTranscription::empty();
        };
        match self.engine.extract_text(&base.image, language) {
            Ok(raw) => {
                let text = if self.cfg.postprocess { clean_text(&raw) } else { raw.trim().to_string() };
                if text.is_empty() {
                    return BestTranscription::empty();
                }
                debug!("using whole-image text fallback");
                BestTranscription {
                    confidence: text_confidence(&text),
                    text,
                    tokens: Vec::new(),
                    source: TranscriptSource::WholeImageText,
                    attempt: None,
                }
            }
            Err(e) => {
                warn!("whole-image recognition failed: {e}");
                BestTranscription::empty()
            }
        }
    }
}

/// Apply line cleanup to each token's text; tokens left empty are dropped.
fn clean_tokens(tokens: &[WordToken]) -> Vec<WordToken> {
    tokens
        .iter()
        .filter_map(|t| {
            let text = clean_line(&t.text);
            (!text.is_empty()).then(|| WordToken { text, ..t.clone() })
        })
        .collect()
}

/// Tokens sorted by (paragraph, line, x): words joined by spaces, lines by newlines.
pub fn join_tokens(tokens: &[WordToken]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for token in tokens {
        let key = (token.paragraph_index, token.line_index);
        match lines.last_mut() {
            Some(line) if current == Some(key) => {
                line.push(' ');
                line.push_str(&token.text);
            }
            _ => lines.push(token.text.clone()),
        }
        current = Some(key);
    }
    lines.join("\n")
}

/// Returns `(mean_confidence, score)`.
pub fn score_attempt(tokens: &[WordToken], text: &str, weights: &ScoreWeights) -> (f32, f32) {
    if tokens.is_empty() {
        return (0.0, 0.0);
    }
    let n = tokens.len() as f32;
    let mean = tokens.iter().map(|t| t.confidence).sum::<f32>() / n;
    let alpha = tokens
        .iter()
        .filter(|t| t.text.chars().any(char::is_alphabetic))
        .count() as f32
        / n;
    let length = (text.chars().count() as f32 / 100.0).min(1.0);
    let score = weights.confidence * (mean / 100.0).clamp(0.0, 1.0) + weights.alphabetic * alpha + weights.length * length;
    (mean, score)
}

/// Highest score wins; on ties the earliest attempt is kept.
pub fn select_best(attempts: Vec<TranscriptionAttempt>) -> Option<TranscriptionAttempt> {
    attempts.into_iter().fold(None, |best, a| match best {
        Some(b) if b.score >= a.score => Some(b),
        _ => Some(a),
    })
}

/// Build text from the top candidate of each region when the engine produced nothing.
///
/// Regions are grouped into lines by vertical proximity (centre distance up to
/// `merge_factor` × median region height) and read left to right.
pub fn assemble_from_regions(regions: &[CharacterRegion], merge_factor: f32) -> BestTranscription {
    let mut placed: Vec<(&CharacterRegion, char, f32)> = regions
        .iter()
        .filter_map(|r| r.top_candidate().map(|c| (r, c.letter, c.confidence)))
        .collect();
    if placed.is_empty() {
        return BestTranscription::empty();
    }

    let mut heights: Vec<u32> = placed.iter().map(|(r, _, _)| r.bbox.h).collect();
    heights.sort_unstable();
    let tolerance = merge_factor * heights[heights.len() / 2] as f32;

    placed.sort_by(|a, b| a.0.bbox.center().y.total_cmp(&b.0.bbox.center().y));
    let mut lines: Vec<(f32, Vec<(u32, char)>)> = Vec::new();
    for (region, letter, _) in &placed {
        let cy = region.bbox.center().y;
        match lines.last_mut() {
            Some((line_y, members)) if (cy - *line_y).abs() <= tolerance => {
                members.push((region.bbox.x, *letter));
            }
            _ => lines.push((cy, vec![(region.bbox.x, *letter)])),
        }
    }

    let text = lines
        .into_iter()
        .map(|(_, mut members)| {
            members.sort_by_key(|(x, _)| *x);
            members.into_iter().map(|(_, c)| c).collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n");
    let confidence = placed.iter().map(|(_, _, c)| c).sum::<f32>() / placed.len() as f32;

    BestTranscription {
        text,
        confidence: confidence.clamp(0.0, 1.0),
        tokens: Vec::new(),
        source: TranscriptSource::CharacterAssembly,
        attempt: None,
    }
}
