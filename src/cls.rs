//! Per-character letter hypotheses.
//!
//! Two strategies share the [`CharacterClassifier`] seam: correlation against
//! a small set of drawn letter templates, and single-glyph recognition through
//! the text engine.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use ndarray::Array2;
use tracing::debug;

use crate::engine::RecognitionEngine;
use crate::model::{Candidate, FeatureSet};
use crate::types::ClassifierConfig;

pub trait CharacterClassifier: Send + Sync {
    /// Up to `max_candidates` hypotheses, best first. Failures yield an empty list.
    fn classify_region(&self, mask: &GrayImage, features: &FeatureSet, language: &str) -> Vec<Candidate>;
}

pub struct TemplateClassifier {
    cfg: ClassifierConfig,
    templates: Vec<(char, Array2<f32>)>,
}

impl TemplateClassifier {
    pub fn new(cfg: ClassifierConfig) -> Self {
        let templates = build_templates(cfg.canvas_size);
        Self { cfg, templates }
    }

    /// Scale `mask` to fit `fit_size` (aspect preserved) and centre it on the canvas.
    fn normalize(&self, mask: &GrayImage) -> Option<Array2<f32>> {
        let (w, h) = mask.dimensions();
        if w == 0 || h == 0 {
            return None;
        }
        let n = self.cfg.canvas_size;
        let fit = self.cfg.fit_size.min(n as u32) as f32;
        let scale = fit / w.max(h) as f32;
        let nw = ((w as f32 * scale).round() as u32).clamp(1, n as u32);
        let nh = ((h as f32 * scale).round() as u32).clamp(1, n as u32);
        let resized = imageops::resize(mask, nw, nh, FilterType::Triangle);

        let ox = (n as u32 - nw) / 2;
        let oy = (n as u32 - nh) / 2;
        let mut canvas = Array2::<f32>::zeros((n, n));
        for (x, y, p) in resized.enumerate_pixels() {
            canvas[[(oy + y) as usize, (ox + x) as usize]] = p[0] as f32 / 255.0;
        }
        Some(canvas)
    }
}

impl CharacterClassifier for TemplateClassifier {
    fn classify_region(&self, mask: &GrayImage, features: &FeatureSet, _language: &str) -> Vec<Candidate> {
        let Some(canvas) = self.normalize(mask) else {
            return Vec::new();
        };

        let mut scored: Vec<(char, f32)> = self
            .templates
            .iter()
            .map(|(letter, template)| (*letter, zncc(&canvas, template)))
            .filter(|(_, score)| *score > self.cfg.min_score)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.cfg.max_candidates);

        scored
            .into_iter()
            .map(|(letter, score)| Candidate {
                letter,
                confidence: score.clamp(0.0, 1.0),
                rationale: rationale(letter, features),
            })
            .collect()
    }
}

/// Single-glyph recognition through the text engine.
pub struct GlyphClassifier<E: RecognitionEngine> {
    engine: Arc<E>,
    cfg: ClassifierConfig,
}

impl<E: RecognitionEngine> GlyphClassifier<E> {
    pub fn new(engine: Arc<E>, cfg: ClassifierConfig) -> Self {
        Self { engine, cfg }
    }
}

impl<E: RecognitionEngine> CharacterClassifier for GlyphClassifier<E> {
    fn classify_region(&self, mask: &GrayImage, _features: &FeatureSet, language: &str) -> Vec<Candidate> {
        let glyph = render_for_engine(mask, 10);
        let guesses = match self.engine.recognize_glyph(&glyph, language, &self.cfg.glyph_whitelist) {
            Ok(g) => g,
            Err(e) => {
                debug!("glyph recognition failed: {e}");
                return Vec::new();
            }
        };

        let mut out: Vec<Candidate> = Vec::new();
        for guess in guesses {
            if out.iter().any(|c| c.letter == guess.letter) {
                continue;
            }
            out.push(Candidate {
                letter: guess.letter,
                confidence: (guess.confidence / 100.0).clamp(0.0, 1.0),
                rationale: format!("single-glyph recognition, engine confidence {:.0}", guess.confidence),
            });
        }
        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        out.truncate(self.cfg.max_candidates);
        out
    }
}

/// Dark ink on a white page with a margin, the layout the engine expects.
fn render_for_engine(mask: &GrayImage, margin: u32) -> GrayImage {
    let (w, h) = mask.dimensions();
    let mut page = GrayImage::from_pixel(w + 2 * margin, h + 2 * margin, Luma([255]));
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] > 127 {
            page.put_pixel(x + margin, y + margin, Luma([0]));
        }
    }
    page
}

/// Zero-mean normalized cross-correlation of two equally sized arrays.
fn zncc(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    if a.dim() != b.dim() || a.is_empty() {
        return 0.0;
    }
    let ma = a.mean().unwrap_or(0.0);
    let mb = b.mean().unwrap_or(0.0);
    let mut num = 0.0f32;
    let mut da = 0.0f32;
    let mut db = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let u = x - ma;
        let v = y - mb;
        num += u * v;
        da += u * u;
        db += v * v;
    }
    let denom = (da * db).sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        num / denom
    }
}

fn rationale(letter: char, f: &FeatureSet) -> String {
    match letter {
        'O' => {
            let mut s = format!("circular shape, circularity {:.2}", f.circularity);
            if f.has_loop {
                s.push_str(", with loop");
            }
            s
        }
        'I' => {
            let mut s = format!("vertical structure, aspect ratio {:.2}", f.aspect_ratio);
            if !f.has_curve {
                s.push_str(", straight lines");
            }
            s
        }
        'b' if f.has_loop => "stem with lower right loop".to_string(),
        'b' => "vertical stem with curve".to_string(),
        'd' if f.has_loop => "stem with lower left loop".to_string(),
        'd' => "curved left side with stem".to_string(),
        'p' if f.has_loop => "descender with upper right loop".to_string(),
        'p' => "descender with curve".to_string(),
        'q' if f.has_loop => "descender with upper left loop".to_string(),
        'q' => "mirrored descender with curve".to_string(),
        'c' if f.has_curve && !f.has_loop => "open curve".to_string(),
        'c' => "partial curve".to_string(),
        other => format!("shape similarity to {other}"),
    }
}

fn build_templates(n: usize) -> Vec<(char, Array2<f32>)> {
    let s = n as f32 / 32.0;
    let c = (n as f32 - 1.0) / 2.0;
    let stroke = 1.5 * s;

    let mut o = Array2::zeros((n, n));
    ring(&mut o, (c, c), 13.0 * s, stroke);

    let mut i = Array2::zeros((n, n));
    line(&mut i, (c, 3.0 * s), (c, 28.0 * s), stroke);

    let mut b = Array2::zeros((n, n));
    line(&mut b, (9.0 * s, 3.0 * s), (9.0 * s, 29.0 * s), stroke);
    arc(&mut b, (17.0 * s, 21.0 * s), (8.0 * s, 8.0 * s), 0.0, 360.0, stroke);

    let mut d = Array2::zeros((n, n));
    line(&mut d, (23.0 * s, 3.0 * s), (23.0 * s, 29.0 * s), stroke);
    arc(&mut d, (15.0 * s, 21.0 * s), (8.0 * s, 8.0 * s), 0.0, 360.0, stroke);

    let mut p = Array2::zeros((n, n));
    line(&mut p, (9.0 * s, 8.0 * s), (9.0 * s, 31.0 * s), stroke);
    arc(&mut p, (17.0 * s, 15.0 * s), (8.0 * s, 7.0 * s), 0.0, 360.0, stroke);

    let mut q = Array2::zeros((n, n));
    line(&mut q, (23.0 * s, 8.0 * s), (23.0 * s, 31.0 * s), stroke);
    arc(&mut q, (15.0 * s, 15.0 * s), (8.0 * s, 7.0 * s), 0.0, 360.0, stroke);

    let mut open_c = Array2::zeros((n, n));
    arc(&mut open_c, (c, c), (12.0 * s, 12.0 * s), 45.0, 315.0, stroke);

    vec![
        ('O', o),
        ('I', i),
        ('b', b),
        ('d', d),
        ('p', p),
        ('q', q),
        ('c', open_c),
    ]
}

fn stamp(canvas: &mut Array2<f32>, cx: f32, cy: f32, radius: f32) {
    let (rows, cols) = canvas.dim();
    let r = radius.ceil() as i32;
    for dy in -r..=r {
        for dx in -r..=r {
            let x = cx.round() as i32 + dx;
            let y = cy.round() as i32 + dy;
            if x < 0 || y < 0 || x >= cols as i32 || y >= rows as i32 {
                continue;
            }
            if ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt() <= radius {
                canvas[[y as usize, x as usize]] = 1.0;
            }
        }
    }
}

fn ring(canvas: &mut Array2<f32>, center: (f32, f32), radius: f32, half_width: f32) {
    let (rows, cols) = canvas.dim();
    for y in 0..rows {
        for x in 0..cols {
            let d = ((x as f32 - center.0).powi(2) + (y as f32 - center.1).powi(2)).sqrt();
            if (d - radius).abs() <= half_width {
                canvas[[y, x]] = 1.0;
            }
        }
    }
}

fn line(canvas: &mut Array2<f32>, from: (f32, f32), to: (f32, f32), half_width: f32) {
    let len = (to.0 - from.0).hypot(to.1 - from.1);
    let steps = (len * 2.0).ceil().max(1.0) as usize;
    for k in 0..=steps {
        let t = k as f32 / steps as f32;
        stamp(
            canvas,
            from.0 + t * (to.0 - from.0),
            from.1 + t * (to.1 - from.1),
            half_width,
        );
    }
}

/// Elliptical arc, angles in degrees with y pointing down.
fn arc(canvas: &mut Array2<f32>, center: (f32, f32), axes: (f32, f32), start: f32, end: f32, half_width: f32) {
    let span = end - start;
    let steps = (span.abs() * 2.0).ceil().max(1.0) as usize;
    for k in 0..=steps {
        let a = (start + span * k as f32 / steps as f32).to_radians();
        stamp(
            canvas,
            center.0 + axes.0 * a.cos(),
            center.1 + axes.1 * a.sin(),
            half_width,
        );
    }
}
