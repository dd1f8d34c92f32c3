//! Annotated debug image: word boxes, colour-coded character boxes, issue
//! markers and `#index:hint` labels for flagged words.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info};

use crate::error::AnalysisError;
use crate::geometry::BBox;
use crate::model::{CharacterRegion, WordFeedback, WordToken};
use crate::types::OverlayConfig;

const WORD_COLOR: Rgb<u8> = Rgb([0, 90, 255]);
const ERROR_COLOR: Rgb<u8> = Rgb([230, 0, 0]);
const HIGH_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const MEDIUM_COLOR: Rgb<u8> = Rgb([235, 200, 0]);
const LOW_COLOR: Rgb<u8> = Rgb([255, 140, 0]);
const MARKER_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

pub struct OverlayRenderer {
    cfg: OverlayConfig,
    font: Option<FontVec>,
}

impl OverlayRenderer {
    pub fn new(cfg: OverlayConfig) -> Self {
        let font = match &cfg.font_path {
            Some(path) => load_font(path),
            None => load_system_font(),
        };
        Self { cfg, font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn render(
        &self,
        base: &RgbImage,
        tokens: &[WordToken],
        regions: &[CharacterRegion],
        feedback: &[WordFeedback],
    ) -> RgbImage {
        let mut img = base.clone();
        let scale = PxScale::from(self.cfg.font_scale);

        for (idx, token) in tokens.iter().enumerate() {
            draw_box(&mut img, token.bbox, WORD_COLOR);
            if let Some(font) = &self.font {
                let (x, y) = label_origin(token.bbox, self.cfg.font_scale);
                draw_text_mut(&mut img, WORD_COLOR, x, y, scale, font, &idx.to_string());
            }
        }

        for region in regions {
            draw_box(&mut img, region.bbox, self.region_color(region));
            if !region.issues.is_empty() {
                let c = region.bbox.center();
                draw_filled_circle_mut(&mut img, (c.x as i32, c.y as i32), self.cfg.dot_radius, MARKER_COLOR);
            }
        }

        if let Some(font) = &self.font {
            for word in feedback {
                let (Some(token), Some(label)) = (tokens.get(word.word_index), word_label(word)) else {
                    continue;
                };
                let x = token.bbox.x as i32;
                let y = token.bbox.bottom() as i32 + 2;
                draw_text_mut(&mut img, ERROR_COLOR, x, y, scale, font, &label);
            }
        }

        img
    }

    fn region_color(&self, region: &CharacterRegion) -> Rgb<u8> {
        if !region.issues.is_empty() {
            return ERROR_COLOR;
        }
        match region.top_candidate().map(|c| c.confidence) {
            Some(c) if c >= self.cfg.high_confidence => HIGH_COLOR,
            Some(c) if c >= self.cfg.medium_confidence => MEDIUM_COLOR,
            _ => LOW_COLOR,
        }
    }

    /// Write `<output_dir>/<stem>_overlay_<random>.png`; every call gets its own file.
    pub fn save(&self, image: &RgbImage, stem: &str) -> Result<PathBuf, AnalysisError> {
        let dir = self.cfg.resolved_output_dir();
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{stem}_overlay_"))
            .suffix(".png")
            .tempfile_in(&dir)?;
        image
            .write_to(tmp.as_file_mut(), ImageFormat::Png)
            .map_err(|e| AnalysisError::Overlay(e.to_string()))?;
        let (_, path) = tmp.keep().map_err(|e| AnalysisError::Overlay(e.to_string()))?;

        debug!(path = %path.display(), "wrote overlay");
        Ok(path)
    }
}

/// `#index:hint` for the first flagged character of a word.
fn word_label(word: &WordFeedback) -> Option<String> {
    word.issues
        .first()
        .map(|i| format!("#{}:{}", i.char_index, i.letter_hint))
}

fn draw_box(img: &mut RgbImage, bbox: BBox, color: Rgb<u8>) {
    if bbox.w == 0 || bbox.h == 0 {
        return;
    }
    let rect = Rect::at(bbox.x as i32, bbox.y as i32).of_size(bbox.w, bbox.h);
    draw_hollow_rect_mut(img, rect, color);
    if bbox.w > 2 && bbox.h > 2 {
        let inner = Rect::at(bbox.x as i32 + 1, bbox.y as i32 + 1).of_size(bbox.w - 2, bbox.h - 2);
        draw_hollow_rect_mut(img, inner, color);
    }
}

fn label_origin(bbox: BBox, font_scale: f32) -> (i32, i32) {
    let y = bbox.y as i32 - font_scale as i32 - 2;
    (bbox.x as i32, y.max(0))
}

fn load_font(path: &Path) -> Option<FontVec> {
    let data = std::fs::read(path).ok()?;
    match FontVec::try_from_vec(data) {
        Ok(font) => Some(font),
        Err(_) => {
            debug!("failed to parse font file: {}", path.display());
            None
        }
    }
}

fn load_system_font() -> Option<FontVec> {
    let font_paths = [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/System/Library/Fonts/Helvetica.ttc",
        "C:\\Windows\\Fonts\\arial.ttf",
    ];

    for path in font_paths {
        if let Some(font) = load_font(Path::new(path)) {
            info!("Loaded system font: {}", path);
            return Some(font);
        }
    }

    debug!("No system font found, overlay labels will be skipped");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Candidate, CharacterIssue, IssueKind};

    fn renderer(dir: &Path) -> OverlayRenderer {
        OverlayRenderer::new(OverlayConfig {
            output_dir: Some(dir.to_path_buf()),
            font_path: Some(dir.join("missing.ttf")),
            ..Default::default()
        })
    }

    fn region(bbox: BBox, confidence: Option<f32>) -> CharacterRegion {
        let mut r = CharacterRegion::new(0, bbox, bbox.area());
        if let Some(c) = confidence {
            r.candidates.push(Candidate {
                letter: 'a',
                confidence: c,
                rationale: String::new(),
            });
        }
        r
    }

    #[test]
    fn test_colors_follow_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path());
        let base = RgbImage::from_pixel(100, 60, Rgb([255, 255, 255]));

        let mut flagged = region(BBox::new(5, 5, 20, 20), Some(0.95));
        flagged.issues.push(IssueKind::BrokenStroke.into());
        let regions = vec![
            flagged,
            region(BBox::new(30, 5, 10, 10), Some(0.8)),
            region(BBox::new(45, 5, 10, 10), Some(0.5)),
            region(BBox::new(60, 5, 10, 10), None),
        ];

        let out = r.render(&base, &[], &regions, &[]);
        assert_eq!(*out.get_pixel(5, 5), ERROR_COLOR);
        assert_eq!(*out.get_pixel(15, 15), MARKER_COLOR);
        assert_eq!(*out.get_pixel(30, 5), HIGH_COLOR);
        assert_eq!(*out.get_pixel(45, 5), MEDIUM_COLOR);
        assert_eq!(*out.get_pixel(60, 5), LOW_COLOR);
        assert_eq!(*out.get_pixel(90, 50), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_save_writes_named_png() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path());
        assert!(!r.has_font());
        let img = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        let path = r.save(&img, "page").unwrap();
        assert_eq!(path.parent(), Some(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("page_overlay_") && name.ends_with(".png"), "{name}");
        let back = image::open(&path).unwrap().to_rgb8();
        assert_eq!(*back.get_pixel(4, 4), Rgb([1, 2, 3]));
    }

    #[test]
    fn test_repeated_saves_keep_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path());
        let first = r.save(&RgbImage::from_pixel(4, 4, Rgb([10, 0, 0])), "scrawl").unwrap();
        let second = r.save(&RgbImage::from_pixel(4, 4, Rgb([0, 10, 0])), "scrawl").unwrap();
        assert_ne!(first, second);

        std::fs::remove_file(&second).unwrap();
        let kept = image::open(&first).unwrap().to_rgb8();
        assert_eq!(*kept.get_pixel(0, 0), Rgb([10, 0, 0]));
    }

    #[test]
    fn test_label_shows_first_issue_only() {
        let issue = |char_index: usize, hint: &str| CharacterIssue {
            char_index,
            letter_hint: hint.to_string(),
            description: String::new(),
            suggestion: String::new(),
            kind: IssueKind::UnclosedLoop,
        };
        let word = WordFeedback {
            word_index: 0,
            word_text: "dog".to_string(),
            issues: vec![issue(0, "d"), issue(2, "g")],
        };
        assert_eq!(word_label(&word).as_deref(), Some("#0:d"));

        let clean = WordFeedback {
            issues: Vec::new(),
            ..word
        };
        assert_eq!(word_label(&clean), None);
    }
}
