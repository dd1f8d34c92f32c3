use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use proptest::prelude::*;
use scrawl::{
    BBox, ContentType, EngineError, GlyphGuess, HandwritingAnalyzer, IssueKind, PageSegMode, PipelineConfig,
    RasterImage, RecognitionEngine, TranscriptSource, WordToken,
};

/// Returns the same words for every attempt, laid out left to right across
/// the image it is given.
struct ScriptedEngine {
    words: Vec<(&'static str, f32)>,
    text: &'static str,
}

impl ScriptedEngine {
    fn words(words: &[(&'static str, f32)]) -> Self {
        Self {
            words: words.to_vec(),
            text: "",
        }
    }

    fn silent() -> Self {
        Self::words(&[])
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn is_available(&self) -> bool {
        true
    }

    fn extract_tokens(&self, image: &GrayImage, _: &str, _: PageSegMode) -> Result<Vec<WordToken>, EngineError> {
        let (w, h) = image.dimensions();
        let slot = w / (self.words.len() as u32).max(1);
        Ok(self
            .words
            .iter()
            .enumerate()
            .map(|(i, (text, confidence))| WordToken {
                text: text.to_string(),
                confidence: *confidence,
                bbox: BBox::new(i as u32 * slot, h / 8, slot, h * 3 / 4),
                line_index: 0,
                paragraph_index: 0,
                position_in_line: i,
            })
            .collect())
    }

    fn extract_text(&self, _: &GrayImage, _: &str) -> Result<String, EngineError> {
        Ok(self.text.to_string())
    }

    fn recognize_glyph(&self, _: &GrayImage, _: &str, _: &str) -> Result<Vec<GlyphGuess>, EngineError> {
        Ok(Vec::new())
    }
}

fn config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.overlay.enabled = false;
    cfg.recognition.workers = 2;
    cfg
}

fn analyzer(engine: ScriptedEngine) -> HandwritingAnalyzer<ScriptedEngine> {
    HandwritingAnalyzer::with_engine(engine, config()).unwrap()
}

fn page(w: u32, h: u32) -> GrayImage {
    GrayImage::from_pixel(w, h, Luma([245]))
}

fn ink(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) {
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, Luma([15]));
        }
    }
}

fn ring(img: &mut GrayImage, cx: f32, cy: f32, r_out: f32, r_in: f32) {
    let (w, h) = img.dimensions();
    for y in 0..h {
        for x in 0..w {
            let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
            if d <= r_out && d >= r_in {
                img.put_pixel(x, y, Luma([15]));
            }
        }
    }
}

/// Three block letters, roughly "c", "a", "t".
fn cat_page() -> RasterImage {
    let mut img = page(360, 160);
    // c
    ink(&mut img, 40, 50, 48, 120);
    ink(&mut img, 40, 50, 80, 58);
    ink(&mut img, 40, 112, 80, 120);
    // a
    ring(&mut img, 170.0, 90.0, 30.0, 22.0);
    ink(&mut img, 194, 60, 202, 121);
    // t
    ink(&mut img, 276, 30, 284, 120);
    ink(&mut img, 260, 55, 300, 62);
    RasterImage::from(img)
}

#[test]
fn test_blank_white_square_is_uniform_color() {
    let a = analyzer(ScriptedEngine::silent());
    let result = a.recognize(&RasterImage::from(GrayImage::from_pixel(40, 40, Luma([255]))), "en");

    let verdict = result.validator.expect("verdict attached");
    assert!(!verdict.is_handwriting);
    assert_eq!(verdict.detected_type, ContentType::UniformColor);
    assert!((0.0..=1.0).contains(&result.confidence));
}

#[test]
fn test_single_word_transcript() {
    let a = analyzer(ScriptedEngine::words(&[("cat", 92.0)]));
    let result = a.recognize(&cat_page(), "en");

    assert!(result.success);
    assert_eq!(result.recognized_text, "cat");
    assert!(result.confidence >= 0.6);
    assert_eq!(result.tokens.len(), 1);
    assert_eq!(result.transcript_source, TranscriptSource::EngineTokens);
    assert!(result.character_analysis.total_found >= 3);

    let token = &result.tokens[0];
    assert!(token.bbox.right() <= 360 && token.bbox.bottom() <= 160);
}

#[test]
fn test_assembled_text_when_engine_is_silent() {
    let mut img = page(600, 400);
    ring(&mut img, 300.0, 200.0, 70.0, 60.0);
    let a = analyzer(ScriptedEngine::silent());
    let result = a.recognize(&RasterImage::from(img), "en");

    assert!(result.success);
    assert_eq!(result.transcript_source, TranscriptSource::CharacterAssembly);
    assert!(!result.recognized_text.is_empty());
    assert!(result.tokens.is_empty());
    assert!(result.word_feedback.is_empty());
}

#[test]
fn test_merged_pair_is_split() {
    let mut img = page(400, 300);
    ink(&mut img, 20, 20, 60, 60);
    ink(&mut img, 68, 20, 108, 60);
    ink(&mut img, 60, 38, 68, 42);

    let result = analyzer(ScriptedEngine::silent()).recognize(&RasterImage::from(img), "en");
    assert_eq!(result.character_analysis.total_found, 2);
    let chars = &result.character_analysis.characters;
    assert!(chars[0].bbox.x < chars[1].bbox.x);
    assert_eq!((chars[0].id, chars[1].id), (0, 1));
}

#[test]
fn test_detached_pieces_inside_bracket_flag_broken_stroke() {
    let mut img = page(300, 200);
    ink(&mut img, 40, 40, 48, 142);
    ink(&mut img, 40, 40, 112, 48);
    ink(&mut img, 40, 134, 112, 142);
    ink(&mut img, 70, 65, 85, 80);
    ink(&mut img, 70, 102, 85, 117);

    let result = analyzer(ScriptedEngine::silent()).recognize(&RasterImage::from(img), "en");
    let bracket = result
        .character_analysis
        .characters
        .iter()
        .find(|r| r.bbox.w >= 70)
        .expect("bracket region");
    assert!(bracket.features.stroke_count >= 3, "strokes {}", bracket.features.stroke_count);
    assert!(bracket.issues.iter().any(|i| i.kind == IssueKind::BrokenStroke));
}

#[test]
fn test_in_memory_calls_get_their_own_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.overlay.enabled = true;
    cfg.overlay.output_dir = Some(dir.path().to_path_buf());
    cfg.overlay.font_path = Some(dir.path().join("no-font.ttf"));
    let a = HandwritingAnalyzer::with_engine(ScriptedEngine::words(&[("cat", 90.0)]), cfg).unwrap();

    let blocks = rect_page(&[(40, 60), (50, 50), (30, 70), (60, 40)]);
    let first = a.recognize(&cat_page(), "en").overlay_path.expect("first overlay");
    let second = a.recognize(&blocks, "en").overlay_path.expect("second overlay");
    assert_ne!(first, second);
    for path in [&first, &second] {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("scrawl_overlay"), "{name}");
    }

    std::fs::remove_file(&second).unwrap();
    assert!(first.exists());
}

#[test]
fn test_reruns_are_identical() {
    let a = analyzer(ScriptedEngine::words(&[("the", 70.0), ("cat", 85.0)]));
    let image = cat_page();
    let first = a.recognize(&image, "en");
    let second = a.recognize(&image, "en");

    assert_eq!(first.recognized_text, second.recognized_text);
    assert_eq!(first.word_feedback, second.word_feedback);
    assert_eq!(first.character_analysis, second.character_analysis);
}

#[test]
fn test_correct_fixes_common_misspellings() {
    let a = analyzer(ScriptedEngine::words(&[("Teh", 80.0), ("cat", 90.0)]));
    let result = a.correct(&cat_page(), "en");

    assert_eq!(result.recognized_text, "Teh cat");
    assert_eq!(result.corrected_text.as_deref(), Some("The cat"));
    assert_eq!(result.corrections_applied.len(), 1);
    assert_eq!(result.corrections_applied[0].from, "Teh");
}

#[test]
fn test_undecodable_bytes_fail() {
    let result = analyzer(ScriptedEngine::silent()).recognize_bytes(b"\x89PNG garbage", "en");
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("Invalid image"));
    assert_eq!(result.confidence, 0.0);
}

#[test]
fn test_json_boundary_shape() {
    let result = analyzer(ScriptedEngine::words(&[("cat", 92.0)])).recognize(&cat_page(), "en");
    let value: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();

    assert_eq!(value["overlay_path"], "");
    assert_eq!(value["tokens"][0]["word"], "cat");
    assert_eq!(value["validator"]["detected_type"], "handwriting");
    assert_eq!(value["transcript_source"], "engine_tokens");
    assert!(value["error"].is_null());
    assert!(value.get("corrected_text").is_none());
}

fn rect_page(rects: &[(u32, u32)]) -> RasterImage {
    let mut img = page(480, 240);
    for (i, &(w, h)) in rects.iter().enumerate() {
        let cx = (i as u32 % 4) * 120 + 20;
        let cy = (i as u32 / 4) * 120 + 20;
        ink(&mut img, cx, cy, cx + w, cy + h);
    }
    RasterImage::from(img)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_regions_and_mapping_invariants(rects in prop::collection::vec((10u32..80, 10u32..80), 1..8)) {
        let a = analyzer(ScriptedEngine::words(&[("left", 80.0), ("right", 60.0)]));
        let result = a.recognize(&rect_page(&rects), "en");
        prop_assert!(result.success);
        prop_assert!((0.0..=1.0).contains(&result.confidence));

        let analysis = &result.character_analysis;
        prop_assert_eq!(analysis.total_found, analysis.characters.len());
        let max_area = (0.10 * 480.0 * 240.0) as u32;
        for region in &analysis.characters {
            prop_assert!(region.bbox.w >= 5 && region.bbox.h >= 5);
            prop_assert!(region.area >= 30 && region.area <= max_area);
        }

        let mut per_word: BTreeMap<usize, Vec<(u32, usize, usize)>> = BTreeMap::new();
        for region in &analysis.characters {
            match (region.word_index, region.char_index) {
                (Some(w), Some(c)) => per_word.entry(w).or_default().push((region.bbox.x, region.id, c)),
                (None, None) => {}
                other => prop_assert!(false, "half-mapped region: {:?}", other),
            }
        }
        let mapped: usize = per_word.values().map(Vec::len).sum();
        prop_assert!(mapped <= analysis.total_found);
        for members in per_word.values_mut() {
            members.sort();
            let indices: Vec<usize> = members.iter().map(|m| m.2).collect();
            prop_assert_eq!(indices, (0..members.len()).collect::<Vec<_>>());
        }

        for word in &result.word_feedback {
            prop_assert!(!word.issues.is_empty());
            prop_assert!(word.issues.windows(2).all(|p| p[0].char_index <= p[1].char_index));
        }
    }
}
