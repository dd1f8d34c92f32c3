use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use image::GrayImage;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::BBox;
use crate::model::WordToken;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Recognition engine unavailable: {0}")]
    Unavailable(String),

    #[error("Engine call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine failed: {0}")]
    Failed(String),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Malformed engine output: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::ImageError(err.to_string())
    }
}

/// Page segmentation strategies understood by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSegMode {
    Auto,
    SingleBlock,
    SingleLine,
    SingleWord,
    SingleChar,
    SparseText,
    RawLine,
}

impl PageSegMode {
    pub fn code(self) -> u8 {
        match self {
            PageSegMode::Auto => 3,
            PageSegMode::SingleBlock => 6,
            PageSegMode::SingleLine => 7,
            PageSegMode::SingleWord => 8,
            PageSegMode::SingleChar => 10,
            PageSegMode::SparseText => 11,
            PageSegMode::RawLine => 13,
        }
    }
}

/// One single-glyph hypothesis, confidence on the engine's 0-100 scale.
#[derive(Clone, Debug, PartialEq)]
pub struct GlyphGuess {
    pub letter: char,
    pub confidence: f32,
}

/// Text recognition backend.
///
/// `language` is already an engine code (see [`engine_language`]).
/// Token boxes are in the pixel space of the image passed in.
pub trait RecognitionEngine: Send + Sync {
    fn is_available(&self) -> bool;

    fn extract_tokens(
        &self,
        image: &GrayImage,
        language: &str,
        mode: PageSegMode,
    ) -> Result<Vec<WordToken>, EngineError>;

    fn extract_text(&self, image: &GrayImage, language: &str) -> Result<String, EngineError>;

    fn recognize_glyph(
        &self,
        image: &GrayImage,
        language: &str,
        whitelist: &str,
    ) -> Result<Vec<GlyphGuess>, EngineError>;
}

static LANGUAGE_CODES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("en", "eng"),
        ("es", "spa"),
        ("fr", "fra"),
        ("de", "deu"),
        ("it", "ita"),
        ("pt", "por"),
    ])
});

/// Map an ISO 639-1 hint to the engine's language code. Unknown codes pass through.
pub fn engine_language(hint: &str) -> String {
    let hint = hint.trim();
    let hint = if hint.is_empty() { "en" } else { hint };
    let lower = hint.to_ascii_lowercase();
    LANGUAGE_CODES
        .get(lower.as_str())
        .map(|code| code.to_string())
        .unwrap_or_else(|| hint.to_string())
}

/// Tesseract command-line backend.
///
/// Every call writes the image to a private temp directory, runs the binary
/// with a wall-clock limit and reads the result file back.
pub struct TesseractEngine {
    command: PathBuf,
    timeout: Duration,
    available: OnceCell<bool>,
}

impl TesseractEngine {
    pub fn new<P: Into<PathBuf>>(command: P, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            available: OnceCell::new(),
        }
    }

    fn run(
        &self,
        image: &GrayImage,
        language: &str,
        mode: PageSegMode,
        extra: &[String],
        tsv: bool,
    ) -> Result<String, EngineError> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.png");
        image.save(&input)?;
        let out_base = dir.path().join("out");

        let mut cmd = Command::new(&self.command);
        cmd.arg(&input)
            .arg(&out_base)
            .arg("-l")
            .arg(language)
            .arg("--psm")
            .arg(mode.code().to_string())
            .arg("--oem")
            .arg("3")
            .args(extra);
        if tsv {
            cmd.arg("tsv");
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::Unavailable(format!("{} not found", self.command.display()))
            } else {
                EngineError::Io(e)
            }
        })?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                warn!(psm = mode.code(), "tesseract timed out after {:?}", self.timeout);
                return Err(EngineError::Timeout(self.timeout));
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        if !status.success() {
            return Err(EngineError::Failed(format!("tesseract exited with {status}")));
        }

        let ext = if tsv { "tsv" } else { "txt" };
        let output = read_output(&out_base.with_extension(ext))?;
        debug!(psm = mode.code(), bytes = output.len(), "tesseract finished in {:?}", started.elapsed());
        Ok(output)
    }
}

fn read_output(path: &Path) -> Result<String, EngineError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

impl RecognitionEngine for TesseractEngine {
    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| {
            Command::new(&self.command)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
    }

    fn extract_tokens(
        &self,
        image: &GrayImage,
        language: &str,
        mode: PageSegMode,
    ) -> Result<Vec<WordToken>, EngineError> {
        let tsv = self.run(image, language, mode, &[], true)?;
        parse_tsv(&tsv)
    }

    fn extract_text(&self, image: &GrayImage, language: &str) -> Result<String, EngineError> {
        let text = self.run(image, language, PageSegMode::Auto, &[], false)?;
        Ok(text.trim().to_string())
    }

    fn recognize_glyph(
        &self,
        image: &GrayImage,
        language: &str,
        whitelist: &str,
    ) -> Result<Vec<GlyphGuess>, EngineError> {
        let extra = vec![
            "-c".to_string(),
            format!("tessedit_char_whitelist={whitelist}"),
        ];
        let tsv = self.run(image, language, PageSegMode::SingleChar, &extra, true)?;
        let guesses = parse_tsv(&tsv)?
            .into_iter()
            .filter_map(|t| {
                let letter = t.text.chars().find(|c| c.is_alphabetic())?;
                Some(GlyphGuess {
                    letter,
                    confidence: t.confidence,
                })
            })
            .collect();
        Ok(guesses)
    }
}

/// Parse Tesseract TSV output into word tokens.
///
/// Keeps word-level rows (level 5) with a non-negative confidence and
/// non-empty text. Line and paragraph indices are renumbered page-wide in
/// order of first appearance.
pub fn parse_tsv(tsv: &str) -> Result<Vec<WordToken>, EngineError> {
    let mut lines = tsv.lines();
    match lines.next() {
        Some(header) if header.starts_with("level") => {}
        Some(_) => return Err(EngineError::Parse("missing TSV header".to_string())),
        None => return Ok(Vec::new()),
    }

    let mut paragraph_ids: HashMap<(i32, i32), usize> = HashMap::new();
    let mut line_ids: HashMap<(i32, i32, i32), usize> = HashMap::new();
    let mut line_counts: HashMap<usize, usize> = HashMap::new();
    let mut tokens = Vec::new();

    for row in lines {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let block: i32 = cols[2].parse().unwrap_or(0);
        let par: i32 = cols[3].parse().unwrap_or(0);
        let line: i32 = cols[4].parse().unwrap_or(0);
        let bbox = BBox::new(
            cols[6].parse().unwrap_or(0),
            cols[7].parse().unwrap_or(0),
            cols[8].parse().unwrap_or(0),
            cols[9].parse().unwrap_or(0),
        );

        let next_par = paragraph_ids.len();
        let paragraph_index = *paragraph_ids.entry((block, par)).or_insert(next_par);
        let next_line = line_ids.len();
        let line_index = *line_ids.entry((block, par, line)).or_insert(next_line);
        let position = line_counts.entry(line_index).or_insert(0);

        tokens.push(WordToken {
            text: text.to_string(),
            confidence: conf.min(100.0),
            bbox,
            line_index,
            paragraph_index,
            position_in_line: *position,
        });
        *position += 1;
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_tsv_words() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t30\t15\t91.5\tHello\n\
             5\t1\t1\t1\t1\t2\t45\t20\t40\t15\t88\tworld\n\
             5\t1\t1\t1\t2\t1\t10\t50\t30\t15\t-1\t \n\
             5\t1\t2\t1\t1\t1\t10\t90\t50\t15\t70\tagain\n"
        );
        let tokens = parse_tsv(&tsv).unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].text, "Hello");
        assert_eq!(tokens[0].bbox, BBox::new(10, 20, 30, 15));
        assert_eq!(tokens[1].position_in_line, 1);
        assert_eq!(tokens[1].line_index, 0);
        assert_eq!(tokens[2].line_index, 1);
        assert_eq!(tokens[2].paragraph_index, 1);
        assert_eq!(tokens[2].position_in_line, 0);
    }

    #[test]
    fn test_parse_tsv_empty_and_bad_header() {
        assert!(parse_tsv("").unwrap().is_empty());
        assert!(matches!(parse_tsv("garbage\n5\t1"), Err(EngineError::Parse(_))));
    }

    #[test]
    fn test_engine_language_mapping() {
        assert_eq!(engine_language("en"), "eng");
        assert_eq!(engine_language("DE"), "deu");
        assert_eq!(engine_language(""), "eng");
        assert_eq!(engine_language("jpn"), "jpn");
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let engine = TesseractEngine::new("/nonexistent/scrawl-tesseract", Duration::from_secs(1));
        assert!(!engine.is_available());
        let img = GrayImage::new(8, 8);
        let err = engine
            .extract_tokens(&img, "eng", PageSegMode::SingleBlock)
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_engine_is_killed_on_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-tesseract");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let engine = TesseractEngine::new(&script, Duration::from_millis(200));
        let started = Instant::now();
        let err = engine
            .extract_tokens(&GrayImage::new(4, 4), "eng", PageSegMode::SingleLine)
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(d) if d == Duration::from_millis(200)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_page_seg_mode_codes() {
        assert_eq!(PageSegMode::SingleBlock.code(), 6);
        assert_eq!(PageSegMode::RawLine.code(), 13);
        assert_eq!(PageSegMode::SingleChar.code(), 10);
    }
}
