//! Typed records that flow between pipeline stages and are serialized at the
//! boundary as JSON.

use std::path::PathBuf;

use serde::{Deserialize, Serialize, Serializer};

use crate::engine::PageSegMode;
use crate::geometry::BBox;
use crate::preprocess::VariantKind;

/// A recognized word, bbox in original image coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WordToken {
    #[serde(rename = "word")]
    pub text: String,
    /// 0-100, engine scale.
    pub confidence: f32,
    pub bbox: BBox,
    pub line_index: usize,
    pub paragraph_index: usize,
    pub position_in_line: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TranscriptionAttempt {
    pub variant: VariantKind,
    pub inverted: bool,
    pub mode: PageSegMode,
    pub tokens: Vec<WordToken>,
    pub joined_text: String,
    pub mean_confidence: f32,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    EngineTokens,
    WholeImageText,
    CharacterAssembly,
    None,
}

/// With post-processing on, `text` and every token's text carry the same
/// cleanup; `attempt` keeps the engine's raw output.
#[derive(Clone, Debug, PartialEq)]
pub struct BestTranscription {
    pub text: String,
    /// 0-1.
    pub confidence: f32,
    pub tokens: Vec<WordToken>,
    pub source: TranscriptSource,
    /// The winning engine attempt, when the text came from one.
    pub attempt: Option<TranscriptionAttempt>,
}

impl BestTranscription {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            tokens: Vec::new(),
            source: TranscriptSource::None,
            attempt: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub area: f32,
    pub perimeter: f32,
    pub aspect_ratio: f32,
    pub circularity: f32,
    pub has_loop: bool,
    pub has_curve: bool,
    pub stroke_count: u32,
    pub solidity: f32,
}

impl Default for FeatureSet {
    /// Safe values used when measurement fails; they trigger no issue rule.
    fn default() -> Self {
        Self {
            area: 100.0,
            perimeter: 0.0,
            aspect_ratio: 1.0,
            circularity: 0.0,
            has_loop: false,
            has_curve: false,
            stroke_count: 1,
            solidity: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub letter: char,
    /// 0-1.
    pub confidence: f32,
    pub rationale: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    IncompleteCurve,
    UnclosedLoop,
    FlippedLetter,
    CompressedLetter,
    BrokenStroke,
}

impl IssueKind {
    pub fn description(self) -> &'static str {
        match self {
            IssueKind::IncompleteCurve => "Curve appears incomplete or irregular",
            IssueKind::UnclosedLoop => "Loop may not be properly closed",
            IssueKind::FlippedLetter => "Character appears unusually wide, possibly flipped",
            IssueKind::CompressedLetter => "Character appears too tall or compressed",
            IssueKind::BrokenStroke => "Character has disconnected parts",
        }
    }

    pub fn suggestion(self) -> &'static str {
        match self {
            IssueKind::IncompleteCurve => "Practice smooth, continuous curves",
            IssueKind::UnclosedLoop => "Ensure loops are completely closed",
            IssueKind::FlippedLetter => "Check letter orientation (b vs d, p vs q)",
            IssueKind::CompressedLetter => "Maintain consistent letter proportions",
            IssueKind::BrokenStroke => "Write with continuous, connected strokes",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub description: String,
    pub suggestion: String,
}

impl From<IssueKind> for Issue {
    fn from(kind: IssueKind) -> Self {
        Self {
            kind,
            description: kind.description().to_string(),
            suggestion: kind.suggestion().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CharacterRegion {
    pub id: usize,
    pub bbox: BBox,
    pub area: u32,
    pub features: FeatureSet,
    pub candidates: Vec<Candidate>,
    pub issues: Vec<Issue>,
    pub degraded: bool,
    /// Index of the word this region was mapped to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_index: Option<usize>,
}

impl CharacterRegion {
    pub fn new(id: usize, bbox: BBox, area: u32) -> Self {
        Self {
            id,
            bbox,
            area,
            features: FeatureSet::default(),
            candidates: Vec::new(),
            issues: Vec::new(),
            degraded: false,
            word_index: None,
            char_index: None,
        }
    }

    pub fn top_candidate(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CharacterAnalysis {
    pub characters: Vec<CharacterRegion>,
    pub total_found: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharacterIssue {
    pub char_index: usize,
    pub letter_hint: String,
    pub description: String,
    pub suggestion: String,
    pub kind: IssueKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WordFeedback {
    pub word_index: usize,
    pub word_text: String,
    pub issues: Vec<CharacterIssue>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Handwriting,
    UniformColor,
    TooSmall,
    NoContent,
    ComplexScene,
    PersonPhoto,
    Face,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatorVerdict {
    pub is_handwriting: bool,
    pub detected_type: ContentType,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageQuality {
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
    pub text_density: f32,
    pub width: u32,
    pub height: u32,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub from: String,
    pub to: String,
}

/// Common OCR confusion found in the recognized text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrConfusion {
    pub found: String,
    pub likely: String,
    pub note: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub recognized_text: String,
    /// 0-1.
    pub confidence: f32,
    pub validator: Option<ValidatorVerdict>,
    pub tokens: Vec<WordToken>,
    pub character_analysis: CharacterAnalysis,
    pub word_feedback: Vec<WordFeedback>,
    #[serde(serialize_with = "path_or_empty")]
    pub overlay_path: Option<PathBuf>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub image_quality: Option<ImageQuality>,
    pub ocr_confusions: Vec<OcrConfusion>,
    pub transcript_source: TranscriptSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub corrections_applied: Vec<Correction>,
}

impl AnalysisResult {
    /// A failed result carrying only the error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            recognized_text: String::new(),
            confidence: 0.0,
            validator: None,
            tokens: Vec::new(),
            character_analysis: CharacterAnalysis::default(),
            word_feedback: Vec::new(),
            overlay_path: None,
            error: Some(error.into()),
            warnings: Vec::new(),
            image_quality: None,
            ocr_confusions: Vec::new(),
            transcript_source: TranscriptSource::None,
            corrected_text: None,
            corrections_applied: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn path_or_empty<S: Serializer>(path: &Option<PathBuf>, s: S) -> Result<S::Ok, S::Error> {
    match path {
        Some(p) => s.serialize_str(&p.to_string_lossy()),
        None => s.serialize_str(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_serializes_empty_overlay_path() {
        let result = AnalysisResult::failure("Invalid image: empty");
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["overlay_path"], "");
        assert_eq!(json["error"], "Invalid image: empty");
        assert!(json["validator"].is_null());
        assert!(json.get("corrected_text").is_none());
    }

    #[test]
    fn test_word_token_uses_word_key() {
        let token = WordToken {
            text: "cat".to_string(),
            confidence: 92.0,
            bbox: BBox::new(1, 2, 3, 4),
            line_index: 0,
            paragraph_index: 0,
            position_in_line: 0,
        };
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["word"], "cat");
        assert_eq!(json["bbox"], serde_json::json!([1, 2, 3, 4]));
    }

    #[test]
    fn test_issue_from_kind() {
        let issue = Issue::from(IssueKind::BrokenStroke);
        assert_eq!(issue.kind, IssueKind::BrokenStroke);
        assert!(issue.suggestion.contains("connected strokes"));
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "broken_stroke");
    }
}
