use std::collections::BTreeMap;

use crate::model::{CharacterIssue, CharacterRegion, FeatureSet, Issue, IssueKind, WordFeedback, WordToken};
use crate::types::AnalyzerConfig;

/// Rule-based shape checks on measured features.
pub struct ErrorAnalyzer {
    cfg: AnalyzerConfig,
}

impl ErrorAnalyzer {
    pub fn new(cfg: AnalyzerConfig) -> Self {
        Self { cfg }
    }

    pub fn analyze(&self, f: &FeatureSet) -> Vec<Issue> {
        let mut issues = Vec::new();
        if f.has_curve && f.circularity < self.cfg.incomplete_curve_circularity {
            issues.push(IssueKind::IncompleteCurve.into());
        }
        if !f.has_loop && f.circularity > self.cfg.unclosed_loop_circularity {
            issues.push(IssueKind::UnclosedLoop.into());
        }
        if f.aspect_ratio > self.cfg.flipped_aspect {
            issues.push(IssueKind::FlippedLetter.into());
        } else if f.aspect_ratio < self.cfg.compressed_aspect {
            issues.push(IssueKind::CompressedLetter.into());
        }
        if f.stroke_count > self.cfg.max_strokes {
            issues.push(IssueKind::BrokenStroke.into());
        }
        issues
    }

    pub fn annotate(&self, regions: &mut [CharacterRegion]) {
        for region in regions {
            region.issues = self.analyze(&region.features);
        }
    }
}

/// Group the primary issue of each mapped character by word.
///
/// Only words with at least one issue are returned, in word order; issues
/// inside a word are ordered by `char_index`.
pub fn synthesize(regions: &[CharacterRegion], tokens: &[WordToken]) -> Vec<WordFeedback> {
    let mut per_word: BTreeMap<usize, Vec<CharacterIssue>> = BTreeMap::new();

    for region in regions {
        let (Some(word_index), Some(char_index)) = (region.word_index, region.char_index) else {
            continue;
        };
        let Some(primary) = region.issues.first() else {
            continue;
        };
        let Some(token) = tokens.get(word_index) else {
            continue;
        };

        let letter_hint = token
            .text
            .chars()
            .nth(char_index)
            .or_else(|| region.top_candidate().map(|c| c.letter))
            .map(String::from)
            .unwrap_or_else(|| "?".to_string());

        per_word.entry(word_index).or_default().push(CharacterIssue {
            char_index,
            letter_hint,
            description: primary.description.clone(),
            suggestion: primary.suggestion.clone(),
            kind: primary.kind,
        });
    }

    per_word
        .into_iter()
        .map(|(word_index, mut issues)| {
            issues.sort_by_key(|i| i.char_index);
            WordFeedback {
                word_index,
                word_text: tokens[word_index].text.clone(),
                issues,
            }
        })
        .collect()
}
