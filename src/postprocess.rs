use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::model::{Correction, OcrConfusion};

/// Character sequences the engine commonly produces for handwritten letters.
const CONFUSIONS: [(&str, &str); 4] = [("rn", "m"), ("cl", "d"), ("vv", "w"), ("ii", "n")];

const CONFUSION_NOTES: [(&str, &str); 8] = [
    ("0", "O"),
    ("1", "I"),
    ("5", "S"),
    ("8", "B"),
    ("cl", "d"),
    ("rn", "m"),
    ("vv", "w"),
    ("ii", "n"),
];

const SPELLING_FIXES: [(&str, &str); 8] = [
    ("teh", "the"),
    ("adn", "and"),
    ("hte", "the"),
    ("taht", "that"),
    ("wiht", "with"),
    ("recieve", "receive"),
    ("freind", "friend"),
    ("becuase", "because"),
];

static LONE_ONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b1\b").expect("valid digit regex"));
static LONE_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b0\b").expect("valid digit regex"));
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z]+\b").expect("valid word regex"));

pub fn normalize_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse every run of `min_run` or more identical characters to one.
pub fn collapse_runs(text: &str, min_run: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut j = i;
        while j < chars.len() && chars[j] == c {
            j += 1;
        }
        let run = j - i;
        if run >= min_run {
            out.push(c);
        } else {
            out.extend(std::iter::repeat(c).take(run));
        }
        i = j;
    }
    out
}

/// Clean a single recognized line.
pub fn clean_line(line: &str) -> String {
    let mut text = normalize_whitespace(line);
    for (wrong, right) in CONFUSIONS {
        text = text.replace(wrong, right);
    }
    let text = LONE_ONE.replace_all(&text, "I");
    let text = LONE_ZERO.replace_all(&text, "O");
    collapse_runs(&text, 4)
}

/// Clean multi-line text line by line, dropping lines that end up empty.
pub fn clean_text(text: &str) -> String {
    text.lines()
        .map(clean_line)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Heuristic confidence for text that carries no engine score.
pub fn text_confidence(text: &str) -> f32 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let total = text.chars().count() as f32;
    let readable = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .count() as f32;
    let mut confidence = 0.4 + 0.4 * readable / total;

    let words: Vec<&str> = text.split_whitespace().collect();
    if !words.is_empty() {
        let valid = words
            .iter()
            .filter(|w| w.chars().count() >= 2 && w.chars().all(char::is_alphabetic))
            .count();
        confidence += 0.2 * valid as f32 / words.len() as f32;
    }

    if trimmed.chars().count() < 3 {
        confidence *= 0.7;
    }
    confidence.min(1.0)
}

/// Sequences in `text` that are frequent recognition confusions.
pub fn ocr_confusions(text: &str) -> Vec<OcrConfusion> {
    CONFUSION_NOTES
        .iter()
        .filter(|(found, _)| text.contains(found))
        .map(|(found, likely)| OcrConfusion {
            found: found.to_string(),
            likely: likely.to_string(),
            note: format!("'{found}' might be '{likely}'"),
        })
        .collect()
}

/// Apply whole-word spelling fixes, keeping a leading capital.
pub fn apply_corrections(text: &str) -> (String, Vec<Correction>) {
    let mut applied: Vec<Correction> = Vec::new();
    let corrected = WORD.replace_all(text, |caps: &Captures| {
        let word = &caps[0];
        let lower = word.to_lowercase();
        let Some((_, fix)) = SPELLING_FIXES.iter().find(|(wrong, _)| *wrong == lower) else {
            return word.to_string();
        };
        let replacement = if word.chars().next().is_some_and(char::is_uppercase) {
            capitalize(fix)
        } else {
            fix.to_string()
        };
        let correction = Correction {
            from: word.to_string(),
            to: replacement.clone(),
        };
        if !applied.contains(&correction) {
            applied.push(correction);
        }
        replacement
    });
    (corrected.into_owned(), applied)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
