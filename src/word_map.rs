use std::collections::BTreeMap;

use crate::model::{CharacterRegion, WordToken};

/// Assigns character regions to recognized words.
pub struct WordMapper {
    reach_factor: f32,
}

impl WordMapper {
    pub fn new(reach_factor: f32) -> Self {
        Self { reach_factor }
    }

    /// Pick the word for a single region: containment first, then the
    /// nearest word within reach. Ties keep the lowest word index.
    fn word_for(&self, region: &CharacterRegion, tokens: &[WordToken]) -> Option<usize> {
        let c = region.bbox.center();
        if let Some(idx) = tokens.iter().position(|t| t.bbox.contains(c)) {
            return Some(idx);
        }

        let mut best: Option<(usize, f32)> = None;
        for (idx, token) in tokens.iter().enumerate() {
            let tc = token.bbox.center();
            let dist = 2.0 * (c.y - tc.y).abs() + (c.x - tc.x).abs();
            let reach = self.reach_factor * (token.bbox.w as f32 + 2.0 * token.bbox.h as f32);
            if dist > reach {
                continue;
            }
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((idx, dist));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Set `word_index` and `char_index` on every region that maps to a word.
    /// Returns the number of mapped regions.
    pub fn map(&self, regions: &mut [CharacterRegion], tokens: &[WordToken]) -> usize {
        for region in regions.iter_mut() {
            region.word_index = None;
            region.char_index = None;
        }
        if tokens.is_empty() {
            return 0;
        }

        let mut per_word: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, region) in regions.iter().enumerate() {
            if let Some(word) = self.word_for(region, tokens) {
                per_word.entry(word).or_default().push(i);
            }
        }

        let mut mapped = 0;
        for (word, mut members) in per_word {
            members.sort_by_key(|&i| (regions[i].bbox.x, regions[i].id));
            for (char_index, i) in members.into_iter().enumerate() {
                regions[i].word_index = Some(word);
                regions[i].char_index = Some(char_index);
                mapped += 1;
            }
        }
        mapped
    }
}
