//! Entity mention matching in free text.
//!
//! Narrative text frequently contains nested name collisions ("BILL
//! BUFALINO" vs "BUFALINO"). Matching is earliest-then-longest-wins so
//! specific names never get undercounted as generic ones, and selected
//! spans never overlap.

use std::collections::HashSet;

use regex::Regex;

use crate::domain::{Entity, EntityType};
use crate::text::normalize_apostrophes;

/// Alias texts excluded from pattern building: common words that appear
/// as cues but collide with ordinary prose.
const ALIAS_STOPWORDS: [&str; 3] = ["PRO", "WHISPERS", "SOMEONE"];

struct AliasPattern {
    alias_len: usize,
    regex: Regex,
}

struct EntityPatterns {
    entity_id: String,
    patterns: Vec<AliasPattern>,
}

/// Compiled alias patterns for all mentionable entities.
pub struct MentionMatcher {
    entities: Vec<EntityPatterns>,
}

impl MentionMatcher {
    /// Build patterns from canonical names and aliases of character,
    /// group, and organization entities. Location/object entities are
    /// excluded: scene location is attached explicitly by the assembler.
    pub fn new(entities: &[Entity]) -> Self {
        let mut compiled = Vec::new();
        for entity in entities {
            if !matches!(
                entity.entity_type,
                EntityType::Character | EntityType::Group | EntityType::Organization
            ) {
                continue;
            }
            let mut seen_alias_texts: HashSet<String> = HashSet::new();
            let mut patterns = Vec::new();
            let alias_iter =
                std::iter::once(entity.canonical_name.as_str()).chain(entity.aliases.iter().map(String::as_str));
            for alias in alias_iter {
                let alias_norm = normalize_apostrophes(alias).trim().to_string();
                if alias_norm.chars().count() < 2 {
                    continue;
                }
                if ALIAS_STOPWORDS.contains(&alias_norm.to_uppercase().as_str()) {
                    continue;
                }
                if !seen_alias_texts.insert(alias_norm.clone()) {
                    continue;
                }
                let Ok(regex) = Regex::new(&format!("(?i){}", regex::escape(&alias_norm))) else {
                    continue;
                };
                patterns.push(AliasPattern {
                    alias_len: alias_norm.chars().count(),
                    regex,
                });
            }
            if !patterns.is_empty() {
                compiled.push(EntityPatterns {
                    entity_id: entity.entity_id.clone(),
                    patterns,
                });
            }
        }
        Self { entities: compiled }
    }

    /// Find entities mentioned in `text`, excluding `exclude` ids.
    ///
    /// Per entity the earliest match wins (ties broken by longer alias).
    /// Across entities, overlaps resolve by earlier start, then longer
    /// match, then entity id. Returns entity ids in left-to-right text
    /// order; selected spans never overlap.
    pub fn find_mentions(&self, text: &str, exclude: &HashSet<String>) -> Vec<String> {
        let norm_text = normalize_apostrophes(text);
        let mut candidates: Vec<(usize, usize, &str)> = Vec::new();

        for entity in &self.entities {
            if exclude.contains(&entity.entity_id) {
                continue;
            }
            let mut best: Option<(usize, usize, usize)> = None;
            for pattern in &entity.patterns {
                let Some((start, end)) = first_bounded_match(&pattern.regex, &norm_text) else {
                    continue;
                };
                match best {
                    None => best = Some((start, end, pattern.alias_len)),
                    Some((best_start, best_end, _)) => {
                        let best_len = best_end - best_start;
                        if start < best_start || (start == best_start && pattern.alias_len > best_len)
                        {
                            best = Some((start, end, pattern.alias_len));
                        }
                    }
                }
            }
            if let Some((start, end, _)) = best {
                candidates.push((start, end, entity.entity_id.as_str()));
            }
        }

        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| (b.1 - b.0).cmp(&(a.1 - a.0)))
                .then_with(|| a.2.cmp(b.2))
        });

        let mut selected: Vec<(usize, &str)> = Vec::new();
        let mut selected_spans: Vec<(usize, usize)> = Vec::new();
        for (start, end, entity_id) in candidates {
            let overlaps = selected_spans
                .iter()
                .any(|&(s, e)| !(end <= s || start >= e));
            if overlaps {
                continue;
            }
            selected_spans.push((start, end));
            selected.push((start, entity_id));
        }

        selected.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        selected.into_iter().map(|(_, id)| id.to_string()).collect()
    }
}

/// First match of `regex` in `text` whose span is not adjacent to an
/// ASCII alphanumeric on either side (substring false-positive guard).
fn first_bounded_match(regex: &Regex, text: &str) -> Option<(usize, usize)> {
    for m in regex.find_iter(text) {
        let before_ok = match text[..m.start()].chars().next_back() {
            Some(c) => !c.is_ascii_alphanumeric(),
            None => true,
        };
        let after_ok = match text[m.end()..].chars().next() {
            Some(c) => !c.is_ascii_alphanumeric(),
            None => true,
        };
        if before_ok && after_ok {
            return Some((m.start(), m.end()));
        }
    }
    None
}
