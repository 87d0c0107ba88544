//! Rule-based relationship/state-change inference.
//!
//! Scans assembled events against the declarative rule set and folds
//! matches into aggregate claims keyed by
//! (scene, subject, object, dimension, direction, claim type). A rule
//! only fires when both endpoints appear as participants of the event;
//! text conditions match against a lowercased haystack built from the
//! event summary, evidence snippets, classification notes, and type
//! labels.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::artifact::{round3, sequential_id};
use crate::assemble::SceneIndexItem;
use crate::config::{StateChangeConfig, StateChangeRule};
use crate::domain::{ClaimType, Direction, Event, Magnitude, StateChange};

/// Sort position for events in scenes missing from the scene index.
const UNKNOWN_EVENT_POS: usize = 1_000_000_000;

/// Inference output plus envelope counters.
pub struct StateChangeBuild {
    pub items: Vec<StateChange>,
    pub claim_type_counts: BTreeMap<String, u64>,
    pub state_dimension_counts: BTreeMap<String, u64>,
    pub direction_counts: BTreeMap<String, u64>,
    pub pair_counts: BTreeMap<String, u64>,
    pub pair_counts_undirected: BTreeMap<String, u64>,
    pub core_pair_summary: BTreeMap<String, CorePairCoverage>,
    pub rule_count_active: usize,
    pub rule_hit_counts: BTreeMap<String, u64>,
}

impl StateChangeBuild {
    /// Core pair ids with no coverage in either direction.
    pub fn uncovered_core_pairs(&self) -> Vec<&str> {
        self.core_pair_summary
            .iter()
            .filter(|(_, cov)| cov.undirected_state_change_count == 0)
            .map(|(pair_id, _)| pair_id.as_str())
            .collect()
    }
}

/// Per-core-pair coverage, reported in envelope metadata.
#[derive(Debug, Clone, Serialize)]
pub struct CorePairCoverage {
    pub label: String,
    pub subject_id: String,
    pub object_id: String,
    pub directed_state_change_count: u64,
    pub undirected_state_change_count: u64,
}

pub fn pair_key(subject_id: &str, object_id: &str) -> String {
    format!("{subject_id}->{object_id}")
}

pub fn pair_key_undirected(subject_id: &str, object_id: &str) -> String {
    if subject_id <= object_id {
        format!("{subject_id}<->{object_id}")
    } else {
        format!("{object_id}<->{subject_id}")
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// Lowercased haystack for a rule's text conditions.
fn collect_event_text(event: &Event) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !event.summary.is_empty() {
        parts.push(event.summary.clone());
    }
    if let Some(spans) = event.metadata.get("evidence_spans").and_then(Value::as_array) {
        for span in spans {
            if let Some(snippet) = span.get("snippet").and_then(Value::as_str) {
                if !snippet.is_empty() {
                    parts.push(snippet.to_string());
                }
            }
        }
    }
    if let Some(notes) = event
        .metadata
        .get("classification_notes")
        .and_then(Value::as_array)
    {
        for note in notes {
            if let Some(text) = note.as_str() {
                parts.push(text.to_string());
            }
        }
    }
    parts.push(event.event_type_l1.clone());
    parts.push(event.event_type_l2.clone());
    parts.join(" \n ").to_lowercase()
}

fn rule_matches_event(
    rule: &StateChangeRule,
    event: &Event,
    participant_ids: &BTreeSet<&str>,
    haystack_lower: &str,
) -> bool {
    if rule.subject_id == rule.object_id {
        return false;
    }
    if !participant_ids.contains(rule.subject_id.as_str())
        || !participant_ids.contains(rule.object_id.as_str())
    {
        return false;
    }

    if let Some(l1_any) = &rule.event_type_l1_any {
        if !l1_any.iter().any(|l1| *l1 == event.event_type_l1) {
            return false;
        }
    }
    if let Some(l2_any) = &rule.event_type_l2_any {
        if !l2_any.iter().any(|l2| *l2 == event.event_type_l2) {
            return false;
        }
    }
    if let Some(l2_not) = &rule.event_type_l2_not {
        if l2_not.iter().any(|l2| *l2 == event.event_type_l2) {
            return false;
        }
    }
    if let Some(min_conf) = rule.min_event_confidence {
        if event.confidence < min_conf {
            return false;
        }
    }

    let needles = |values: &Option<Vec<String>>| -> Vec<String> {
        values
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_lowercase())
            .collect()
    };
    let text_any = needles(&rule.text_any);
    if !text_any.is_empty() && !text_any.iter().any(|n| haystack_lower.contains(n.as_str())) {
        return false;
    }
    let text_all = needles(&rule.text_all);
    if !text_all.iter().all(|n| haystack_lower.contains(n.as_str())) {
        return false;
    }
    let text_none = needles(&rule.text_none);
    if text_none.iter().any(|n| haystack_lower.contains(n.as_str())) {
        return false;
    }

    true
}

/// Weighted blend of rule and event confidence, clamped to (0.05, 0.999).
fn combine_confidence(rule_conf: f64, event_conf: f64) -> f64 {
    let combined = rule_conf * 0.7 + event_conf * 0.3;
    round3(combined.clamp(0.05, 0.999))
}

struct ClaimAcc {
    scene_id: String,
    subject_id: String,
    object_id: String,
    state_dimension: String,
    direction: Direction,
    claim_type: ClaimType,
    magnitude: Option<Magnitude>,
    trigger_event_ids: Vec<String>,
    evidence_refs: Vec<String>,
    confidence: f64,
    inference_method: String,
    rule_ids: Vec<String>,
    trigger_event_type_l2s: Vec<String>,
    scene_header_raw: String,
    sort_event_pos: usize,
}

/// Run the rule set over the event stream and aggregate matches.
pub fn infer_state_changes(
    events: &[Event],
    scene_index: &[SceneIndexItem],
    cfg: &StateChangeConfig,
) -> StateChangeBuild {
    let mut scene_order_by_id: BTreeMap<&str, i64> = BTreeMap::new();
    let mut scene_header_by_id: BTreeMap<&str, &str> = BTreeMap::new();
    for row in scene_index {
        scene_order_by_id.insert(row.scene_id.as_str(), row.scene_index);
        scene_header_by_id.insert(
            row.scene_id.as_str(),
            row.header_raw.as_deref().unwrap_or(""),
        );
    }
    let scene_order = |scene_id: &str| -> i64 {
        scene_order_by_id
            .get(scene_id)
            .copied()
            .unwrap_or(UNKNOWN_EVENT_POS as i64)
    };

    // Global event order: scene order, then sequence, then id.
    let mut ordered: Vec<&Event> = events
        .iter()
        .filter(|e| !e.event_id.is_empty() && !e.scene_id.is_empty())
        .collect();
    ordered.sort_by(|a, b| {
        scene_order(&a.scene_id)
            .cmp(&scene_order(&b.scene_id))
            .then_with(|| a.sequence_in_scene.cmp(&b.sequence_in_scene))
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    let event_pos: BTreeMap<&str, usize> = ordered
        .iter()
        .enumerate()
        .map(|(idx, e)| (e.event_id.as_str(), idx))
        .collect();

    let mut aggregated: BTreeMap<(String, String, String, String, String, String), ClaimAcc> =
        BTreeMap::new();
    let mut rule_hit_counts: BTreeMap<String, u64> = BTreeMap::new();

    for event in &ordered {
        let participant_ids: BTreeSet<&str> = event
            .participants
            .iter()
            .map(|p| p.entity_id.as_str())
            .collect();
        if participant_ids.len() < 2 {
            continue;
        }
        let haystack_lower = collect_event_text(event);
        let pos = event_pos
            .get(event.event_id.as_str())
            .copied()
            .unwrap_or(UNKNOWN_EVENT_POS);

        for rule in &cfg.rules {
            if !rule_matches_event(rule, event, &participant_ids, &haystack_lower) {
                continue;
            }

            let key = (
                event.scene_id.clone(),
                rule.subject_id.clone(),
                rule.object_id.clone(),
                rule.state_dimension.clone(),
                rule.direction.as_str().to_string(),
                rule.claim_type.as_str().to_string(),
            );
            let acc = aggregated.entry(key).or_insert_with(|| ClaimAcc {
                scene_id: event.scene_id.clone(),
                subject_id: rule.subject_id.clone(),
                object_id: rule.object_id.clone(),
                state_dimension: rule.state_dimension.clone(),
                direction: rule.direction,
                claim_type: rule.claim_type,
                magnitude: rule.magnitude,
                trigger_event_ids: Vec::new(),
                evidence_refs: Vec::new(),
                confidence: 0.0,
                inference_method: rule.inference_method.clone(),
                rule_ids: Vec::new(),
                trigger_event_type_l2s: Vec::new(),
                scene_header_raw: scene_header_by_id
                    .get(event.scene_id.as_str())
                    .copied()
                    .unwrap_or("")
                    .to_string(),
                sort_event_pos: pos,
            });

            push_unique(&mut acc.trigger_event_ids, &event.event_id);
            for evidence_ref in &event.evidence_refs {
                push_unique(&mut acc.evidence_refs, evidence_ref);
            }
            acc.confidence = acc
                .confidence
                .max(combine_confidence(rule.confidence, event.confidence));
            if Magnitude::rank(rule.magnitude) > Magnitude::rank(acc.magnitude) {
                acc.magnitude = rule.magnitude;
            }
            push_unique(&mut acc.rule_ids, &rule.rule_id);
            push_unique(&mut acc.trigger_event_type_l2s, &event.event_type_l2);
            acc.sort_event_pos = acc.sort_event_pos.min(pos);

            *rule_hit_counts.entry(rule.rule_id.clone()).or_insert(0) += 1;
        }
    }

    let mut rows: Vec<ClaimAcc> = aggregated.into_values().collect();
    rows.sort_by(|a, b| {
        a.sort_event_pos
            .cmp(&b.sort_event_pos)
            .then_with(|| scene_order(&a.scene_id).cmp(&scene_order(&b.scene_id)))
            .then_with(|| a.subject_id.cmp(&b.subject_id))
            .then_with(|| a.object_id.cmp(&b.object_id))
            .then_with(|| a.state_dimension.cmp(&b.state_dimension))
            .then_with(|| a.direction.as_str().cmp(b.direction.as_str()))
    });

    let mut items: Vec<StateChange> = Vec::new();
    let mut claim_type_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut state_dimension_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut direction_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut pair_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut pair_counts_undirected: BTreeMap<String, u64> = BTreeMap::new();

    for row in rows {
        if row.trigger_event_ids.is_empty() {
            continue;
        }
        let mut metadata = Map::new();
        metadata.insert(
            "rule_ids".into(),
            Value::Array(row.rule_ids.iter().cloned().map(Value::String).collect()),
        );
        metadata.insert(
            "trigger_event_type_l2s".into(),
            Value::Array(
                row.trigger_event_type_l2s
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        metadata.insert(
            "scene_header_raw".into(),
            Value::String(row.scene_header_raw.clone()),
        );

        *claim_type_counts
            .entry(row.claim_type.as_str().to_string())
            .or_insert(0) += 1;
        *state_dimension_counts
            .entry(row.state_dimension.clone())
            .or_insert(0) += 1;
        *direction_counts
            .entry(row.direction.as_str().to_string())
            .or_insert(0) += 1;
        *pair_counts
            .entry(pair_key(&row.subject_id, &row.object_id))
            .or_insert(0) += 1;
        *pair_counts_undirected
            .entry(pair_key_undirected(&row.subject_id, &row.object_id))
            .or_insert(0) += 1;

        items.push(StateChange {
            state_change_id: sequential_id("sc", 6, items.len() + 1),
            subject_id: row.subject_id,
            object_id: row.object_id,
            state_dimension: row.state_dimension,
            direction: row.direction,
            magnitude: row.magnitude,
            scene_id: row.scene_id,
            trigger_event_ids: row.trigger_event_ids,
            evidence_refs: row.evidence_refs,
            confidence: round3(row.confidence).clamp(0.05, 0.999),
            inference_method: row.inference_method,
            claim_type: row.claim_type,
            metadata,
        });
    }

    let mut core_pair_summary: BTreeMap<String, CorePairCoverage> = BTreeMap::new();
    for pair in &cfg.core_pairs {
        let subject_id = pair.subject_id.trim();
        let object_id = pair.object_id.trim();
        if subject_id.is_empty() || object_id.is_empty() {
            continue;
        }
        let directed_key = pair_key(subject_id, object_id);
        let undirected_key = pair_key_undirected(subject_id, object_id);
        let pair_id = pair
            .pair_id
            .clone()
            .unwrap_or_else(|| directed_key.clone());
        core_pair_summary.insert(
            pair_id,
            CorePairCoverage {
                label: pair.label.clone().unwrap_or_else(|| directed_key.clone()),
                subject_id: subject_id.to_string(),
                object_id: object_id.to_string(),
                directed_state_change_count: pair_counts.get(&directed_key).copied().unwrap_or(0),
                undirected_state_change_count: pair_counts_undirected
                    .get(&undirected_key)
                    .copied()
                    .unwrap_or(0),
            },
        );
    }

    StateChangeBuild {
        items,
        claim_type_counts,
        state_dimension_counts,
        direction_counts,
        pair_counts,
        pair_counts_undirected,
        core_pair_summary,
        rule_count_active: cfg.rules.len(),
        rule_hit_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorePair;
    use crate::domain::{Participant, ParticipantRole};
    use serde_json::json;

    fn event(
        event_id: &str,
        scene_id: &str,
        sequence: u32,
        l1: &str,
        l2: &str,
        summary: &str,
        participants: &[&str],
        confidence: f64,
    ) -> Event {
        Event {
            event_id: event_id.to_string(),
            scene_id: scene_id.to_string(),
            event_type_l1: l1.to_string(),
            event_type_l2: l2.to_string(),
            summary: summary.to_string(),
            participants: participants
                .iter()
                .map(|id| Participant {
                    entity_id: id.to_string(),
                    role: ParticipantRole::Participant,
                })
                .collect(),
            evidence_refs: vec![format!("evref_{event_id}")],
            sequence_in_scene: sequence,
            confidence,
            extraction_method: "rule_v1".to_string(),
            metadata: Map::new(),
        }
    }

    fn scene_row(scene_id: &str, scene_index: i64, header: &str) -> SceneIndexItem {
        SceneIndexItem {
            scene_id: scene_id.to_string(),
            scene_index,
            header_raw: Some(header.to_string()),
            header_prefix: None,
            location_raw: None,
            location_canonical_id: None,
            time_of_day: None,
            year_explicit: None,
            year_inferred: None,
            flags: vec![],
            line_start: None,
            line_end: None,
            event_ids: vec![],
            event_count: 0,
            event_type_l1_counts: BTreeMap::new(),
            event_type_l2_counts: BTreeMap::new(),
            participant_entity_ids: vec![],
            evidence_refs: vec![],
            event_refs: vec![],
        }
    }

    fn rule(rule_id: &str, subject: &str, object: &str) -> StateChangeRule {
        StateChangeRule {
            rule_id: rule_id.to_string(),
            subject_id: subject.to_string(),
            object_id: object.to_string(),
            state_dimension: "trust".to_string(),
            direction: Direction::Increase,
            claim_type: ClaimType::Inferred,
            magnitude: None,
            event_type_l1_any: None,
            event_type_l2_any: None,
            event_type_l2_not: None,
            min_event_confidence: None,
            text_any: None,
            text_all: None,
            text_none: None,
            confidence: 0.7,
            inference_method: "rule+review".to_string(),
        }
    }

    fn config(rules: Vec<StateChangeRule>) -> StateChangeConfig {
        StateChangeConfig {
            rules,
            core_pairs: vec![],
            disabled_rule_count: 0,
        }
    }

    #[test]
    fn test_aggregates_matches_per_scene_pair() {
        let events = vec![
            event("evt_000001", "scene_001", 1, "dialogue", "promise", "A", &["char_a", "char_b"], 0.9),
            event("evt_000002", "scene_001", 2, "dialogue", "agreement", "B", &["char_a", "char_b"], 0.65),
        ];
        let scenes = vec![scene_row("scene_001", 0, "INT. DINER - NIGHT")];
        let mut r = rule("r_trust", "char_a", "char_b");
        r.magnitude = Some(Magnitude::Low);
        let build = infer_state_changes(&events, &scenes, &config(vec![r]));

        assert_eq!(build.items.len(), 1);
        let item = &build.items[0];
        assert_eq!(item.state_change_id, "sc_000001");
        assert_eq!(item.trigger_event_ids, vec!["evt_000001", "evt_000002"]);
        assert_eq!(item.evidence_refs.len(), 2);
        // max over matches: 0.7*0.7 + 0.3*0.9 = 0.76
        assert_eq!(item.confidence, 0.76);
        assert_eq!(item.magnitude, Some(Magnitude::Low));
        assert_eq!(
            item.metadata.get("rule_ids"),
            Some(&json!(["r_trust"]))
        );
        assert_eq!(
            item.metadata.get("trigger_event_type_l2s"),
            Some(&json!(["promise", "agreement"]))
        );
        assert_eq!(
            item.metadata.get("scene_header_raw"),
            Some(&json!("INT. DINER - NIGHT"))
        );
        assert_eq!(build.rule_hit_counts.get("r_trust"), Some(&2));
    }

    #[test]
    fn test_both_endpoints_must_participate() {
        let events = vec![event(
            "evt_000001", "scene_001", 1, "dialogue", "promise", "A",
            &["char_a", "char_c"], 0.9,
        )];
        let scenes = vec![scene_row("scene_001", 0, "H")];
        let build = infer_state_changes(&events, &scenes, &config(vec![rule("r", "char_a", "char_b")]));
        assert!(build.items.is_empty());
    }

    #[test]
    fn test_single_participant_events_skipped() {
        let events = vec![event(
            "evt_000001", "scene_001", 1, "dialogue", "promise", "A", &["char_a"], 0.9,
        )];
        let scenes = vec![scene_row("scene_001", 0, "H")];
        let build = infer_state_changes(&events, &scenes, &config(vec![rule("r", "char_a", "char_a")]));
        assert!(build.items.is_empty());
    }

    #[test]
    fn test_type_and_text_conditions() {
        let events = vec![
            event("evt_000001", "scene_001", 1, "dialogue", "threat_verbal",
                  "I'll bury you", &["char_a", "char_b"], 0.84),
            event("evt_000002", "scene_001", 2, "dialogue", "statement",
                  "nice weather", &["char_a", "char_b"], 0.62),
        ];
        let scenes = vec![scene_row("scene_001", 0, "H")];
        let mut r = rule("r_threat", "char_a", "char_b");
        r.event_type_l2_any = Some(vec!["threat_verbal".to_string()]);
        r.text_any = Some(vec!["BURY".to_string()]);
        let build = infer_state_changes(&events, &scenes, &config(vec![r]));
        assert_eq!(build.items.len(), 1);
        assert_eq!(build.items[0].trigger_event_ids, vec!["evt_000001"]);

        let mut excluded = rule("r_threat", "char_a", "char_b");
        excluded.event_type_l2_not = Some(vec!["threat_verbal".to_string()]);
        excluded.min_event_confidence = Some(0.8);
        let build = infer_state_changes(&events, &scenes, &config(vec![excluded]));
        assert!(build.items.is_empty());
    }

    #[test]
    fn test_magnitude_escalates_and_confidence_takes_max() {
        let events = vec![
            event("evt_000001", "scene_001", 1, "dialogue", "promise", "A", &["char_a", "char_b"], 0.5),
            event("evt_000002", "scene_001", 2, "dialogue", "promise", "B", &["char_a", "char_b"], 0.95),
        ];
        let scenes = vec![scene_row("scene_001", 0, "H")];
        let mut low = rule("r_low", "char_a", "char_b");
        low.magnitude = Some(Magnitude::Low);
        low.confidence = 0.6;
        let mut high = rule("r_high", "char_a", "char_b");
        high.magnitude = Some(Magnitude::High);
        high.confidence = 0.9;
        let build = infer_state_changes(&events, &scenes, &config(vec![low, high]));
        assert_eq!(build.items.len(), 1);
        let item = &build.items[0];
        assert_eq!(item.magnitude, Some(Magnitude::High));
        // best blend: 0.9*0.7 + 0.95*0.3 = 0.915
        assert_eq!(item.confidence, 0.915);
        assert_eq!(item.metadata.get("rule_ids"), Some(&json!(["r_low", "r_high"])));
    }

    #[test]
    fn test_rows_ordered_by_earliest_trigger() {
        let events = vec![
            event("evt_000001", "scene_001", 1, "dialogue", "promise", "A", &["char_a", "char_b"], 0.9),
            event("evt_000002", "scene_002", 1, "dialogue", "promise", "B", &["char_c", "char_d"], 0.9),
        ];
        let scenes = vec![
            scene_row("scene_001", 0, "H1"),
            scene_row("scene_002", 1, "H2"),
        ];
        let build = infer_state_changes(
            &events,
            &scenes,
            &config(vec![rule("r_cd", "char_c", "char_d"), rule("r_ab", "char_a", "char_b")]),
        );
        assert_eq!(build.items.len(), 2);
        assert_eq!(build.items[0].subject_id, "char_a");
        assert_eq!(build.items[0].state_change_id, "sc_000001");
        assert_eq!(build.items[1].subject_id, "char_c");
        assert_eq!(build.items[1].state_change_id, "sc_000002");
    }

    #[test]
    fn test_core_pair_coverage() {
        let events = vec![event(
            "evt_000001", "scene_001", 1, "dialogue", "promise", "A",
            &["char_a", "char_b"], 0.9,
        )];
        let scenes = vec![scene_row("scene_001", 0, "H")];
        let mut cfg = config(vec![rule("r", "char_a", "char_b")]);
        cfg.core_pairs = vec![
            CorePair {
                pair_id: Some("a_b".to_string()),
                label: Some("A / B".to_string()),
                subject_id: "char_b".to_string(),
                object_id: "char_a".to_string(),
            },
            CorePair {
                pair_id: Some("a_z".to_string()),
                label: None,
                subject_id: "char_a".to_string(),
                object_id: "char_z".to_string(),
            },
        ];
        let build = infer_state_changes(&events, &scenes, &cfg);
        let covered = &build.core_pair_summary["a_b"];
        assert_eq!(covered.directed_state_change_count, 0);
        assert_eq!(covered.undirected_state_change_count, 1);
        assert_eq!(build.uncovered_core_pairs(), vec!["a_z"]);
    }

    #[test]
    fn test_haystack_includes_snippets_and_notes() {
        let mut e = event(
            "evt_000001", "scene_001", 1, "movement_travel", "drive", "",
            &["char_a", "char_b"], 0.76,
        );
        e.metadata.insert(
            "evidence_spans".into(),
            json!([{"snippet": "They ride in SILENCE."}]),
        );
        e.metadata
            .insert("classification_notes".into(), json!(["drive_keyword"]));
        let scenes = vec![scene_row("scene_001", 0, "H")];
        let mut r = rule("r_ride", "char_a", "char_b");
        r.text_all = Some(vec!["silence".to_string(), "drive_keyword".to_string()]);
        let build = infer_state_changes(&[e], &scenes, &config(vec![r]));
        assert_eq!(build.items.len(), 1);
    }
}
