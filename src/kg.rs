//! Knowledge-graph edge derivation.
//!
//! Two generation methods: manual edges declared in config (validated
//! against the entity artifact, skipped and counted when an endpoint is
//! unknown) and derived co-speaker co-occurrence edges. Evidence is
//! referenced at scene granularity as `scene:<scene_id>` placeholders.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde_json::{Map, Value};

use crate::artifact::sequential_id;
use crate::config::{AliasConfig, ManualKgEdge};
use crate::domain::{AliasKind, AliasRecord, AliasSource, Entity, EntityType, KgEdge, Stability};
use crate::domain::Utterance;

/// Scenes kept as evidence per co-occurrence pair.
const MAX_PAIR_EVIDENCE_SCENES: usize = 8;

/// Tunables for co-occurrence derivation.
#[derive(Debug, Clone, Copy)]
pub struct CooccurrenceOptions {
    /// Minimum shared dialogue scenes before a pair produces an edge.
    pub min_scenes: u64,
    /// Cap on derived edges, applied after ranking.
    pub max_edges: usize,
}

impl Default for CooccurrenceOptions {
    fn default() -> Self {
        Self {
            min_scenes: 3,
            max_edges: 120,
        }
    }
}

/// KG edge build output plus envelope counters.
pub struct KgBuild {
    pub edges: Vec<KgEdge>,
    pub manual_edge_count: usize,
    pub derived_edge_count: usize,
    pub skipped_manual_edge_count: usize,
    pub predicate_counts: BTreeMap<String, u64>,
}

struct EdgeRow {
    subject_id: String,
    predicate: String,
    object_id: String,
    stability: Stability,
    evidence_refs: Vec<String>,
    generation_method: &'static str,
    metadata: Map<String, Value>,
}

fn scene_evidence_refs(scene_ids: &[String]) -> Vec<String> {
    scene_ids.iter().map(|sid| format!("scene:{sid}")).collect()
}

/// Build the KG edge artifact.
pub fn build_kg_edges(
    entities: &[Entity],
    alias_records: &[AliasRecord],
    utterances: &[Utterance],
    cfg: &AliasConfig,
    options: CooccurrenceOptions,
) -> KgBuild {
    let entity_by_id: HashMap<&str, &Entity> =
        entities.iter().map(|e| (e.entity_id.as_str(), e)).collect();

    let mut rows: Vec<EdgeRow> = Vec::new();
    let mut manual_edge_count = 0usize;
    let mut skipped_manual_edge_count = 0usize;
    let mut manual_signatures: HashSet<(String, String, String)> = HashSet::new();

    for spec in &cfg.manual_kg_edges {
        let Some(edge) = ManualKgEdge::from_value(spec) else {
            skipped_manual_edge_count += 1;
            continue;
        };
        if !entity_by_id.contains_key(edge.subject_id.as_str())
            || !entity_by_id.contains_key(edge.object_id.as_str())
        {
            skipped_manual_edge_count += 1;
            continue;
        }
        manual_signatures.insert((
            edge.subject_id.clone(),
            edge.predicate.clone(),
            edge.object_id.clone(),
        ));
        let mut metadata = Map::new();
        metadata.insert(
            "generation_method".into(),
            Value::String("manual_config".into()),
        );
        metadata.insert(
            "evidence_scene_ids".into(),
            Value::Array(
                edge.evidence_scene_ids
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        rows.push(EdgeRow {
            subject_id: edge.subject_id,
            predicate: edge.predicate,
            object_id: edge.object_id,
            stability: Stability::parse(&edge.stability).unwrap_or(Stability::SemiStable),
            evidence_refs: scene_evidence_refs(&edge.evidence_scene_ids),
            generation_method: "manual_config",
            metadata,
        });
        manual_edge_count += 1;
    }

    // Raw cue -> entity map from the alias artifact (utterance cues only).
    let mut raw_cue_to_entity: HashMap<&str, &str> = HashMap::new();
    for record in alias_records {
        if !record.source.contains(AliasSource::UtteranceCue) {
            continue;
        }
        if record.alias_kind == AliasKind::NormalizedCue {
            continue;
        }
        raw_cue_to_entity
            .entry(record.alias_raw.as_str())
            .or_insert(record.entity_id.as_str());
    }

    // Per-scene character speaker sets.
    let mut scene_speakers: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for utt in utterances {
        if utt.scene_id.is_empty() {
            continue;
        }
        let Some(entity_id) = raw_cue_to_entity.get(utt.speaker_cue_raw.as_str()) else {
            continue;
        };
        let Some(entity) = entity_by_id.get(entity_id) else {
            continue;
        };
        if entity.entity_type != EntityType::Character {
            continue;
        }
        scene_speakers
            .entry(utt.scene_id.as_str())
            .or_default()
            .insert(entity_id);
    }

    let mut pair_scene_counts: BTreeMap<(String, String), u64> = BTreeMap::new();
    let mut pair_scenes: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for (scene_id, speakers) in &scene_speakers {
        if speakers.len() < 2 {
            continue;
        }
        let ordered: Vec<&str> = speakers.iter().copied().collect();
        for (i, a) in ordered.iter().enumerate() {
            for b in &ordered[i + 1..] {
                let pair = (a.to_string(), b.to_string());
                *pair_scene_counts.entry(pair.clone()).or_insert(0) += 1;
                let scenes = pair_scenes.entry(pair).or_default();
                if scenes.len() < MAX_PAIR_EVIDENCE_SCENES {
                    scenes.push(scene_id.to_string());
                }
            }
        }
    }

    let mut candidates: Vec<EdgeRow> = Vec::new();
    for ((a, b), count) in &pair_scene_counts {
        if *count < options.min_scenes {
            continue;
        }
        // A manual associated_with edge already covers the pair in either
        // direction.
        let covered = manual_signatures.contains(&(
            a.clone(),
            "associated_with".to_string(),
            b.clone(),
        )) || manual_signatures.contains(&(
            b.clone(),
            "associated_with".to_string(),
            a.clone(),
        ));
        if covered {
            continue;
        }
        let scenes = pair_scenes
            .get(&(a.clone(), b.clone()))
            .cloned()
            .unwrap_or_default();
        let mut metadata = Map::new();
        metadata.insert(
            "generation_method".into(),
            Value::String("scene_co_speaker".into()),
        );
        metadata.insert("cooccurrence_scene_count".into(), Value::from(*count));
        metadata.insert(
            "evidence_scene_ids".into(),
            Value::Array(scenes.iter().cloned().map(Value::String).collect()),
        );
        candidates.push(EdgeRow {
            subject_id: a.clone(),
            predicate: "co_present_dialogue".to_string(),
            object_id: b.clone(),
            stability: Stability::Volatile,
            evidence_refs: scene_evidence_refs(&scenes),
            generation_method: "scene_co_speaker",
            metadata,
        });
    }

    candidates.sort_by(|x, y| {
        let count = |row: &EdgeRow| {
            row.metadata
                .get("cooccurrence_scene_count")
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        count(y)
            .cmp(&count(x))
            .then_with(|| x.subject_id.cmp(&y.subject_id))
            .then_with(|| x.object_id.cmp(&y.object_id))
    });
    let derived_edge_count = candidates.len().min(options.max_edges);
    rows.extend(candidates.into_iter().take(options.max_edges));

    // Deterministic ids only after the final sort.
    rows.sort_by(|a, b| {
        a.subject_id
            .cmp(&b.subject_id)
            .then_with(|| a.predicate.cmp(&b.predicate))
            .then_with(|| a.object_id.cmp(&b.object_id))
            .then_with(|| a.generation_method.cmp(b.generation_method))
    });

    let mut predicate_counts: BTreeMap<String, u64> = BTreeMap::new();
    let edges: Vec<KgEdge> = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            *predicate_counts.entry(row.predicate.clone()).or_insert(0) += 1;
            KgEdge {
                edge_id: sequential_id("kg", 5, i + 1),
                subject_id: row.subject_id,
                predicate: row.predicate,
                object_id: row.object_id,
                stability: row.stability,
                evidence_refs: row.evidence_refs,
                metadata: row.metadata,
            }
        })
        .collect();

    KgBuild {
        edges,
        manual_edge_count,
        derived_edge_count,
        skipped_manual_edge_count,
        predicate_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(id: &str, entity_type: &str) -> Entity {
        serde_json::from_value(json!({
            "entity_id": id,
            "entity_type": entity_type,
            "canonical_name": id,
            "aliases": [],
            "first_scene_id": null,
            "metadata": {}
        }))
        .unwrap()
    }

    fn alias(raw: &str, entity_id: &str) -> AliasRecord {
        serde_json::from_value(json!({
            "alias_raw": raw,
            "alias_normalized": raw,
            "entity_id": entity_id,
            "entity_type": "character",
            "alias_kind": "auto_from_cue",
            "source": "utterance_cue",
            "first_scene_id": null,
            "count": 1
        }))
        .unwrap()
    }

    fn utterance(scene_id: &str, cue: &str) -> Utterance {
        serde_json::from_value(json!({
            "utterance_id": format!("utt_{scene_id}_{cue}"),
            "scene_id": scene_id,
            "speaker_cue_raw": cue,
            "text": "...",
            "sequence_in_scene": 1
        }))
        .unwrap()
    }

    fn shared_scenes(n: usize) -> Vec<Utterance> {
        let mut out = Vec::new();
        for i in 0..n {
            let sid = format!("scene_{:03}", i + 1);
            out.push(utterance(&sid, "FRANK"));
            out.push(utterance(&sid, "RUSSELL"));
        }
        out
    }

    fn base_entities() -> Vec<Entity> {
        vec![
            entity("char_frank", "character"),
            entity("char_russell", "character"),
        ]
    }

    fn base_aliases() -> Vec<AliasRecord> {
        vec![alias("FRANK", "char_frank"), alias("RUSSELL", "char_russell")]
    }

    #[test]
    fn test_cooccurrence_edge_requires_min_scenes() {
        let cfg = AliasConfig::default();
        let below = build_kg_edges(
            &base_entities(),
            &base_aliases(),
            &shared_scenes(2),
            &cfg,
            CooccurrenceOptions::default(),
        );
        assert!(below.edges.is_empty());

        let at = build_kg_edges(
            &base_entities(),
            &base_aliases(),
            &shared_scenes(3),
            &cfg,
            CooccurrenceOptions::default(),
        );
        assert_eq!(at.edges.len(), 1);
        let edge = &at.edges[0];
        assert_eq!(edge.predicate, "co_present_dialogue");
        assert_eq!(edge.stability, Stability::Volatile);
        assert_eq!(edge.subject_id, "char_frank");
        assert_eq!(edge.object_id, "char_russell");
        assert_eq!(edge.evidence_refs[0], "scene:scene_001");
    }

    #[test]
    fn test_manual_edge_with_unknown_endpoint_skipped() {
        let cfg: AliasConfig = serde_json::from_value(json!({
            "manual_kg_edges": [
                {"subject_id": "char_frank", "predicate": "works_for", "object_id": "char_ghost"},
                {"subject_id": "char_frank", "predicate": "works_for", "object_id": "char_russell"}
            ]
        }))
        .unwrap();
        let build = build_kg_edges(
            &base_entities(),
            &base_aliases(),
            &[],
            &cfg,
            CooccurrenceOptions::default(),
        );
        assert_eq!(build.manual_edge_count, 1);
        assert_eq!(build.skipped_manual_edge_count, 1);
        assert_eq!(build.edges.len(), 1);
        assert_eq!(build.edges[0].edge_id, "kg_00001");
    }

    #[test]
    fn test_manual_associated_with_suppresses_cooccurrence() {
        let cfg: AliasConfig = serde_json::from_value(json!({
            "manual_kg_edges": [
                {"subject_id": "char_russell", "predicate": "associated_with",
                 "object_id": "char_frank", "stability": "stable",
                 "evidence_scene_ids": ["scene_001"]}
            ]
        }))
        .unwrap();
        let build = build_kg_edges(
            &base_entities(),
            &base_aliases(),
            &shared_scenes(5),
            &cfg,
            CooccurrenceOptions::default(),
        );
        assert_eq!(build.edges.len(), 1);
        assert_eq!(build.edges[0].predicate, "associated_with");
        assert_eq!(build.derived_edge_count, 0);
    }

    #[test]
    fn test_non_character_speakers_excluded() {
        let entities = vec![
            entity("char_frank", "character"),
            entity("org_teamsters", "organization"),
        ];
        let aliases = vec![alias("FRANK", "char_frank"), alias("TEAMSTERS", "org_teamsters")];
        let mut utterances = Vec::new();
        for i in 0..4 {
            let sid = format!("scene_{:03}", i + 1);
            utterances.push(utterance(&sid, "FRANK"));
            utterances.push(utterance(&sid, "TEAMSTERS"));
        }
        let build = build_kg_edges(
            &entities,
            &aliases,
            &utterances,
            &AliasConfig::default(),
            CooccurrenceOptions::default(),
        );
        assert!(build.edges.is_empty());
    }

    #[test]
    fn test_pair_evidence_scene_cap() {
        let build = build_kg_edges(
            &base_entities(),
            &base_aliases(),
            &shared_scenes(12),
            &AliasConfig::default(),
            CooccurrenceOptions::default(),
        );
        let edge = &build.edges[0];
        assert_eq!(edge.evidence_refs.len(), MAX_PAIR_EVIDENCE_SCENES);
        assert_eq!(
            edge.metadata
                .get("cooccurrence_scene_count")
                .and_then(Value::as_u64),
            Some(12)
        );
    }

    #[test]
    fn test_derived_edge_cap() {
        // Three characters all pairwise co-present in four scenes; cap at 2.
        let entities = vec![
            entity("char_a", "character"),
            entity("char_b", "character"),
            entity("char_c", "character"),
        ];
        let aliases = vec![
            alias("A J", "char_a"),
            alias("B J", "char_b"),
            alias("C J", "char_c"),
        ];
        let mut utterances = Vec::new();
        for i in 0..4 {
            let sid = format!("scene_{:03}", i + 1);
            for cue in ["A J", "B J", "C J"] {
                utterances.push(utterance(&sid, cue));
            }
        }
        let build = build_kg_edges(
            &entities,
            &aliases,
            &utterances,
            &AliasConfig::default(),
            CooccurrenceOptions {
                min_scenes: 3,
                max_edges: 2,
            },
        );
        assert_eq!(build.edges.len(), 2);
        assert_eq!(build.derived_edge_count, 2);
    }
}
