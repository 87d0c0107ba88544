//! Temporal edge derivation over the assembled event stream.
//!
//! Events order globally by (scene order, sequence in scene, event id);
//! edges are derived from that order plus flashback markers. Self-loops
//! are never emitted and the (from, to, relation, basis) tuple is unique.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::artifact::sequential_id;
use crate::assemble::SceneIndexItem;
use crate::domain::{Event, TemporalBasis, TemporalEdge, TemporalRelation};

/// Sort rank for events in scenes the scene index does not know.
const UNKNOWN_SCENE_ORDER: i64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum TemporalError {
    #[error("events artifact contains no usable events")]
    NoEvents,
}

/// Derived temporal edges plus the counters reported in envelope metadata.
#[derive(Debug)]
pub struct TemporalGraph {
    pub edges: Vec<TemporalEdge>,
    pub relation_counts: BTreeMap<String, u64>,
    pub basis_counts: BTreeMap<String, u64>,
    pub event_count: usize,
    pub scene_count: usize,
}

struct EdgeRow {
    from_event_id: String,
    to_event_id: String,
    relation: TemporalRelation,
    basis: TemporalBasis,
}

#[derive(Default)]
struct EdgeCollector {
    rows: Vec<EdgeRow>,
    signatures: HashSet<(String, String, TemporalRelation, TemporalBasis)>,
    relation_counts: BTreeMap<String, u64>,
    basis_counts: BTreeMap<String, u64>,
}

impl EdgeCollector {
    fn add(&mut self, from: &str, to: &str, relation: TemporalRelation, basis: TemporalBasis) {
        if from.is_empty() || to.is_empty() || from == to {
            return;
        }
        let sig = (from.to_string(), to.to_string(), relation, basis);
        if !self.signatures.insert(sig) {
            return;
        }
        *self
            .relation_counts
            .entry(relation.as_str().to_string())
            .or_insert(0) += 1;
        *self
            .basis_counts
            .entry(basis.as_str().to_string())
            .or_insert(0) += 1;
        self.rows.push(EdgeRow {
            from_event_id: from.to_string(),
            to_event_id: to.to_string(),
            relation,
            basis,
        });
    }
}

/// Build the temporal edge artifact from events and the scene index.
pub fn build_temporal_graph(
    events: &[Event],
    scene_index: &[SceneIndexItem],
) -> Result<TemporalGraph, TemporalError> {
    let mut scene_order_by_id: HashMap<&str, i64> = HashMap::new();
    let mut scene_ids_in_order: Vec<&str> = Vec::new();
    for row in scene_index {
        scene_order_by_id.insert(row.scene_id.as_str(), row.scene_index);
        scene_ids_in_order.push(row.scene_id.as_str());
    }

    let mut ordered: Vec<&Event> = events
        .iter()
        .filter(|e| !e.event_id.is_empty() && !e.scene_id.is_empty())
        .collect();
    if ordered.is_empty() {
        return Err(TemporalError::NoEvents);
    }
    ordered.sort_by(|a, b| {
        let oa = scene_order_by_id
            .get(a.scene_id.as_str())
            .copied()
            .unwrap_or(UNKNOWN_SCENE_ORDER);
        let ob = scene_order_by_id
            .get(b.scene_id.as_str())
            .copied()
            .unwrap_or(UNKNOWN_SCENE_ORDER);
        oa.cmp(&ob)
            .then_with(|| a.sequence_in_scene.cmp(&b.sequence_in_scene))
            .then_with(|| a.event_id.cmp(&b.event_id))
    });

    let event_index_by_id: HashMap<&str, usize> = ordered
        .iter()
        .enumerate()
        .map(|(idx, e)| (e.event_id.as_str(), idx))
        .collect();
    let mut events_by_scene: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in &ordered {
        events_by_scene
            .entry(event.scene_id.as_str())
            .or_default()
            .push(event);
    }

    let mut collector = EdgeCollector::default();

    // Global screenplay-order adjacency, frame and flashback scenes alike.
    for pair in ordered.windows(2) {
        collector.add(
            &pair[0].event_id,
            &pair[1].event_id,
            TemporalRelation::Precedes,
            TemporalBasis::SceneOrderAndSequence,
        );
    }

    // Within-scene adjacency for local event walks.
    for scene_events in events_by_scene.values() {
        for pair in scene_events.windows(2) {
            collector.add(
                &pair[0].event_id,
                &pair[1].event_id,
                TemporalRelation::SameSceneNext,
                TemporalBasis::SceneOrderAndSequence,
            );
        }
    }

    // Scene transitions: last event of a scene to the first of the next.
    let known: HashSet<&str> = scene_ids_in_order.iter().copied().collect();
    let mut transition_order: Vec<&str> = scene_ids_in_order
        .iter()
        .copied()
        .filter(|sid| events_by_scene.get(sid).is_some_and(|v| !v.is_empty()))
        .collect();
    let mut unknown_scene_ids: Vec<&str> = events_by_scene
        .keys()
        .copied()
        .filter(|sid| !known.contains(sid))
        .collect();
    unknown_scene_ids.sort_unstable();
    transition_order.extend(unknown_scene_ids);
    for pair in transition_order.windows(2) {
        let (Some(prev_events), Some(next_events)) =
            (events_by_scene.get(pair[0]), events_by_scene.get(pair[1]))
        else {
            continue;
        };
        let (Some(prev_last), Some(next_first)) = (prev_events.last(), next_events.first()) else {
            continue;
        };
        collector.add(
            &prev_last.event_id,
            &next_first.event_id,
            TemporalRelation::CrossSceneContinuation,
            TemporalBasis::AdjacentSceneTransition,
        );
    }

    // Flashback markers get explicit narrative-jump edges.
    for scene_events in events_by_scene.values() {
        for (idx, event) in scene_events.iter().enumerate() {
            match event.event_type_l2.as_str() {
                "flashback_enter" => {
                    if let Some(next) = scene_events.get(idx + 1) {
                        collector.add(
                            &event.event_id,
                            &next.event_id,
                            TemporalRelation::FlashbackTo,
                            TemporalBasis::FlashbackMarkerNextEvent,
                        );
                    }
                }
                "flashback_return" => {
                    if let Some(global_idx) = event_index_by_id.get(event.event_id.as_str()) {
                        if let Some(next) = ordered.get(global_idx + 1) {
                            collector.add(
                                &event.event_id,
                                &next.event_id,
                                TemporalRelation::ReturnsToFrame,
                                TemporalBasis::FlashbackReturnMarkerNextEvent,
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let EdgeCollector {
        mut rows,
        relation_counts,
        basis_counts,
        ..
    } = collector;
    rows.sort_by(|a, b| {
        let pos = |id: &str| event_index_by_id.get(id).copied().unwrap_or(usize::MAX);
        pos(&a.from_event_id)
            .cmp(&pos(&b.from_event_id))
            .then_with(|| pos(&a.to_event_id).cmp(&pos(&b.to_event_id)))
            .then_with(|| a.relation.as_str().cmp(b.relation.as_str()))
            .then_with(|| a.basis.as_str().cmp(b.basis.as_str()))
    });

    let edges: Vec<TemporalEdge> = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| TemporalEdge {
            temporal_edge_id: sequential_id("te", 6, i + 1),
            from_event_id: row.from_event_id,
            to_event_id: row.to_event_id,
            relation: row.relation,
            basis: row.basis,
        })
        .collect();

    Ok(TemporalGraph {
        edges,
        relation_counts,
        basis_counts,
        event_count: ordered.len(),
        scene_count: events_by_scene.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn event(id: &str, scene_id: &str, seq: u32, l2: &str) -> Event {
        Event {
            event_id: id.to_string(),
            scene_id: scene_id.to_string(),
            event_type_l1: "structure".to_string(),
            event_type_l2: l2.to_string(),
            summary: String::new(),
            participants: vec![],
            evidence_refs: vec![],
            sequence_in_scene: seq,
            confidence: 1.0,
            extraction_method: "rule".to_string(),
            metadata: Map::new(),
        }
    }

    fn index_row(scene_id: &str, scene_index: i64) -> SceneIndexItem {
        serde_json::from_value(serde_json::json!({
            "scene_id": scene_id,
            "scene_index": scene_index,
            "header_raw": null,
            "header_prefix": null,
            "location_raw": null,
            "location_canonical_id": null,
            "time_of_day": null,
            "year_explicit": null,
            "year_inferred": null,
            "flags": [],
            "line_start": null,
            "line_end": null,
            "event_ids": [],
            "event_count": 0,
            "event_type_l1_counts": {},
            "event_type_l2_counts": {},
            "participant_entity_ids": [],
            "evidence_refs": [],
            "event_refs": []
        }))
        .unwrap()
    }

    fn fixture() -> (Vec<Event>, Vec<SceneIndexItem>) {
        let events = vec![
            event("evt_000001", "scene_001", 1, "scene_entry"),
            event("evt_000002", "scene_001", 2, "statement"),
            event("evt_000003", "scene_001", 3, "scene_exit"),
            event("evt_000004", "scene_002", 1, "scene_entry"),
            event("evt_000005", "scene_002", 2, "flashback_enter"),
            event("evt_000006", "scene_002", 3, "flashback_return"),
            event("evt_000007", "scene_002", 4, "scene_exit"),
        ];
        let index = vec![index_row("scene_001", 1), index_row("scene_002", 2)];
        (events, index)
    }

    #[test]
    fn test_precedes_covers_global_order() {
        let (events, index) = fixture();
        let graph = build_temporal_graph(&events, &index).unwrap();
        assert_eq!(
            graph.relation_counts.get("precedes").copied(),
            Some((events.len() - 1) as u64)
        );
    }

    #[test]
    fn test_no_self_loops_and_unique_signatures() {
        let (events, index) = fixture();
        let graph = build_temporal_graph(&events, &index).unwrap();
        let mut seen = HashSet::new();
        for edge in &graph.edges {
            assert_ne!(edge.from_event_id, edge.to_event_id);
            assert!(seen.insert((
                edge.from_event_id.clone(),
                edge.to_event_id.clone(),
                edge.relation,
                edge.basis
            )));
        }
    }

    #[test]
    fn test_cross_scene_continuation_edge() {
        let (events, index) = fixture();
        let graph = build_temporal_graph(&events, &index).unwrap();
        assert!(graph.edges.iter().any(|e| {
            e.relation == TemporalRelation::CrossSceneContinuation
                && e.from_event_id == "evt_000003"
                && e.to_event_id == "evt_000004"
        }));
    }

    #[test]
    fn test_flashback_edges() {
        let (events, index) = fixture();
        let graph = build_temporal_graph(&events, &index).unwrap();
        assert!(graph.edges.iter().any(|e| {
            e.relation == TemporalRelation::FlashbackTo
                && e.from_event_id == "evt_000005"
                && e.to_event_id == "evt_000006"
        }));
        assert!(graph.edges.iter().any(|e| {
            e.relation == TemporalRelation::ReturnsToFrame
                && e.from_event_id == "evt_000006"
                && e.to_event_id == "evt_000007"
        }));
    }

    #[test]
    fn test_edges_sorted_and_ids_sequential() {
        let (events, index) = fixture();
        let graph = build_temporal_graph(&events, &index).unwrap();
        for (i, edge) in graph.edges.iter().enumerate() {
            assert_eq!(edge.temporal_edge_id, sequential_id("te", 6, i + 1));
        }
        let positions: Vec<usize> = graph
            .edges
            .iter()
            .map(|e| {
                e.from_event_id
                    .trim_start_matches("evt_")
                    .parse::<usize>()
                    .unwrap()
            })
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_empty_events_error() {
        let err = build_temporal_graph(&[], &[]).unwrap_err();
        assert!(matches!(err, TemporalError::NoEvents));
    }
}
