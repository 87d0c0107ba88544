//! Temporal edges, state changes, and knowledge-graph edges.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordering relation between two events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalRelation {
    Precedes,
    SameSceneNext,
    CrossSceneContinuation,
    FlashbackTo,
    ReturnsToFrame,
}

impl TemporalRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalRelation::Precedes => "precedes",
            TemporalRelation::SameSceneNext => "same_scene_next",
            TemporalRelation::CrossSceneContinuation => "cross_scene_continuation",
            TemporalRelation::FlashbackTo => "flashback_to",
            TemporalRelation::ReturnsToFrame => "returns_to_frame",
        }
    }
}

/// Why a temporal edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalBasis {
    SceneOrderAndSequence,
    AdjacentSceneTransition,
    FlashbackMarkerNextEvent,
    FlashbackReturnMarkerNextEvent,
}

impl TemporalBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalBasis::SceneOrderAndSequence => "scene_order_and_sequence",
            TemporalBasis::AdjacentSceneTransition => "adjacent_scene_transition",
            TemporalBasis::FlashbackMarkerNextEvent => "flashback_marker_next_event",
            TemporalBasis::FlashbackReturnMarkerNextEvent => "flashback_return_marker_next_event",
        }
    }
}

/// Directed ordering edge between two events. Never reflexive; the
/// (from, to, relation, basis) tuple is unique within one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalEdge {
    pub temporal_edge_id: String,
    pub from_event_id: String,
    pub to_event_id: String,
    pub relation: TemporalRelation,
    pub basis: TemporalBasis,
}

/// Direction of an inferred relationship/state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
    Shift,
    Break,
    RepairAttempt,
    Stabilize,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increase => "increase",
            Direction::Decrease => "decrease",
            Direction::Shift => "shift",
            Direction::Break => "break",
            Direction::RepairAttempt => "repair_attempt",
            Direction::Stabilize => "stabilize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "increase" => Some(Direction::Increase),
            "decrease" => Some(Direction::Decrease),
            "shift" => Some(Direction::Shift),
            "break" => Some(Direction::Break),
            "repair_attempt" => Some(Direction::RepairAttempt),
            "stabilize" => Some(Direction::Stabilize),
            _ => None,
        }
    }
}

/// Magnitude of a state change. Escalates monotonically by rank when
/// multiple triggering events fold into one aggregate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Low,
    Medium,
    High,
}

impl Magnitude {
    /// Rank for escalation; absent magnitude ranks 0.
    pub fn rank(m: Option<Magnitude>) -> u8 {
        match m {
            None => 0,
            Some(Magnitude::Low) => 1,
            Some(Magnitude::Medium) => 2,
            Some(Magnitude::High) => 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Magnitude::Low),
            "medium" => Some(Magnitude::Medium),
            "high" => Some(Magnitude::High),
            _ => None,
        }
    }
}

/// Whether the claim comes from direct wording or a behavioral cue rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Explicit,
    Inferred,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimType::Explicit => "explicit",
            ClaimType::Inferred => "inferred",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(ClaimType::Explicit),
            "inferred" => Some(ClaimType::Inferred),
            _ => None,
        }
    }
}

/// Aggregated, evidence-backed relationship/state-change claim between
/// two entities, keyed per scene/pair/dimension/direction/claim type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub state_change_id: String,
    pub subject_id: String,
    pub object_id: String,
    pub state_dimension: String,
    pub direction: Direction,
    pub magnitude: Option<Magnitude>,
    pub scene_id: String,
    pub trigger_event_ids: Vec<String>,
    pub evidence_refs: Vec<String>,
    pub confidence: f64,
    pub inference_method: String,
    pub claim_type: ClaimType,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// How durable a KG edge is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Stable,
    SemiStable,
    Volatile,
}

impl Stability {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stable" => Some(Stability::Stable),
            "semi_stable" => Some(Stability::SemiStable),
            "volatile" => Some(Stability::Volatile),
            _ => None,
        }
    }
}

/// Knowledge-graph edge: manual (declared) or derived (co-occurrence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KgEdge {
    pub edge_id: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
    pub stability: Stability,
    pub evidence_refs: Vec<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_rank_escalation() {
        assert!(Magnitude::rank(None) < Magnitude::rank(Some(Magnitude::Low)));
        assert!(Magnitude::rank(Some(Magnitude::Low)) < Magnitude::rank(Some(Magnitude::Medium)));
        assert!(Magnitude::rank(Some(Magnitude::Medium)) < Magnitude::rank(Some(Magnitude::High)));
    }

    #[test]
    fn test_direction_parse_round_trip() {
        for s in ["increase", "decrease", "shift", "break", "repair_attempt", "stabilize"] {
            let direction = Direction::parse(s).unwrap();
            assert_eq!(direction.as_str(), s);
        }
        assert!(Direction::parse("sideways").is_none());
    }

    #[test]
    fn test_temporal_relation_serde() {
        let json = serde_json::to_string(&TemporalRelation::SameSceneNext).unwrap();
        assert_eq!(json, "\"same_scene_next\"");
    }
}
