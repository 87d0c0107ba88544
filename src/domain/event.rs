//! Assembled event records with participants and evidence.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Participant role vocabulary. Fixed and small on purpose: action text
/// role attribution is conservative (no syntactic parsing), so roles stay
/// coarse enough to be trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Speaker,
    Listener,
    Target,
    Mentioned,
    Messenger,
    Participant,
    Location,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Speaker => "speaker",
            ParticipantRole::Listener => "listener",
            ParticipantRole::Target => "target",
            ParticipantRole::Mentioned => "mentioned",
            ParticipantRole::Messenger => "messenger",
            ParticipantRole::Participant => "participant",
            ParticipantRole::Location => "location",
        }
    }
}

/// Inline participant entry on an event, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub entity_id: String,
    pub role: ParticipantRole,
}

/// Immutable pointer back to the source text for one event.
///
/// `snippet` is a truncated, whitespace-collapsed excerpt, never the full
/// block text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub evidence_ref_id: String,
    pub source_file: String,
    pub scene_id: String,
    pub block_type: String,
    pub block_id: String,
    pub line_start: i64,
    pub line_end: i64,
    pub snippet: String,
}

/// One classified dialogue line, action beat, or synthetic structural
/// marker. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub scene_id: String,
    pub event_type_l1: String,
    pub event_type_l2: String,
    pub summary: String,
    pub participants: Vec<Participant>,
    pub evidence_refs: Vec<String>,

    /// Strictly increasing per scene starting at 1, synthetic events
    /// included.
    pub sequence_in_scene: u32,

    pub confidence: f64,
    pub extraction_method: String,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Event {
    /// Distinct participant entity ids (role-independent).
    pub fn participant_entity_ids(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for p in &self.participants {
            if !seen.contains(&p.entity_id.as_str()) {
                seen.push(p.entity_id.as_str());
            }
        }
        seen
    }
}

/// Fan-out row per (event, entity, role).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventParticipant {
    pub event_participant_id: String,
    pub event_id: String,
    pub scene_id: String,
    pub entity_id: String,
    pub role: ParticipantRole,

    /// First-seen order within the event, 1-indexed.
    pub participant_index: u32,

    pub evidence_refs: Vec<String>,
    pub confidence: f64,
    pub extraction_method: String,
}

/// Dedupe participants by (entity_id, role), preserving first-seen order.
pub fn dedupe_participants(participants: Vec<Participant>) -> Vec<Participant> {
    let mut seen: Vec<(String, ParticipantRole)> = Vec::new();
    let mut out = Vec::new();
    for p in participants {
        if p.entity_id.is_empty() {
            continue;
        }
        let key = (p.entity_id.clone(), p.role);
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(p);
    }
    out
}
