//! Data structures for the extraction pipeline.
//!
//! Split into upstream input records (produced by the segmentation step),
//! resolved entities/aliases, assembled events, and graph edge records.
//! All records serialize with serde into JSON artifact envelopes.

pub mod entity;
pub mod event;
pub mod graph;
pub mod input;

pub use entity::{AliasKind, AliasRecord, AliasSource, AliasSourceSet, Entity, EntityType};
pub use event::{
    dedupe_participants, Event, EventParticipant, EvidenceSpan, Participant, ParticipantRole,
};
pub use graph::{
    ClaimType, Direction, KgEdge, Magnitude, Stability, StateChange, TemporalBasis,
    TemporalEdge, TemporalRelation,
};
pub use input::{ActionBeat, Scene, ScriptBlock, Utterance};
