//! screengraph - deterministic screenplay-to-knowledge-graph extraction
//!
//! A rule-based batch pipeline that turns parsed screenplay artifacts
//! (scenes, utterances, action beats, script blocks) into a queryable
//! event and relationship layer.
//!
//! # Architecture
//!
//! The pipeline is a chain of pure build steps over JSON artifact
//! envelopes:
//! - `resolve`: speaker cues + manual config -> entities and aliases
//! - `assemble`: script blocks + classifier cascades -> events,
//!   event participants, scene index
//! - `temporal`: events + scene index -> ordering edges
//! - `statechange`: events + declarative rules -> aggregated claims
//! - `kg`: manual config + scene co-occurrence -> knowledge-graph edges
//!
//! Every step is deterministic: identical inputs yield byte-identical
//! artifacts apart from the build timestamp, which the CLI can pin.
//!
//! # Modules
//!
//! - `artifact`: envelope I/O, hashing, id and rounding helpers
//! - `classify`: dialogue and action rule cascades
//! - `config`: manual alias config, taxonomy, state-change rules
//! - `domain`: record types shared across artifacts
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Full pipeline against the default artifact tree
//! screengraph build
//!
//! # Individual steps
//! screengraph entities
//! screengraph events
//! screengraph temporal
//! screengraph state-changes
//! screengraph kg-edges
//! ```

pub mod artifact;
pub mod assemble;
pub mod classify;
pub mod cli;
pub mod config;
pub mod domain;
pub mod kg;
pub mod mention;
pub mod resolve;
pub mod statechange;
pub mod temporal;
pub mod text;

// Re-export main types at crate root for convenience
pub use artifact::{Envelope, EnvelopeMetadata, SCHEMA_VERSION};
pub use assemble::{assemble, Assembly, SceneIndexItem};
pub use domain::{
    AliasRecord, Entity, Event, EventParticipant, KgEdge, Scene, ScriptBlock, StateChange,
    TemporalEdge, Utterance,
};
pub use kg::{build_kg_edges, CooccurrenceOptions, KgBuild};
pub use resolve::{resolve, Resolution};
pub use statechange::{infer_state_changes, StateChangeBuild};
pub use temporal::{build_temporal_graph, TemporalGraph};
