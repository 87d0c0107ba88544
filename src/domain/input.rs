//! Upstream records consumed from the segmentation step.
//!
//! These arrive as JSON artifact envelopes with stable ids and line spans.
//! Deserialization is tolerant: optional fields default so a partially
//! enriched upstream artifact still loads; per-record problems are handled
//! downstream, not here.

use serde::{Deserialize, Serialize};

/// One scene as segmented from the screenplay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: String,

    /// Position in canonical screenplay order.
    #[serde(default)]
    pub scene_index: i64,

    #[serde(default)]
    pub header_raw: Option<String>,

    /// Header prefix such as "INT." or "EXT.".
    #[serde(default)]
    pub header_prefix: Option<String>,

    #[serde(default)]
    pub location_raw: Option<String>,

    /// Canonical location entity id assigned upstream, if any.
    #[serde(default)]
    pub location_canonical_id: Option<String>,

    #[serde(default)]
    pub time_of_day: Option<String>,

    #[serde(default)]
    pub year_explicit: Option<i64>,

    #[serde(default)]
    pub year_inferred: Option<i64>,

    /// Scene flags such as "flashback" or "synthetic_prelude_scene".
    #[serde(default)]
    pub flags: Vec<String>,

    #[serde(default)]
    pub line_start: Option<i64>,

    #[serde(default)]
    pub line_end: Option<i64>,
}

impl Scene {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// One dialogue line with its speaker cue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub utterance_id: String,
    pub scene_id: String,
    pub speaker_cue_raw: String,

    /// Delivery modifiers parsed from the cue, e.g. "voice_over", "pre_lap".
    #[serde(default)]
    pub delivery_modifiers: Vec<String>,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub sequence_in_scene: i64,
}

/// One action/description line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionBeat {
    pub action_id: String,
    pub scene_id: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub sequence_in_scene: i64,
}

/// A positional block linking scene content to source lines.
///
/// Blocks are the unit the assembler walks: scene headers, utterances and
/// action beats all appear here in source order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptBlock {
    pub block_id: String,
    pub scene_id: String,
    pub block_type: String,

    #[serde(default)]
    pub sequence_in_scene: i64,

    #[serde(default)]
    pub line_start: Option<i64>,

    #[serde(default)]
    pub line_end: Option<i64>,

    #[serde(default)]
    pub text: String,

    /// Structural markers attached by the segmenter (e.g. "CUT TO").
    #[serde(default)]
    pub markers: Vec<String>,

    #[serde(default)]
    pub utterance_id: Option<String>,

    #[serde(default)]
    pub action_id: Option<String>,

    #[serde(default)]
    pub speaker_cue_raw: Option<String>,
}
