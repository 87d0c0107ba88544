//! Rule-based event classification.
//!
//! Two parallel cascades, one for dialogue and one for action text, each
//! an ordered list of rules evaluated first-match-wins. Rule order is
//! significant and fixed: structural cues (delivery modifiers, explicit
//! markers) are checked before generic keyword fallbacks. Each rule
//! yields an L2 type, a confidence, and note strings recording which rule
//! fired.
//!
//! L1 categories come from the taxonomy config. An L2 the taxonomy does
//! not know is never dropped: it coerces to the `unmapped_review_required`
//! sentinel so it stays visible as a to-review bucket.

pub mod action;
pub mod dialogue;

pub use action::{classify_action, ActionContext};
pub use dialogue::{classify_utterance, DialogueContext};

use crate::config::Taxonomy;

/// Reserved L2 sentinel for taxonomy misses.
pub const UNMAPPED_L2: &str = "unmapped_review_required";
/// Reserved L1 category for the sentinel when the taxonomy itself does
/// not map it.
pub const UNMAPPED_L1: &str = "other_review_required";

macro_rules! static_regex {
    ($pattern:expr) => {{
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| regex::Regex::new($pattern).expect("static classifier regex"))
    }};
}
pub(crate) use static_regex;

/// Output of one classifier cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub event_type_l2: String,
    pub confidence: f64,
    pub notes: Vec<String>,
}

impl Classification {
    pub fn new(event_type_l2: &str, confidence: f64, notes: &[&str]) -> Self {
        Self {
            event_type_l2: event_type_l2.to_string(),
            confidence,
            notes: notes.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// Taxonomy assignment for a classified L2 type.
///
/// Modeled as a tagged variant instead of a magic string so "never
/// silently dropped" stays enforceable: a miss keeps the requested label
/// for audit and surfaces under the sentinel type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAssignment {
    Known { l1: String, l2: String },
    UnmappedReviewRequired { requested_l2: String, l1: String },
}

impl TypeAssignment {
    pub fn resolve(taxonomy: &Taxonomy, l2: &str) -> Self {
        match taxonomy.l1_for(l2) {
            Some(l1) => TypeAssignment::Known {
                l1: l1.to_string(),
                l2: l2.to_string(),
            },
            None => TypeAssignment::UnmappedReviewRequired {
                requested_l2: l2.to_string(),
                l1: taxonomy
                    .l1_for(UNMAPPED_L2)
                    .unwrap_or(UNMAPPED_L1)
                    .to_string(),
            },
        }
    }

    pub fn l1(&self) -> &str {
        match self {
            TypeAssignment::Known { l1, .. } => l1,
            TypeAssignment::UnmappedReviewRequired { l1, .. } => l1,
        }
    }

    pub fn l2(&self) -> &str {
        match self {
            TypeAssignment::Known { l2, .. } => l2,
            TypeAssignment::UnmappedReviewRequired { .. } => UNMAPPED_L2,
        }
    }

    pub fn is_unmapped(&self) -> bool {
        matches!(self, TypeAssignment::UnmappedReviewRequired { .. })
    }
}
