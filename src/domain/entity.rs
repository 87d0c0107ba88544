//! Entity and alias records produced by the resolver.

use std::collections::BTreeSet;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Entity category. The ordering here is also the sort order of the
/// entity artifact (characters first, objects last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    Group,
    Organization,
    Location,
    Object,
}

impl EntityType {
    pub fn sort_rank(&self) -> u8 {
        match self {
            EntityType::Character => 0,
            EntityType::Group => 1,
            EntityType::Organization => 2,
            EntityType::Location => 3,
            EntityType::Object => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Character => "character",
            EntityType::Group => "group",
            EntityType::Organization => "organization",
            EntityType::Location => "location",
            EntityType::Object => "object",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "character" => Some(EntityType::Character),
            "group" => Some(EntityType::Group),
            "organization" => Some(EntityType::Organization),
            "location" => Some(EntityType::Location),
            "object" => Some(EntityType::Object),
            _ => None,
        }
    }
}

/// A canonical entity. Immutable after creation except alias growth and
/// metadata enrichment; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub canonical_name: String,

    /// Sorted superset of every raw cue/text ever mapped to this entity.
    pub aliases: Vec<String>,

    pub first_scene_id: Option<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// How an alias row was matched to its entity.
///
/// Manual kinds win over automatic ones when the same (raw, entity) pair
/// is observed through multiple paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    SeedAlias,
    ManualExact,
    ManualNormalized,
    NormalizedMatch,
    NormalizedCue,
    AutoFromCue,
    SceneLocation,
}

impl AliasKind {
    pub fn is_manual(&self) -> bool {
        matches!(self, AliasKind::ManualExact | AliasKind::ManualNormalized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AliasKind::SeedAlias => "seed_alias",
            AliasKind::ManualExact => "manual_exact",
            AliasKind::ManualNormalized => "manual_normalized",
            AliasKind::NormalizedMatch => "normalized_match",
            AliasKind::NormalizedCue => "normalized_cue",
            AliasKind::AutoFromCue => "auto_from_cue",
            AliasKind::SceneLocation => "scene_location",
        }
    }
}

/// Provenance flags for an alias row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AliasSource {
    ManualSeed,
    UtteranceCue,
    SceneHeader,
}

impl AliasSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasSource::ManualSeed => "manual_seed",
            AliasSource::UtteranceCue => "utterance_cue",
            AliasSource::SceneHeader => "scene_header",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "manual_seed" => Some(AliasSource::ManualSeed),
            "utterance_cue" => Some(AliasSource::UtteranceCue),
            "scene_header" => Some(AliasSource::SceneHeader),
            _ => None,
        }
    }
}

/// Set of provenance flags, merged without duplication and serialized as
/// a stable comma-joined string ("manual_seed,utterance_cue").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasSourceSet(BTreeSet<AliasSource>);

impl AliasSourceSet {
    pub fn from_source(source: AliasSource) -> Self {
        let mut set = BTreeSet::new();
        set.insert(source);
        Self(set)
    }

    pub fn insert(&mut self, source: AliasSource) {
        self.0.insert(source);
    }

    pub fn contains(&self, source: AliasSource) -> bool {
        self.0.contains(&source)
    }

    pub fn as_string(&self) -> String {
        self.0
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Serialize for AliasSourceSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_string())
    }
}

impl<'de> Deserialize<'de> for AliasSourceSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SourceVisitor;

        impl<'de> Visitor<'de> for SourceVisitor {
            type Value = AliasSourceSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("comma-joined alias source flags")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<AliasSourceSet, E> {
                let mut set = BTreeSet::new();
                for part in value.split(',').filter(|p| !p.is_empty()) {
                    let source = AliasSource::parse(part)
                        .ok_or_else(|| E::custom(format!("unknown alias source: {part}")))?;
                    set.insert(source);
                }
                Ok(AliasSourceSet(set))
            }
        }

        deserializer.deserialize_str(SourceVisitor)
    }
}

/// One row per distinct (raw alias text, entity) pair.
///
/// Rows accumulate: counts sum, the earliest scene wins, manual kinds
/// override automatic ones, and provenance flags union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasRecord {
    #[serde(default)]
    pub alias_record_id: Option<String>,

    pub alias_raw: String,
    pub alias_normalized: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub alias_kind: AliasKind,
    pub source: AliasSourceSet,
    pub first_scene_id: Option<String>,
    pub count: Option<u64>,
}
