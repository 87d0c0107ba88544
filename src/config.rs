//! Declarative build configuration.
//!
//! Three config files feed the pipeline:
//! - the manual alias/entity config (seed entities, alias overrides, cue
//!   ignore lists, manual KG edges),
//! - the event taxonomy (L2 -> L1 category index),
//! - the state-change rule set.
//!
//! Error policy differs per file. Malformed manual seed entries are
//! skipped (entity resolution is best-effort; availability over
//! strictness). The taxonomy and the rule set are validated structurally
//! before any matching runs; an invalid file aborts the whole build step
//! rather than producing partial results.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{ClaimType, Direction, Magnitude};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required file: {path}")]
    Missing { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

fn load_json_object(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::Missing {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::Invalid {
            message: format!("{} must be a JSON object", path.display()),
        }),
    }
}

/// Manual alias/entity configuration.
///
/// `manual_entities` stays untyped here: individual malformed entries are
/// skipped (and counted) by the resolver instead of failing the build.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AliasConfig {
    #[serde(default)]
    pub manual_entities: Vec<Value>,

    #[serde(default)]
    pub manual_aliases_exact: BTreeMap<String, String>,

    #[serde(default)]
    pub manual_aliases_normalized: BTreeMap<String, String>,

    #[serde(default)]
    pub ignored_cues_exact: Vec<String>,

    #[serde(default)]
    pub ignored_cues_normalized: Vec<String>,

    #[serde(default)]
    pub ignored_cue_prefixes: Vec<String>,

    #[serde(default)]
    pub ignored_cue_contains: Vec<String>,

    #[serde(default)]
    pub manual_kg_edges: Vec<Value>,
}

impl AliasConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let map = load_json_object(path)?;
        serde_json::from_value(Value::Object(map)).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A parsed manual seed entity. `from_value` returns `None` for entries
/// missing an id or name; the caller counts those.
#[derive(Debug, Clone)]
pub struct ManualEntity {
    pub entity_id: String,
    pub entity_type: String,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl ManualEntity {
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let entity_id = obj.get("entity_id")?.as_str()?.trim().to_string();
        if entity_id.is_empty() {
            return None;
        }
        let canonical_name = obj
            .get("canonical_name")
            .and_then(Value::as_str)
            .unwrap_or(&entity_id)
            .trim()
            .to_string();
        if canonical_name.is_empty() {
            return None;
        }
        let entity_type = obj
            .get("entity_type")
            .and_then(Value::as_str)
            .unwrap_or("character")
            .trim()
            .to_string();
        let aliases = obj
            .get("aliases")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let metadata = obj
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Some(Self {
            entity_id,
            entity_type,
            canonical_name,
            aliases,
            metadata,
        })
    }
}

/// A parsed manual KG edge declaration.
#[derive(Debug, Clone)]
pub struct ManualKgEdge {
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
    pub stability: String,
    pub evidence_scene_ids: Vec<String>,
}

impl ManualKgEdge {
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let field = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let subject_id = field("subject_id")?;
        let object_id = field("object_id")?;
        let predicate = field("predicate")?;
        let stability = field("stability").unwrap_or_else(|| "semi_stable".to_string());
        let evidence_scene_ids = obj
            .get("evidence_scene_ids")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            subject_id,
            predicate,
            object_id,
            stability,
            evidence_scene_ids,
        })
    }
}

/// Event taxonomy: L2 subtype -> L1 category index.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    l2_to_l1: BTreeMap<String, String>,
}

impl Taxonomy {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let map = load_json_object(path)?;
        let l2_index = map
            .get("l2_index")
            .and_then(Value::as_object)
            .ok_or_else(|| ConfigError::Invalid {
                message: format!("{} missing l2_index", path.display()),
            })?;
        let mut l2_to_l1 = BTreeMap::new();
        for (l2, info) in l2_index {
            let Some(info) = info.as_object() else {
                continue;
            };
            if let Some(l1) = info.get("event_type_l1").and_then(Value::as_str) {
                l2_to_l1.insert(l2.clone(), l1.to_string());
            }
        }
        Ok(Self { l2_to_l1 })
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            l2_to_l1: pairs
                .iter()
                .map(|(l2, l1)| (l2.to_string(), l1.to_string()))
                .collect(),
        }
    }

    pub fn l1_for(&self, l2: &str) -> Option<&str> {
        self.l2_to_l1.get(l2).map(String::as_str)
    }

    pub fn contains(&self, l2: &str) -> bool {
        self.l2_to_l1.contains_key(l2)
    }

    pub fn len(&self) -> usize {
        self.l2_to_l1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.l2_to_l1.is_empty()
    }
}

/// A validated state-change inference rule.
#[derive(Debug, Clone)]
pub struct StateChangeRule {
    pub rule_id: String,
    pub subject_id: String,
    pub object_id: String,
    pub state_dimension: String,
    pub direction: Direction,
    pub claim_type: ClaimType,
    pub magnitude: Option<Magnitude>,
    pub event_type_l1_any: Option<Vec<String>>,
    pub event_type_l2_any: Option<Vec<String>>,
    pub event_type_l2_not: Option<Vec<String>>,
    pub min_event_confidence: Option<f64>,
    pub text_any: Option<Vec<String>>,
    pub text_all: Option<Vec<String>>,
    pub text_none: Option<Vec<String>>,
    pub confidence: f64,
    pub inference_method: String,
}

/// Raw rule row as it appears in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRule {
    #[serde(default)]
    rule_id: String,
    #[serde(default)]
    subject_id: String,
    #[serde(default)]
    object_id: String,
    #[serde(default)]
    state_dimension: String,
    #[serde(default)]
    direction: String,
    #[serde(default)]
    claim_type: String,
    #[serde(default)]
    magnitude: Option<String>,
    #[serde(default)]
    event_type_l1_any: Option<Vec<String>>,
    #[serde(default)]
    event_type_l2_any: Option<Vec<String>>,
    #[serde(default)]
    event_type_l2_not: Option<Vec<String>>,
    #[serde(default)]
    min_event_confidence: Option<f64>,
    #[serde(default)]
    text_any: Option<Vec<String>>,
    #[serde(default)]
    text_all: Option<Vec<String>>,
    #[serde(default)]
    text_none: Option<Vec<String>>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    inference_method: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A labelled subject/object pair whose coverage the build reports on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorePair {
    #[serde(default)]
    pub pair_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    pub subject_id: String,
    pub object_id: String,
}

/// The state-change rule configuration, validated on load.
#[derive(Debug, Clone)]
pub struct StateChangeConfig {
    pub rules: Vec<StateChangeRule>,
    pub core_pairs: Vec<CorePair>,
    pub disabled_rule_count: usize,
}

impl StateChangeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let map = load_json_object(path)?;
        let rules_value = map.get("rules").ok_or_else(|| ConfigError::Invalid {
            message: "rules must be a list".to_string(),
        })?;
        let raw_rules: Vec<RawRule> =
            serde_json::from_value(rules_value.clone()).map_err(|_| ConfigError::Invalid {
                message: "rules must be a list of rule objects".to_string(),
            })?;

        let mut rules = Vec::new();
        let mut disabled_rule_count = 0;
        for (idx, raw) in raw_rules.iter().enumerate() {
            let rule = Self::validate_rule(idx, raw)?;
            if !raw.enabled {
                disabled_rule_count += 1;
                continue;
            }
            rules.push(rule);
        }

        let core_pairs = match map.get("core_pairs") {
            Some(value) => value
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| serde_json::from_value(v.clone()).ok())
                        .filter(|p: &CorePair| {
                            !p.subject_id.trim().is_empty() && !p.object_id.trim().is_empty()
                        })
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(Self {
            rules,
            core_pairs,
            disabled_rule_count,
        })
    }

    fn validate_rule(idx: usize, raw: &RawRule) -> Result<StateChangeRule, ConfigError> {
        let required = [
            ("rule_id", &raw.rule_id),
            ("subject_id", &raw.subject_id),
            ("object_id", &raw.object_id),
            ("state_dimension", &raw.state_dimension),
            ("direction", &raw.direction),
            ("claim_type", &raw.claim_type),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("rules[{idx}] missing/invalid {key}"),
                });
            }
        }
        let direction = Direction::parse(&raw.direction).ok_or_else(|| ConfigError::Invalid {
            message: format!("rules[{idx}] invalid direction: {}", raw.direction),
        })?;
        let claim_type = ClaimType::parse(&raw.claim_type).ok_or_else(|| ConfigError::Invalid {
            message: format!("rules[{idx}] invalid claim_type: {}", raw.claim_type),
        })?;
        let magnitude = match raw.magnitude.as_deref() {
            None => None,
            Some(text) => Some(Magnitude::parse(text).ok_or_else(|| ConfigError::Invalid {
                message: format!("rules[{idx}] invalid magnitude: {text}"),
            })?),
        };
        Ok(StateChangeRule {
            rule_id: raw.rule_id.clone(),
            subject_id: raw.subject_id.clone(),
            object_id: raw.object_id.clone(),
            state_dimension: raw.state_dimension.clone(),
            direction,
            claim_type,
            magnitude,
            event_type_l1_any: raw.event_type_l1_any.clone(),
            event_type_l2_any: raw.event_type_l2_any.clone(),
            event_type_l2_not: raw.event_type_l2_not.clone(),
            min_event_confidence: raw.min_event_confidence,
            text_any: raw.text_any.clone(),
            text_all: raw.text_all.clone(),
            text_none: raw.text_none.clone(),
            confidence: raw.confidence.unwrap_or(0.7),
            inference_method: raw
                .inference_method
                .clone()
                .unwrap_or_else(|| "rule+review".to_string()),
        })
    }
}
