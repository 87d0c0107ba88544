//! Entity resolution from manual seeds, speaker cues, and scene headers.
//!
//! Resolution is append-only: entities are created once and only grow
//! (aliases, metadata, first-scene backfill). Cue mapping precedence is
//! fixed: manual exact overrides, then manual normalized overrides, then
//! any previously seen normalized form, then auto-generation of a fresh
//! `char_<slug>` entity. Compound cues ("FRANK AND JIMMY") are never
//! auto-split; they are ignored and counted for review.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::config::{AliasConfig, ManualEntity};
use crate::domain::{AliasKind, AliasRecord, AliasSource, AliasSourceSet, Entity, EntityType};
use crate::domain::{Scene, Utterance};
use crate::text::{collapse_whitespace, display_name_from_cue, normalize_alias_text, normalize_apostrophes, slugify};

struct EntityAcc {
    entity_id: String,
    entity_type: EntityType,
    canonical_name: String,
    aliases: BTreeSet<String>,
    first_scene_id: Option<String>,
    metadata: Map<String, Value>,
}

struct AliasAcc {
    alias_raw: String,
    alias_normalized: String,
    entity_id: String,
    entity_type: EntityType,
    alias_kind: AliasKind,
    source: AliasSourceSet,
    first_scene_id: Option<String>,
    count: Option<u64>,
}

/// Everything one resolution pass produces: the two artifacts' items plus
/// the diagnostic counters reported in envelope metadata and logs.
pub struct Resolution {
    pub entities: Vec<Entity>,
    pub alias_records: Vec<AliasRecord>,
    pub entity_type_counts: BTreeMap<String, u64>,
    pub manual_seed_count: usize,
    pub ignored_cues: BTreeMap<String, u64>,
    pub auto_generated_cues: BTreeMap<String, u64>,
    pub skipped_seed_count: usize,
}

/// Resolve entities and alias records from parsed scenes and utterances.
pub fn resolve(scenes: &[Scene], utterances: &[Utterance], cfg: &AliasConfig) -> Resolution {
    let mut entities: BTreeMap<String, EntityAcc> = BTreeMap::new();
    let mut alias_accs: BTreeMap<(String, String), AliasAcc> = BTreeMap::new();

    // Manual seeds first; their ids and names always win.
    let mut manual_entity_ids: BTreeSet<String> = BTreeSet::new();
    let mut skipped_seed_count = 0usize;
    for raw_seed in &cfg.manual_entities {
        let Some(seed) = ManualEntity::from_value(raw_seed) else {
            skipped_seed_count += 1;
            continue;
        };
        manual_entity_ids.insert(seed.entity_id.clone());
        let entity_type = EntityType::parse(&seed.entity_type).unwrap_or(EntityType::Character);
        let mut metadata = seed.metadata.clone();
        metadata.insert("manual_seed".to_string(), Value::Bool(true));
        let acc = ensure_entity(
            &mut entities,
            &seed.entity_id,
            entity_type,
            &seed.canonical_name,
            metadata,
        );
        for alias in &seed.aliases {
            acc.aliases.insert(alias.clone());
        }
        for alias in &seed.aliases {
            add_alias(
                &mut alias_accs,
                AliasAcc {
                    alias_raw: alias.clone(),
                    alias_normalized: normalize_alias_text(alias),
                    entity_id: seed.entity_id.clone(),
                    entity_type,
                    alias_kind: AliasKind::SeedAlias,
                    source: AliasSourceSet::from_source(AliasSource::ManualSeed),
                    first_scene_id: None,
                    count: None,
                },
            );
        }
    }

    // Prime the normalized-form lookup from manual overrides and seeds.
    let mut normalized_to_entity_id: BTreeMap<String, String> = BTreeMap::new();
    for (alias, entity_id) in &cfg.manual_aliases_exact {
        normalized_to_entity_id
            .entry(normalize_alias_text(alias))
            .or_insert_with(|| entity_id.clone());
    }
    for (alias_norm, entity_id) in &cfg.manual_aliases_normalized {
        normalized_to_entity_id
            .entry(normalize_alias_text(alias_norm))
            .or_insert_with(|| entity_id.clone());
    }
    for (entity_id, acc) in &entities {
        for alias in &acc.aliases {
            normalized_to_entity_id
                .entry(normalize_alias_text(alias))
                .or_insert_with(|| entity_id.clone());
        }
    }

    // Characters (and seeded groups/orgs) from utterance speaker cues.
    let mut utterance_scene_by_cue: BTreeMap<String, String> = BTreeMap::new();
    let mut ignored_cues: BTreeMap<String, u64> = BTreeMap::new();
    let mut auto_generated_cues: BTreeMap<String, u64> = BTreeMap::new();

    for utt in utterances {
        let raw_cue = utt.speaker_cue_raw.trim().to_string();
        if raw_cue.is_empty() {
            continue;
        }
        let scene_id = Some(utt.scene_id.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if let Some(scene_id) = &scene_id {
            utterance_scene_by_cue
                .entry(raw_cue.clone())
                .or_insert_with(|| scene_id.clone());
        }

        let normalized_cue = normalize_alias_text(&raw_cue);
        if cue_is_ignored(&raw_cue, &normalized_cue, cfg) {
            *ignored_cues.entry(raw_cue).or_insert(0) += 1;
            continue;
        }

        let (entity_id, alias_kind) = if let Some(id) = cfg.manual_aliases_exact.get(&raw_cue) {
            (id.clone(), AliasKind::ManualExact)
        } else if let Some(id) = cfg.manual_aliases_normalized.get(&normalized_cue) {
            (id.clone(), AliasKind::ManualNormalized)
        } else if let Some(id) = normalized_to_entity_id.get(&normalized_cue) {
            (id.clone(), AliasKind::NormalizedMatch)
        } else if normalized_cue.contains(" AND ") || normalized_cue.contains('/') {
            *ignored_cues.entry(raw_cue).or_insert(0) += 1;
            continue;
        } else {
            let id = format!("char_{}", slugify(&normalized_cue));
            *auto_generated_cues.entry(raw_cue.clone()).or_insert(0) += 1;
            (id, AliasKind::AutoFromCue)
        };

        let canonical_base = if normalized_cue.is_empty() {
            raw_cue.as_str()
        } else {
            normalized_cue.as_str()
        };
        let mut default_metadata = Map::new();
        default_metadata.insert("manual_seed".to_string(), Value::Bool(false));
        let acc = ensure_entity(
            &mut entities,
            &entity_id,
            EntityType::Character,
            &display_name_from_cue(canonical_base),
            default_metadata,
        );
        // Seeded type and name survive; the cue only contributes aliases.
        acc.aliases.insert(raw_cue.clone());
        if !normalized_cue.is_empty() && normalized_cue != raw_cue {
            acc.aliases.insert(normalized_cue.clone());
        }
        update_first_scene(acc, scene_id.as_deref());
        let count = acc
            .metadata
            .get("utterance_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        acc.metadata
            .insert("utterance_count".to_string(), Value::from(count + 1));
        acc.metadata
            .insert("source_utterance_cues".to_string(), Value::Bool(true));
        if manual_entity_ids.contains(&entity_id) {
            let priority = acc
                .metadata
                .get("priority")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            acc.metadata.insert("priority".to_string(), Value::Bool(priority));
        }
        let entity_type = acc.entity_type;

        normalized_to_entity_id
            .entry(normalized_cue.clone())
            .or_insert_with(|| entity_id.clone());

        add_alias(
            &mut alias_accs,
            AliasAcc {
                alias_raw: raw_cue.clone(),
                alias_normalized: normalized_cue.clone(),
                entity_id: entity_id.clone(),
                entity_type,
                alias_kind,
                source: AliasSourceSet::from_source(AliasSource::UtteranceCue),
                first_scene_id: scene_id.clone(),
                count: Some(1),
            },
        );
        if !normalized_cue.is_empty() && normalized_cue != raw_cue {
            add_alias(
                &mut alias_accs,
                AliasAcc {
                    alias_raw: normalized_cue.clone(),
                    alias_normalized: normalized_cue.clone(),
                    entity_id,
                    entity_type,
                    alias_kind: AliasKind::NormalizedCue,
                    source: AliasSourceSet::from_source(AliasSource::UtteranceCue),
                    first_scene_id: scene_id,
                    count: None,
                },
            );
        }
    }

    // Location entities from scene headers.
    let mut location_scene_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut location_header_prefixes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut location_examples: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for scene in scenes {
        if scene.has_flag("synthetic_prelude_scene") {
            continue;
        }
        let scene_id = Some(scene.scene_id.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let entity_id = scene
            .location_canonical_id
            .as_deref()
            .map(str::trim)
            .unwrap_or("");
        let location_raw = scene.location_raw.as_deref().map(str::trim).unwrap_or("");
        if entity_id.is_empty() || location_raw.is_empty() {
            continue;
        }

        let mut metadata = Map::new();
        metadata.insert("source_scene_header".to_string(), Value::Bool(true));
        let acc = ensure_entity(
            &mut entities,
            entity_id,
            EntityType::Location,
            &collapse_whitespace(location_raw),
            metadata,
        );
        acc.aliases.insert(location_raw.to_string());
        update_first_scene(acc, scene_id.as_deref());

        *location_scene_counts.entry(entity_id.to_string()).or_insert(0) += 1;
        if let Some(prefix) = scene.header_prefix.as_deref().map(str::trim) {
            if !prefix.is_empty() {
                location_header_prefixes
                    .entry(entity_id.to_string())
                    .or_default()
                    .insert(prefix.to_string());
            }
        }
        let examples = location_examples.entry(entity_id.to_string()).or_default();
        if examples.len() < 5 {
            examples.insert(location_raw.to_string());
        }

        add_alias(
            &mut alias_accs,
            AliasAcc {
                alias_raw: location_raw.to_string(),
                alias_normalized: normalize_apostrophes(location_raw).to_uppercase(),
                entity_id: entity_id.to_string(),
                entity_type: EntityType::Location,
                alias_kind: AliasKind::SceneLocation,
                source: AliasSourceSet::from_source(AliasSource::SceneHeader),
                first_scene_id: scene_id,
                count: Some(1),
            },
        );
    }

    for (entity_id, acc) in &mut entities {
        if acc.entity_type != EntityType::Location {
            continue;
        }
        acc.metadata.insert(
            "scene_count".to_string(),
            Value::from(location_scene_counts.get(entity_id).copied().unwrap_or(0)),
        );
        let prefixes: Vec<Value> = location_header_prefixes
            .get(entity_id)
            .map(|set| set.iter().cloned().map(Value::String).collect())
            .unwrap_or_default();
        acc.metadata
            .insert("header_prefixes".to_string(), Value::Array(prefixes));
        if let Some(examples) = location_examples.get(entity_id) {
            if !examples.is_empty() {
                acc.metadata.insert(
                    "scene_location_examples".to_string(),
                    Value::Array(examples.iter().cloned().map(Value::String).collect()),
                );
            }
        }
    }

    // Seed entities whose aliases showed up as cues get a first scene
    // backfilled from the earliest such observation.
    for acc in entities.values_mut() {
        if acc.first_scene_id.is_some() {
            continue;
        }
        let candidate = acc
            .aliases
            .iter()
            .filter_map(|alias| utterance_scene_by_cue.get(alias))
            .min()
            .cloned();
        acc.first_scene_id = candidate;
    }

    // Finalize entity items.
    let mut entity_type_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut entity_items: Vec<Entity> = Vec::new();
    for acc in entities.values() {
        *entity_type_counts
            .entry(acc.entity_type.as_str().to_string())
            .or_insert(0) += 1;
        let aliases: Vec<String> = acc
            .aliases
            .iter()
            .filter(|a| !a.is_empty())
            .cloned()
            .collect();
        entity_items.push(Entity {
            entity_id: acc.entity_id.clone(),
            entity_type: acc.entity_type,
            canonical_name: acc.canonical_name.clone(),
            aliases,
            first_scene_id: acc.first_scene_id.clone(),
            metadata: acc.metadata.clone(),
        });
    }
    entity_items.sort_by(|a, b| {
        a.entity_type
            .sort_rank()
            .cmp(&b.entity_type.sort_rank())
            .then_with(|| a.canonical_name.cmp(&b.canonical_name))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });

    // Finalize alias rows: sort, then assign sequential ids.
    let mut alias_rows: Vec<AliasAcc> = alias_accs.into_values().collect();
    alias_rows.sort_by(|a, b| {
        a.alias_normalized
            .cmp(&b.alias_normalized)
            .then_with(|| a.alias_raw.cmp(&b.alias_raw))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
            .then_with(|| a.alias_kind.as_str().cmp(b.alias_kind.as_str()))
    });
    let alias_records: Vec<AliasRecord> = alias_rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| AliasRecord {
            alias_record_id: Some(crate::artifact::sequential_id("ealias", 6, i + 1)),
            alias_raw: row.alias_raw,
            alias_normalized: row.alias_normalized,
            entity_id: row.entity_id,
            entity_type: row.entity_type,
            alias_kind: row.alias_kind,
            source: row.source,
            first_scene_id: row.first_scene_id,
            count: row.count,
        })
        .collect();

    Resolution {
        entities: entity_items,
        alias_records,
        entity_type_counts,
        manual_seed_count: manual_entity_ids.len(),
        ignored_cues,
        auto_generated_cues,
        skipped_seed_count,
    }
}

fn ensure_entity<'a>(
    entities: &'a mut BTreeMap<String, EntityAcc>,
    entity_id: &str,
    entity_type: EntityType,
    canonical_name: &str,
    metadata: Map<String, Value>,
) -> &'a mut EntityAcc {
    let acc = entities
        .entry(entity_id.to_string())
        .or_insert_with(|| EntityAcc {
            entity_id: entity_id.to_string(),
            entity_type,
            canonical_name: canonical_name.to_string(),
            aliases: BTreeSet::new(),
            first_scene_id: None,
            metadata: Map::new(),
        });
    // Seeded values win; later observations only fill gaps.
    for (key, value) in metadata {
        acc.metadata.entry(key).or_insert(value);
    }
    acc
}

fn update_first_scene(acc: &mut EntityAcc, scene_id: Option<&str>) {
    let Some(scene_id) = scene_id else {
        return;
    };
    match &acc.first_scene_id {
        None => acc.first_scene_id = Some(scene_id.to_string()),
        Some(current) if scene_id < current.as_str() => {
            acc.first_scene_id = Some(scene_id.to_string());
        }
        Some(_) => {}
    }
}

/// Merge an alias observation into the accumulator keyed on
/// (raw text, entity). Counts sum, the earliest scene wins, manual kinds
/// override automatic ones, source flags union.
fn add_alias(records: &mut BTreeMap<(String, String), AliasAcc>, new: AliasAcc) {
    let key = (new.alias_raw.clone(), new.entity_id.clone());
    match records.get_mut(&key) {
        None => {
            records.insert(key, new);
        }
        Some(record) => {
            if let Some(scene_id) = &new.first_scene_id {
                let earlier = match &record.first_scene_id {
                    None => true,
                    Some(current) => scene_id < current,
                };
                if earlier {
                    record.first_scene_id = Some(scene_id.clone());
                }
            }
            if let Some(count) = new.count {
                record.count = Some(record.count.unwrap_or(0) + count);
            }
            if new.alias_kind.is_manual() {
                record.alias_kind = new.alias_kind;
            }
            for source in [
                AliasSource::ManualSeed,
                AliasSource::UtteranceCue,
                AliasSource::SceneHeader,
            ] {
                if new.source.contains(source) {
                    record.source.insert(source);
                }
            }
        }
    }
}

fn cue_is_ignored(raw_cue: &str, normalized_cue: &str, cfg: &AliasConfig) -> bool {
    if cfg.ignored_cues_exact.iter().any(|c| c == raw_cue) {
        return true;
    }
    if cfg.ignored_cues_normalized.iter().any(|c| c == normalized_cue) {
        return true;
    }
    if cfg
        .ignored_cue_prefixes
        .iter()
        .any(|p| raw_cue.starts_with(p.as_str()) || normalized_cue.starts_with(p.as_str()))
    {
        return true;
    }
    if cfg
        .ignored_cue_contains
        .iter()
        .any(|f| raw_cue.contains(f.as_str()) || normalized_cue.contains(f.as_str()))
    {
        return true;
    }
    if normalized_cue.is_empty() {
        return true;
    }
    // Transition lines that survive parsing as cues.
    matches!(normalized_cue, "CUT TO" | "DISSOLVE TO" | "FADE IN" | "FADE OUT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance(id: &str, scene_id: &str, cue: &str) -> Utterance {
        serde_json::from_value(serde_json::json!({
            "utterance_id": id,
            "scene_id": scene_id,
            "speaker_cue_raw": cue,
            "text": "...",
            "sequence_in_scene": 1
        }))
        .unwrap()
    }

    fn scene(id: &str, index: i64, location: &str, canonical: &str) -> Scene {
        serde_json::from_value(serde_json::json!({
            "scene_id": id,
            "scene_index": index,
            "header_raw": format!("INT. {location} - DAY"),
            "header_prefix": "INT.",
            "location_raw": location,
            "location_canonical_id": canonical
        }))
        .unwrap()
    }

    fn config_with_seed() -> AliasConfig {
        serde_json::from_value(serde_json::json!({
            "manual_entities": [{
                "entity_id": "char_frank",
                "entity_type": "character",
                "canonical_name": "Frank Sheeran",
                "aliases": ["FRANK", "FRANK SHEERAN"]
            }],
            "manual_aliases_exact": {"THE IRISHMAN": "char_frank"},
            "ignored_cues_exact": ["TITLE CARD"]
        }))
        .unwrap()
    }

    #[test]
    fn test_cue_variants_collapse_to_one_entity() {
        let cfg = config_with_seed();
        let utterances = vec![
            utterance("utt_1", "scene_002", "FRANK"),
            utterance("utt_2", "scene_001", "FRANK V/O (CONT'D)"),
            utterance("utt_3", "scene_003", "THE IRISHMAN"),
        ];
        let resolution = resolve(&[], &utterances, &cfg);

        let frank = resolution
            .entities
            .iter()
            .find(|e| e.entity_id == "char_frank")
            .unwrap();
        assert_eq!(frank.canonical_name, "Frank Sheeran");
        assert_eq!(frank.first_scene_id.as_deref(), Some("scene_001"));
        assert_eq!(
            frank.metadata.get("utterance_count").and_then(Value::as_u64),
            Some(3)
        );
        assert!(frank.aliases.iter().any(|a| a == "FRANK V/O (CONT'D)"));
    }

    #[test]
    fn test_auto_generated_entity_from_unknown_cue() {
        let cfg = AliasConfig::default();
        let utterances = vec![
            utterance("utt_1", "scene_004", "RUSSELL BUFALINO"),
            utterance("utt_2", "scene_005", "russell bufalino"),
        ];
        let resolution = resolve(&[], &utterances, &cfg);

        let russell = resolution
            .entities
            .iter()
            .find(|e| e.entity_id == "char_russell_bufalino")
            .unwrap();
        assert_eq!(russell.canonical_name, "Russell Bufalino");
        // Second raw form maps through the normalized lookup instead of
        // generating a new entity.
        assert_eq!(resolution.auto_generated_cues.len(), 1);
        assert_eq!(
            russell.metadata.get("utterance_count").and_then(Value::as_u64),
            Some(2)
        );
    }

    #[test]
    fn test_compound_and_ignored_cues_skipped() {
        let cfg = config_with_seed();
        let utterances = vec![
            utterance("utt_1", "scene_001", "FRANK AND RUSSELL"),
            utterance("utt_2", "scene_001", "TITLE CARD"),
        ];
        let resolution = resolve(&[], &utterances, &cfg);

        assert!(!resolution
            .entities
            .iter()
            .any(|e| e.entity_id.contains("frank_and_russell")));
        assert_eq!(resolution.ignored_cues.len(), 2);
    }

    #[test]
    fn test_location_entities_from_scene_headers() {
        let cfg = AliasConfig::default();
        let scenes = vec![
            scene("scene_001", 1, "LATIN CASINO", "loc_latin_casino"),
            scene("scene_002", 2, "LATIN CASINO", "loc_latin_casino"),
        ];
        let resolution = resolve(&scenes, &[], &cfg);

        let loc = resolution
            .entities
            .iter()
            .find(|e| e.entity_id == "loc_latin_casino")
            .unwrap();
        assert_eq!(loc.entity_type, EntityType::Location);
        assert_eq!(loc.metadata.get("scene_count").and_then(Value::as_u64), Some(2));
        assert_eq!(loc.first_scene_id.as_deref(), Some("scene_001"));

        let record = resolution
            .alias_records
            .iter()
            .find(|r| r.entity_id == "loc_latin_casino")
            .unwrap();
        assert_eq!(record.alias_kind, AliasKind::SceneLocation);
        assert_eq!(record.count, Some(2));
    }

    #[test]
    fn test_synthetic_prelude_scene_skipped() {
        let cfg = AliasConfig::default();
        let mut s = scene("scene_000", 0, "NOWHERE", "loc_nowhere");
        s.flags = vec!["synthetic_prelude_scene".to_string()];
        let resolution = resolve(&[s], &[], &cfg);
        assert!(resolution.entities.is_empty());
    }

    #[test]
    fn test_alias_record_ids_sequential_after_sort() {
        let cfg = AliasConfig::default();
        let utterances = vec![
            utterance("utt_1", "scene_001", "ZEBRA"),
            utterance("utt_2", "scene_001", "APPLE"),
        ];
        let resolution = resolve(&[], &utterances, &cfg);
        let ids: Vec<_> = resolution
            .alias_records
            .iter()
            .map(|r| r.alias_record_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["ealias_000001", "ealias_000002"]);
        assert_eq!(resolution.alias_records[0].alias_raw, "APPLE");
    }

    #[test]
    fn test_entities_sorted_characters_before_locations() {
        let cfg = AliasConfig::default();
        let scenes = vec![scene("scene_001", 1, "ALPHA BAR", "loc_alpha_bar")];
        let utterances = vec![utterance("utt_1", "scene_001", "ZED")];
        let resolution = resolve(&scenes, &utterances, &cfg);
        assert_eq!(resolution.entities[0].entity_type, EntityType::Character);
        assert_eq!(resolution.entities[1].entity_type, EntityType::Location);
    }
}
