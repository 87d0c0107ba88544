//! Command-line interface for screengraph.
//!
//! One subcommand per build step (entities, events, temporal,
//! state-changes, kg-edges) plus `build`, which runs the whole pipeline
//! in dependency order against one artifact tree. Every command accepts
//! `--indent` and a `--timestamp` override; with a fixed timestamp two
//! runs on the same inputs produce byte-identical artifacts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::artifact::{propagate_source_hash, utc_now_iso, Envelope};
use crate::assemble::{assemble, Assembly, SceneIndexItem};
use crate::config::{AliasConfig, StateChangeConfig, Taxonomy};
use crate::domain::{
    ActionBeat, AliasRecord, Entity, Event, EventParticipant, Scene, ScriptBlock, Utterance,
};
use crate::kg::CooccurrenceOptions;
use crate::resolve::resolve;
use crate::statechange::infer_state_changes;
use crate::temporal::build_temporal_graph;

const ENTITY_BUILDER_VERSION: &str = "phase2-entities-v0.1.0";
const EVENT_EXTRACTOR_VERSION: &str = "phase3-events-v0.1.0";
const TEMPORAL_BUILDER_VERSION: &str = "phase4-temporal-v0.1.0";
const STATE_CHANGE_VERSION: &str = "phase4-state-changes-v0.1.0";
const KG_BUILDER_VERSION: &str = "phase2-kg-v0.1.0";

/// screengraph - deterministic screenplay-to-knowledge-graph extraction
#[derive(Parser, Debug)]
#[command(name = "screengraph")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Output options shared by every build step.
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output directory for derived artifacts
    #[arg(long, default_value = "data/derived")]
    pub out_dir: PathBuf,

    /// JSON indent width (0 writes compact JSON)
    #[arg(long, default_value_t = 2)]
    pub indent: usize,

    /// Fixed build timestamp (RFC3339); defaults to now
    #[arg(long)]
    pub timestamp: Option<String>,
}

impl OutputArgs {
    fn build_timestamp(&self) -> String {
        self.timestamp.clone().unwrap_or_else(utc_now_iso)
    }
}

#[derive(Args, Debug, Clone)]
pub struct CooccurrenceArgs {
    /// Minimum shared dialogue scenes before a derived KG edge is emitted
    #[arg(long, default_value_t = 3)]
    pub cooccurrence_min_scenes: u64,

    /// Cap on derived KG edges, applied after ranking
    #[arg(long, default_value_t = 120)]
    pub cooccurrence_max_edges: usize,
}

impl CooccurrenceArgs {
    fn options(&self) -> CooccurrenceOptions {
        CooccurrenceOptions {
            min_scenes: self.cooccurrence_min_scenes,
            max_edges: self.cooccurrence_max_edges,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve entities and alias records from scenes and utterances
    Entities {
        /// Scenes artifact
        #[arg(long, default_value = "data/intermediate/scenes.json")]
        scenes: PathBuf,

        /// Utterances artifact
        #[arg(long, default_value = "data/intermediate/utterances.json")]
        utterances: PathBuf,

        /// Manual alias/entity config
        #[arg(long, default_value = "config/entity_aliases.manual.json")]
        config: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Assemble events, event participants, and the scene index
    Events {
        /// Directory holding the parsed intermediate artifacts
        #[arg(long, default_value = "data/intermediate")]
        intermediate_dir: PathBuf,

        /// Directory holding (and receiving) derived artifacts
        #[arg(long, default_value = "data/derived")]
        derived_dir: PathBuf,

        /// Event taxonomy config
        #[arg(long, default_value = "config/event_taxonomy.json")]
        taxonomy: PathBuf,

        /// JSON indent width (0 writes compact JSON)
        #[arg(long, default_value_t = 2)]
        indent: usize,

        /// Fixed build timestamp (RFC3339); defaults to now
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Derive temporal ordering edges from events and the scene index
    Temporal {
        /// Events artifact
        #[arg(long, default_value = "data/derived/events.json")]
        events: PathBuf,

        /// Scene index artifact
        #[arg(long, default_value = "data/derived/scene_index.json")]
        scene_index: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Infer relationship state changes from events via the rule set
    StateChanges {
        /// Events artifact
        #[arg(long, default_value = "data/derived/events.json")]
        events: PathBuf,

        /// Scene index artifact
        #[arg(long, default_value = "data/derived/scene_index.json")]
        scene_index: PathBuf,

        /// Entities artifact
        #[arg(long, default_value = "data/derived/entities.json")]
        entities: PathBuf,

        /// State-change rule config
        #[arg(long, default_value = "config/state_change_rules.json")]
        rules: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Build knowledge-graph edges (manual config + co-occurrence)
    KgEdges {
        /// Entities artifact
        #[arg(long, default_value = "data/derived/entities.json")]
        entities: PathBuf,

        /// Entity aliases artifact
        #[arg(long, default_value = "data/derived/entity_aliases.json")]
        aliases: PathBuf,

        /// Utterances artifact
        #[arg(long, default_value = "data/intermediate/utterances.json")]
        utterances: PathBuf,

        /// Manual alias/entity config (holds manual_kg_edges)
        #[arg(long, default_value = "config/entity_aliases.manual.json")]
        config: PathBuf,

        #[command(flatten)]
        cooccurrence: CooccurrenceArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run the full pipeline in dependency order
    Build {
        /// Directory holding the parsed intermediate artifacts
        #[arg(long, default_value = "data/intermediate")]
        intermediate_dir: PathBuf,

        /// Manual alias/entity config
        #[arg(long, default_value = "config/entity_aliases.manual.json")]
        config: PathBuf,

        /// Event taxonomy config
        #[arg(long, default_value = "config/event_taxonomy.json")]
        taxonomy: PathBuf,

        /// State-change rule config
        #[arg(long, default_value = "config/state_change_rules.json")]
        rules: PathBuf,

        #[command(flatten)]
        cooccurrence: CooccurrenceArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Entities {
                scenes,
                utterances,
                config,
                output,
            } => run_entities(&scenes, &utterances, &config, &output),
            Commands::Events {
                intermediate_dir,
                derived_dir,
                taxonomy,
                indent,
                timestamp,
            } => {
                let output = OutputArgs {
                    out_dir: derived_dir,
                    indent,
                    timestamp,
                };
                run_events(&intermediate_dir, &taxonomy, &output)
            }
            Commands::Temporal {
                events,
                scene_index,
                output,
            } => run_temporal(&events, &scene_index, &output),
            Commands::StateChanges {
                events,
                scene_index,
                entities,
                rules,
                output,
            } => run_state_changes(&events, &scene_index, &entities, &rules, &output),
            Commands::KgEdges {
                entities,
                aliases,
                utterances,
                config,
                cooccurrence,
                output,
            } => run_kg_edges(
                &entities,
                &aliases,
                &utterances,
                &config,
                cooccurrence.options(),
                &output,
            ),
            Commands::Build {
                intermediate_dir,
                config,
                taxonomy,
                rules,
                cooccurrence,
                output,
            } => run_build(
                &intermediate_dir,
                &config,
                &taxonomy,
                &rules,
                cooccurrence.options(),
                &output,
            ),
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn counts_value(counts: &std::collections::BTreeMap<String, u64>) -> Value {
    json!(counts)
}

/// Resolve entities/aliases and write `entities.json` + `entity_aliases.json`.
fn run_entities(
    scenes_path: &Path,
    utterances_path: &Path,
    config_path: &Path,
    output: &OutputArgs,
) -> Result<()> {
    let scenes: Envelope<Scene> =
        Envelope::load(scenes_path).context("loading scenes artifact")?;
    let utterances: Envelope<Utterance> =
        Envelope::load(utterances_path).context("loading utterances artifact")?;
    let cfg = AliasConfig::load(config_path).context("loading alias config")?;

    let build_timestamp = output.build_timestamp();
    let source_hash = propagate_source_hash(
        &[
            &scenes.metadata.source_file_hash,
            &utterances.metadata.source_file_hash,
        ],
        &[scenes_path, utterances_path],
    )?;

    let resolution = resolve(&scenes.items, &utterances.items, &cfg);
    if resolution.skipped_seed_count > 0 {
        warn!(
            skipped = resolution.skipped_seed_count,
            "malformed manual entity seeds were skipped"
        );
    }

    let source_artifacts = json!([display(scenes_path), display(utterances_path)]);

    let mut extra = Map::new();
    extra.insert(
        "entity_type_counts".into(),
        counts_value(&resolution.entity_type_counts),
    );
    extra.insert(
        "manual_seed_count".into(),
        Value::from(resolution.manual_seed_count),
    );
    extra.insert(
        "ignored_cue_unique_count".into(),
        Value::from(resolution.ignored_cues.len()),
    );
    extra.insert(
        "auto_generated_cue_unique_count".into(),
        Value::from(resolution.auto_generated_cues.len()),
    );
    extra.insert("source_artifacts".into(), source_artifacts.clone());
    extra.insert("config_file".into(), Value::String(display(config_path)));

    let entity_count = resolution.entities.len();
    let alias_count = resolution.alias_records.len();
    Envelope::new(
        "entities",
        ENTITY_BUILDER_VERSION,
        &build_timestamp,
        &source_hash,
        resolution.entities,
        extra,
    )
    .write_to(&output.out_dir.join("entities.json"), output.indent)?;

    let mut alias_extra = Map::new();
    alias_extra.insert("source_artifacts".into(), source_artifacts);
    alias_extra.insert("config_file".into(), Value::String(display(config_path)));
    Envelope::new(
        "entity_aliases",
        ENTITY_BUILDER_VERSION,
        &build_timestamp,
        &source_hash,
        resolution.alias_records,
        alias_extra,
    )
    .write_to(&output.out_dir.join("entity_aliases.json"), output.indent)?;

    println!("Wrote entity artifacts to {}", output.out_dir.display());
    let type_summary = resolution
        .entity_type_counts
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("Entities: {entity_count} ({type_summary})");
    println!("Alias records: {alias_count}");
    println!("Ignored cue variants: {}", resolution.ignored_cues.len());
    if !resolution.auto_generated_cues.is_empty() {
        println!(
            "Auto-generated cue canonicals: {}",
            resolution.auto_generated_cues.len()
        );
    }
    Ok(())
}

/// Assemble events and write `events.json`, `event_participants.json`,
/// and `scene_index.json`.
fn run_events(intermediate_dir: &Path, taxonomy_path: &Path, output: &OutputArgs) -> Result<()> {
    let scenes_path = intermediate_dir.join("scenes.json");
    let utterances_path = intermediate_dir.join("utterances.json");
    let action_beats_path = intermediate_dir.join("action_beats.json");
    let script_blocks_path = intermediate_dir.join("script_blocks.json");
    let entities_path = output.out_dir.join("entities.json");
    let aliases_path = output.out_dir.join("entity_aliases.json");

    let scenes: Envelope<Scene> =
        Envelope::load(&scenes_path).context("loading scenes artifact")?;
    let utterances: Envelope<Utterance> =
        Envelope::load(&utterances_path).context("loading utterances artifact")?;
    let action_beats: Envelope<ActionBeat> =
        Envelope::load(&action_beats_path).context("loading action beats artifact")?;
    let script_blocks: Envelope<ScriptBlock> =
        Envelope::load(&script_blocks_path).context("loading script blocks artifact")?;
    let entities: Envelope<Entity> =
        Envelope::load(&entities_path).context("loading entities artifact")?;
    let aliases: Envelope<AliasRecord> =
        Envelope::load(&aliases_path).context("loading entity aliases artifact")?;
    let taxonomy = Taxonomy::load(taxonomy_path).context("loading event taxonomy")?;
    debug!(
        action_beats = action_beats.items.len(),
        "action beats validated against the input contract"
    );

    let build_timestamp = output.build_timestamp();
    let source_hash = propagate_source_hash(
        &[
            &scenes.metadata.source_file_hash,
            &entities.metadata.source_file_hash,
        ],
        &[script_blocks_path.as_path()],
    )?;
    let source_file = scenes
        .metadata
        .extra
        .get("source_file")
        .and_then(Value::as_str)
        .unwrap_or("script.md")
        .to_string();

    let assembly: Assembly = assemble(
        &scenes.items,
        &utterances.items,
        &script_blocks.items,
        &entities.items,
        &aliases.items,
        &taxonomy,
        &source_file,
    );

    let source_artifacts = json!([
        display(&scenes_path),
        display(&utterances_path),
        display(&action_beats_path),
        display(&script_blocks_path),
        display(&entities_path),
        display(&aliases_path),
    ]);

    let mut events_extra = Map::new();
    events_extra.insert(
        "event_type_l1_counts".into(),
        counts_value(&assembly.event_type_l1_counts),
    );
    events_extra.insert(
        "event_type_l2_counts".into(),
        counts_value(&assembly.event_type_l2_counts),
    );
    events_extra.insert(
        "taxonomy_file".into(),
        Value::String(display(taxonomy_path)),
    );
    events_extra.insert("taxonomy_l2_count".into(), Value::from(taxonomy.len()));
    events_extra.insert("source_artifacts".into(), source_artifacts);

    let event_count = assembly.events.len();
    let participant_count = assembly.participants.len();
    let scene_count = assembly.scene_index.len();
    let l1_counts = assembly.event_type_l1_counts.clone();

    Envelope::new(
        "events",
        EVENT_EXTRACTOR_VERSION,
        &build_timestamp,
        &source_hash,
        assembly.events,
        events_extra,
    )
    .write_to(&output.out_dir.join("events.json"), output.indent)?;

    let mut participants_extra = Map::new();
    participants_extra.insert(
        "source_artifact".into(),
        Value::String(display(&output.out_dir.join("events.json"))),
    );
    Envelope::new(
        "event_participants",
        EVENT_EXTRACTOR_VERSION,
        &build_timestamp,
        &source_hash,
        assembly.participants,
        participants_extra,
    )
    .write_to(
        &output.out_dir.join("event_participants.json"),
        output.indent,
    )?;

    let mut scene_index_extra = Map::new();
    scene_index_extra.insert(
        "source_artifacts".into(),
        json!([
            display(&scenes_path),
            display(&output.out_dir.join("events.json"))
        ]),
    );
    scene_index_extra.insert("scene_count".into(), Value::from(scene_count));
    Envelope::new(
        "scene_index",
        EVENT_EXTRACTOR_VERSION,
        &build_timestamp,
        &source_hash,
        assembly.scene_index,
        scene_index_extra,
    )
    .write_to(&output.out_dir.join("scene_index.json"), output.indent)?;

    println!("Wrote event artifacts to {}", output.out_dir.display());
    println!("Events: {event_count}");
    println!("Event participants: {participant_count}");
    println!("Scenes indexed: {scene_count}");
    println!("L1 coverage:");
    for (l1, count) in &l1_counts {
        println!("  - {l1}: {count}");
    }
    Ok(())
}

/// Derive temporal edges and write `temporal_edges.json`.
fn run_temporal(events_path: &Path, scene_index_path: &Path, output: &OutputArgs) -> Result<()> {
    let events: Envelope<Event> =
        Envelope::load(events_path).context("loading events artifact")?;
    let scene_index: Envelope<SceneIndexItem> =
        Envelope::load(scene_index_path).context("loading scene index artifact")?;

    let build_timestamp = output.build_timestamp();
    let source_hash = propagate_source_hash(
        &[
            &events.metadata.source_file_hash,
            &scene_index.metadata.source_file_hash,
        ],
        &[events_path, scene_index_path],
    )?;

    let graph = build_temporal_graph(&events.items, &scene_index.items)
        .context("deriving temporal edges")?;

    let mut extra = Map::new();
    extra.insert("relation_counts".into(), counts_value(&graph.relation_counts));
    extra.insert("basis_counts".into(), counts_value(&graph.basis_counts));
    extra.insert("event_count".into(), Value::from(graph.event_count));
    extra.insert("scene_count".into(), Value::from(graph.scene_count));
    extra.insert(
        "source_artifacts".into(),
        json!([display(events_path), display(scene_index_path)]),
    );

    let edge_count = graph.edges.len();
    let relation_counts = graph.relation_counts.clone();
    Envelope::new(
        "temporal_edges",
        TEMPORAL_BUILDER_VERSION,
        &build_timestamp,
        &source_hash,
        graph.edges,
        extra,
    )
    .write_to(&output.out_dir.join("temporal_edges.json"), output.indent)?;

    println!(
        "Wrote temporal edges to {}",
        output.out_dir.join("temporal_edges.json").display()
    );
    println!("Temporal edges: {edge_count}");
    println!("Relations:");
    for (relation, count) in &relation_counts {
        println!("  - {relation}: {count}");
    }
    Ok(())
}

/// Infer state changes and write `state_changes.json`.
fn run_state_changes(
    events_path: &Path,
    scene_index_path: &Path,
    entities_path: &Path,
    rules_path: &Path,
    output: &OutputArgs,
) -> Result<()> {
    let events: Envelope<Event> =
        Envelope::load(events_path).context("loading events artifact")?;
    let scene_index: Envelope<SceneIndexItem> =
        Envelope::load(scene_index_path).context("loading scene index artifact")?;
    let entities: Envelope<Entity> =
        Envelope::load(entities_path).context("loading entities artifact")?;
    let cfg = StateChangeConfig::load(rules_path).context("loading state-change rules")?;
    debug!(
        entities = entities.items.len(),
        "entities validated against the input contract"
    );

    let build_timestamp = output.build_timestamp();
    let source_hash = propagate_source_hash(
        &[&events.metadata.source_file_hash],
        &[events_path, scene_index_path, rules_path],
    )?;

    let build = infer_state_changes(&events.items, &scene_index.items, &cfg);
    let uncovered = build.uncovered_core_pairs();
    if !uncovered.is_empty() {
        warn!(
            pairs = uncovered.join(", "),
            "zero state changes for core pair(s)"
        );
    }

    let mut extra = Map::new();
    extra.insert("claim_type_counts".into(), counts_value(&build.claim_type_counts));
    extra.insert(
        "state_dimension_counts".into(),
        counts_value(&build.state_dimension_counts),
    );
    extra.insert("direction_counts".into(), counts_value(&build.direction_counts));
    extra.insert("pair_counts".into(), counts_value(&build.pair_counts));
    extra.insert(
        "pair_counts_undirected".into(),
        counts_value(&build.pair_counts_undirected),
    );
    extra.insert(
        "core_pair_summary".into(),
        serde_json::to_value(&build.core_pair_summary)?,
    );
    extra.insert("rule_count_active".into(), Value::from(build.rule_count_active));
    extra.insert("rule_hit_counts".into(), counts_value(&build.rule_hit_counts));
    extra.insert(
        "source_artifacts".into(),
        json!([
            display(events_path),
            display(scene_index_path),
            display(entities_path)
        ]),
    );
    extra.insert("config_file".into(), Value::String(display(rules_path)));
    extra.insert(
        "claim_type_note".into(),
        Value::String(
            "explicit=direct relational/perception wording in evidence; inferred=behavioral/structural cue rule".to_string(),
        ),
    );

    let item_count = build.items.len();
    let claim_type_counts = build.claim_type_counts.clone();
    let dimension_counts = build.state_dimension_counts.clone();
    let core_pair_summary = build.core_pair_summary.clone();
    Envelope::new(
        "state_changes",
        STATE_CHANGE_VERSION,
        &build_timestamp,
        &source_hash,
        build.items,
        extra,
    )
    .write_to(&output.out_dir.join("state_changes.json"), output.indent)?;

    println!(
        "Wrote state changes to {}",
        output.out_dir.join("state_changes.json").display()
    );
    println!("State changes: {item_count}");
    println!("Claim types:");
    for (key, count) in &claim_type_counts {
        println!("  - {key}: {count}");
    }
    println!("State dimensions:");
    for (key, count) in &dimension_counts {
        println!("  - {key}: {count}");
    }
    if !core_pair_summary.is_empty() {
        println!("Core pair coverage:");
        for (pair_id, info) in &core_pair_summary {
            println!(
                "  - {pair_id}: directed={}, undirected={} ({})",
                info.directed_state_change_count, info.undirected_state_change_count, info.label
            );
        }
    }
    Ok(())
}

/// Build KG edges and write `kg_edges.json`.
fn run_kg_edges(
    entities_path: &Path,
    aliases_path: &Path,
    utterances_path: &Path,
    config_path: &Path,
    options: CooccurrenceOptions,
    output: &OutputArgs,
) -> Result<()> {
    let entities: Envelope<Entity> =
        Envelope::load(entities_path).context("loading entities artifact")?;
    let aliases: Envelope<AliasRecord> =
        Envelope::load(aliases_path).context("loading entity aliases artifact")?;
    let utterances: Envelope<Utterance> =
        Envelope::load(utterances_path).context("loading utterances artifact")?;
    let cfg = AliasConfig::load(config_path).context("loading alias config")?;

    let build_timestamp = output.build_timestamp();
    let source_hash = propagate_source_hash(
        &[
            &entities.metadata.source_file_hash,
            &aliases.metadata.source_file_hash,
            &utterances.metadata.source_file_hash,
        ],
        &[entities_path, aliases_path, utterances_path],
    )?;

    let build = crate::kg::build_kg_edges(
        &entities.items,
        &aliases.items,
        &utterances.items,
        &cfg,
        options,
    );
    if build.skipped_manual_edge_count > 0 {
        warn!(
            skipped = build.skipped_manual_edge_count,
            "manual KG edges with missing fields or unknown endpoints were skipped"
        );
    }

    let mut extra = Map::new();
    extra.insert("manual_edge_count".into(), Value::from(build.manual_edge_count));
    extra.insert("derived_edge_count".into(), Value::from(build.derived_edge_count));
    extra.insert("predicate_counts".into(), counts_value(&build.predicate_counts));
    extra.insert("cooccurrence_min_scenes".into(), Value::from(options.min_scenes));
    extra.insert("cooccurrence_max_edges".into(), Value::from(options.max_edges));
    extra.insert(
        "source_artifacts".into(),
        json!([
            display(entities_path),
            display(aliases_path),
            display(utterances_path)
        ]),
    );
    extra.insert("config_file".into(), Value::String(display(config_path)));
    extra.insert(
        "skipped_manual_edge_count".into(),
        Value::from(build.skipped_manual_edge_count),
    );

    let edge_count = build.edges.len();
    let manual_edge_count = build.manual_edge_count;
    let derived_edge_count = build.derived_edge_count;
    let predicate_counts = build.predicate_counts.clone();
    Envelope::new(
        "kg_edges",
        KG_BUILDER_VERSION,
        &build_timestamp,
        &source_hash,
        build.edges,
        extra,
    )
    .write_to(&output.out_dir.join("kg_edges.json"), output.indent)?;

    println!(
        "Wrote KG edges to {}",
        output.out_dir.join("kg_edges.json").display()
    );
    println!("KG edges: {edge_count} (manual={manual_edge_count}, derived={derived_edge_count})");
    println!("Predicates:");
    for (predicate, count) in &predicate_counts {
        println!("  - {predicate}: {count}");
    }
    Ok(())
}

/// Full pipeline against one artifact tree, all steps stamped with the
/// same build timestamp.
fn run_build(
    intermediate_dir: &Path,
    config_path: &Path,
    taxonomy_path: &Path,
    rules_path: &Path,
    options: CooccurrenceOptions,
    output: &OutputArgs,
) -> Result<()> {
    let output = OutputArgs {
        out_dir: output.out_dir.clone(),
        indent: output.indent,
        timestamp: Some(output.build_timestamp()),
    };

    run_entities(
        &intermediate_dir.join("scenes.json"),
        &intermediate_dir.join("utterances.json"),
        config_path,
        &output,
    )?;
    run_events(intermediate_dir, taxonomy_path, &output)?;
    run_temporal(
        &output.out_dir.join("events.json"),
        &output.out_dir.join("scene_index.json"),
        &output,
    )?;
    run_state_changes(
        &output.out_dir.join("events.json"),
        &output.out_dir.join("scene_index.json"),
        &output.out_dir.join("entities.json"),
        rules_path,
        &output,
    )?;
    run_kg_edges(
        &output.out_dir.join("entities.json"),
        &output.out_dir.join("entity_aliases.json"),
        &intermediate_dir.join("utterances.json"),
        config_path,
        options,
        &output,
    )
}
