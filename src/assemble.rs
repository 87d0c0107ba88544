//! Event assembly: walks script blocks scene by scene and emits the
//! events, event-participants, and scene-index artifacts.
//!
//! Every scene is bracketed by synthetic `scene_entry`/`scene_exit`
//! events, with `time_jump_explicit` and `flashback_enter` events between
//! them when the header carries a year or a flashback flag. Dialogue and
//! action blocks classify through the rule cascades; participants come
//! from the speaker cue, mention matching, weak listener inference from
//! the scene's speaker roster, and the scene location.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::artifact::{round3, sequential_id};
use crate::classify::{
    classify_action, classify_utterance, ActionContext, Classification, DialogueContext,
    TypeAssignment,
};
use crate::config::Taxonomy;
use crate::domain::{
    dedupe_participants, Entity, Event, EventParticipant, EvidenceSpan, Participant,
    ParticipantRole, Scene, ScriptBlock, Utterance,
};
use crate::domain::{AliasKind, AliasRecord, AliasSource};
use crate::mention::MentionMatcher;
use crate::text::{normalize_alias_text, truncate_snippet};

/// At most this many listeners are inferred from the scene roster for one
/// dialogue event.
const MAX_INFERRED_LISTENERS: usize = 2;
/// Mention participants kept per dialogue event.
const MAX_UTTERANCE_MENTIONS: usize = 3;
/// Mention participants kept per action event.
const MAX_ACTION_MENTIONS: usize = 4;

/// L2 types whose first mentioned entity is the addressee, not a mere
/// mention.
const TARGET_ROLE_L2S: [&str; 6] = [
    "question",
    "request",
    "instruction_order",
    "warning",
    "threat_verbal",
    "persuasion_attempt",
];

/// One scene-index row: the scene record enriched with its event slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneIndexItem {
    pub scene_id: String,
    pub scene_index: i64,
    pub header_raw: Option<String>,
    pub header_prefix: Option<String>,
    pub location_raw: Option<String>,
    pub location_canonical_id: Option<String>,
    pub time_of_day: Option<String>,
    pub year_explicit: Option<i64>,
    pub year_inferred: Option<i64>,
    pub flags: Vec<String>,
    pub line_start: Option<i64>,
    pub line_end: Option<i64>,
    pub event_ids: Vec<String>,
    pub event_count: usize,
    pub event_type_l1_counts: BTreeMap<String, u64>,
    pub event_type_l2_counts: BTreeMap<String, u64>,
    pub participant_entity_ids: Vec<String>,
    pub evidence_refs: Vec<String>,
    pub event_refs: Vec<SceneEventRef>,
}

/// Compact per-event reference embedded in a scene-index row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneEventRef {
    pub event_id: String,
    pub event_type_l1: String,
    pub event_type_l2: String,
    pub sequence_in_scene: u32,
    pub summary: String,
    pub evidence_refs: Vec<String>,
}

/// Assembly output: the three artifacts' items plus global type counters.
pub struct Assembly {
    pub events: Vec<Event>,
    pub participants: Vec<EventParticipant>,
    pub scene_index: Vec<SceneIndexItem>,
    pub event_type_l1_counts: BTreeMap<String, u64>,
    pub event_type_l2_counts: BTreeMap<String, u64>,
}

struct EventDraft {
    l2: String,
    confidence: f64,
    notes: Vec<String>,
    summary: String,
    participants: Vec<Participant>,
    block_type: String,
    block_id: String,
    line_start: i64,
    line_end: i64,
    evidence_text: String,
    source_block_ref: Option<Value>,
}

#[derive(Default)]
struct SceneAcc {
    event_ids: Vec<String>,
    evidence_refs: Vec<String>,
    participant_entities: BTreeSet<String>,
    l1_counts: BTreeMap<String, u64>,
    l2_counts: BTreeMap<String, u64>,
    event_refs: Vec<SceneEventRef>,
    sequence: u32,
}

struct EventBuilder<'a> {
    source_file: &'a str,
    taxonomy: &'a Taxonomy,
    events: Vec<Event>,
    participants: Vec<EventParticipant>,
    event_counter: usize,
    participant_counter: usize,
    evidence_counter: usize,
    l1_counts: BTreeMap<String, u64>,
    l2_counts: BTreeMap<String, u64>,
}

impl<'a> EventBuilder<'a> {
    fn new(source_file: &'a str, taxonomy: &'a Taxonomy) -> Self {
        Self {
            source_file,
            taxonomy,
            events: Vec::new(),
            participants: Vec::new(),
            event_counter: 0,
            participant_counter: 0,
            evidence_counter: 0,
            l1_counts: BTreeMap::new(),
            l2_counts: BTreeMap::new(),
        }
    }

    fn append(
        &mut self,
        scene: &Scene,
        acc: &mut SceneAcc,
        location_entity_id: Option<&str>,
        draft: EventDraft,
    ) {
        acc.sequence += 1;
        let assignment = TypeAssignment::resolve(self.taxonomy, &draft.l2);
        let l1 = assignment.l1().to_string();
        let l2 = assignment.l2().to_string();

        self.evidence_counter += 1;
        let evidence = EvidenceSpan {
            evidence_ref_id: sequential_id("evref", 6, self.evidence_counter),
            source_file: self.source_file.to_string(),
            scene_id: scene.scene_id.clone(),
            block_type: draft.block_type.clone(),
            block_id: draft.block_id.clone(),
            line_start: draft.line_start,
            line_end: draft.line_end,
            snippet: truncate_snippet(&draft.evidence_text, 220),
        };

        let mut participants = draft.participants;
        if let Some(location_id) = location_entity_id {
            participants.push(Participant {
                entity_id: location_id.to_string(),
                role: ParticipantRole::Location,
            });
        }
        let participants = dedupe_participants(participants);

        self.event_counter += 1;
        let event_id = sequential_id("evt", 6, self.event_counter);
        let confidence = round3(draft.confidence);

        let mut metadata = Map::new();
        metadata.insert("source_block_type".into(), Value::String(draft.block_type));
        metadata.insert("source_block_id".into(), Value::String(draft.block_id));
        metadata.insert("line_start".into(), Value::from(draft.line_start));
        metadata.insert("line_end".into(), Value::from(draft.line_end));
        metadata.insert(
            "evidence_spans".into(),
            Value::Array(vec![serde_json::to_value(&evidence).unwrap_or(Value::Null)]),
        );
        metadata.insert(
            "classification_notes".into(),
            Value::Array(draft.notes.into_iter().map(Value::String).collect()),
        );
        if let Some(source_block_ref) = draft.source_block_ref {
            metadata.insert("source_block_ref".into(), source_block_ref);
        }

        let event = Event {
            event_id: event_id.clone(),
            scene_id: scene.scene_id.clone(),
            event_type_l1: l1.clone(),
            event_type_l2: l2.clone(),
            summary: draft.summary,
            participants: participants.clone(),
            evidence_refs: vec![evidence.evidence_ref_id.clone()],
            sequence_in_scene: acc.sequence,
            confidence,
            extraction_method: "rule".to_string(),
            metadata,
        };

        acc.event_ids.push(event_id.clone());
        acc.evidence_refs.push(evidence.evidence_ref_id.clone());
        *acc.l1_counts.entry(l1.clone()).or_insert(0) += 1;
        *acc.l2_counts.entry(l2.clone()).or_insert(0) += 1;
        *self.l1_counts.entry(l1).or_insert(0) += 1;
        *self.l2_counts.entry(l2).or_insert(0) += 1;
        acc.event_refs.push(SceneEventRef {
            event_id: event_id.clone(),
            event_type_l1: event.event_type_l1.clone(),
            event_type_l2: event.event_type_l2.clone(),
            sequence_in_scene: event.sequence_in_scene,
            summary: event.summary.clone(),
            evidence_refs: event.evidence_refs.clone(),
        });

        for (idx, participant) in participants.iter().enumerate() {
            acc.participant_entities.insert(participant.entity_id.clone());
            self.participant_counter += 1;
            self.participants.push(EventParticipant {
                event_participant_id: sequential_id("ep", 6, self.participant_counter),
                event_id: event_id.clone(),
                scene_id: scene.scene_id.clone(),
                entity_id: participant.entity_id.clone(),
                role: participant.role,
                participant_index: (idx + 1) as u32,
                evidence_refs: vec![evidence.evidence_ref_id.clone()],
                confidence,
                extraction_method: "rule".to_string(),
            });
        }

        self.events.push(event);
    }
}

/// Maps a raw or normalized speaker cue to an entity id, built from the
/// alias artifact. Raw forms are consulted before normalized forms.
pub struct SpeakerLookup {
    raw: HashMap<String, String>,
    normalized: HashMap<String, String>,
}

impl SpeakerLookup {
    pub fn new(alias_records: &[AliasRecord]) -> Self {
        let mut raw = HashMap::new();
        let mut normalized = HashMap::new();
        for record in alias_records {
            if !record.source.contains(AliasSource::UtteranceCue) {
                continue;
            }
            if record.alias_kind != AliasKind::NormalizedCue {
                raw.entry(record.alias_raw.clone())
                    .or_insert_with(|| record.entity_id.clone());
            }
            if !record.alias_normalized.is_empty() {
                normalized
                    .entry(record.alias_normalized.clone())
                    .or_insert_with(|| record.entity_id.clone());
            }
        }
        Self { raw, normalized }
    }

    pub fn resolve(&self, cue_raw: &str) -> Option<&str> {
        if let Some(id) = self.raw.get(cue_raw) {
            return Some(id);
        }
        self.normalized
            .get(&normalize_alias_text(cue_raw))
            .map(String::as_str)
    }
}

fn event_summary(
    l2: &str,
    scene: &Scene,
    block_type: &str,
    text: &str,
    speaker_cue_raw: Option<&str>,
) -> String {
    let prefix = l2.replace('_', " ");
    let location = scene
        .location_raw
        .as_deref()
        .map(str::trim)
        .unwrap_or("");
    if block_type == "utterance" {
        if let Some(cue) = speaker_cue_raw {
            return format!("{cue}: {} ({prefix})", truncate_snippet(text, 150));
        }
    }
    let content = truncate_snippet(text, 160);
    if location.is_empty() {
        format!("{prefix}: {content}")
    } else {
        format!("{prefix} in {location}: {content}")
    }
}

fn markers_note(markers: &[String]) -> String {
    if markers.is_empty() {
        "markers:none".to_string()
    } else {
        format!("markers:{}", markers.join(","))
    }
}

/// Assemble events from parsed blocks and resolved entities.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    scenes: &[Scene],
    utterances: &[Utterance],
    script_blocks: &[ScriptBlock],
    entities: &[Entity],
    alias_records: &[AliasRecord],
    taxonomy: &Taxonomy,
    source_file: &str,
) -> Assembly {
    let mut scenes_sorted: Vec<&Scene> = scenes.iter().collect();
    scenes_sorted.sort_by(|a, b| {
        a.scene_index
            .cmp(&b.scene_index)
            .then_with(|| a.scene_id.cmp(&b.scene_id))
    });

    let utterance_by_id: HashMap<&str, &Utterance> = utterances
        .iter()
        .map(|u| (u.utterance_id.as_str(), u))
        .collect();
    let entity_ids: HashSet<&str> = entities.iter().map(|e| e.entity_id.as_str()).collect();

    let mut blocks_by_scene: HashMap<&str, Vec<&ScriptBlock>> = HashMap::new();
    let mut header_block_by_scene: HashMap<&str, &ScriptBlock> = HashMap::new();
    for block in script_blocks {
        if block.scene_id.is_empty() {
            continue;
        }
        blocks_by_scene
            .entry(block.scene_id.as_str())
            .or_default()
            .push(block);
        if block.block_type == "scene_header" {
            header_block_by_scene
                .entry(block.scene_id.as_str())
                .or_insert(block);
        }
    }
    for blocks in blocks_by_scene.values_mut() {
        blocks.sort_by(|a, b| {
            a.sequence_in_scene
                .cmp(&b.sequence_in_scene)
                .then_with(|| {
                    a.line_start
                        .unwrap_or(0)
                        .cmp(&b.line_start.unwrap_or(0))
                })
                .then_with(|| a.block_id.cmp(&b.block_id))
        });
    }

    let speakers = SpeakerLookup::new(alias_records);
    let matcher = MentionMatcher::new(entities);

    // Scene speaker roster for weak listener inference.
    let mut scene_speakers: HashMap<&str, BTreeSet<String>> = HashMap::new();
    for utt in utterances {
        if utt.scene_id.is_empty() || utt.speaker_cue_raw.is_empty() {
            continue;
        }
        if let Some(entity_id) = speakers.resolve(&utt.speaker_cue_raw) {
            scene_speakers
                .entry(utt.scene_id.as_str())
                .or_default()
                .insert(entity_id.to_string());
        }
    }

    let mut builder = EventBuilder::new(source_file, taxonomy);
    let mut scene_index: Vec<SceneIndexItem> = Vec::new();

    for scene in &scenes_sorted {
        let scene_id = scene.scene_id.as_str();
        let header_block = header_block_by_scene.get(scene_id).copied();
        let location_entity_id = scene
            .location_canonical_id
            .as_deref()
            .filter(|id| entity_ids.contains(id));

        let mut acc = SceneAcc::default();

        let mut header_line_start = scene.line_start.unwrap_or(0);
        let mut header_line_end = scene.line_start.or(scene.line_end).unwrap_or(0);
        if let Some(block) = header_block {
            header_line_start = block.line_start.unwrap_or(header_line_start);
            header_line_end = block.line_end.unwrap_or(header_line_end);
        }
        let header_text = scene
            .header_raw
            .as_deref()
            .or_else(|| header_block.map(|b| b.text.as_str()))
            .filter(|t| !t.is_empty())
            .unwrap_or("SCENE")
            .to_string();
        let header_block_id = header_block
            .map(|b| b.block_id.clone())
            .unwrap_or_else(|| scene_id.to_string());
        let header_block_type = if header_block.is_some() {
            "scene_header"
        } else {
            "scene"
        };

        builder.append(
            scene,
            &mut acc,
            location_entity_id,
            EventDraft {
                l2: "scene_entry".to_string(),
                confidence: 1.0,
                notes: vec!["synthetic_scene_boundary_start".to_string()],
                summary: format!("Scene entry: {header_text}"),
                participants: Vec::new(),
                block_type: header_block_type.to_string(),
                block_id: header_block_id.clone(),
                line_start: header_line_start,
                line_end: header_line_end,
                evidence_text: header_text.clone(),
                source_block_ref: Some(json!({"synthetic": true, "kind": "scene_entry"})),
            },
        );

        if let Some(year) = scene.year_explicit {
            builder.append(
                scene,
                &mut acc,
                location_entity_id,
                EventDraft {
                    l2: "time_jump_explicit".to_string(),
                    confidence: 0.98,
                    notes: vec!["scene_header_year_explicit".to_string()],
                    summary: format!("Explicit time marker in scene header: {year}"),
                    participants: Vec::new(),
                    block_type: header_block_type.to_string(),
                    block_id: header_block_id.clone(),
                    line_start: header_line_start,
                    line_end: header_line_end,
                    evidence_text: header_text.clone(),
                    source_block_ref: Some(json!({"synthetic": true, "kind": "time_jump_explicit"})),
                },
            );
        }

        if scene.has_flag("flashback") {
            builder.append(
                scene,
                &mut acc,
                location_entity_id,
                EventDraft {
                    l2: "flashback_enter".to_string(),
                    confidence: 0.97,
                    notes: vec!["scene_flag_flashback".to_string()],
                    summary: "Flashback scene begins".to_string(),
                    participants: Vec::new(),
                    block_type: header_block_type.to_string(),
                    block_id: header_block_id.clone(),
                    line_start: header_line_start,
                    line_end: header_line_end,
                    evidence_text: header_text.clone(),
                    source_block_ref: Some(json!({"synthetic": true, "kind": "flashback_enter"})),
                },
            );
        }

        let mut last_question_pending = false;
        let mut prior_speaker_entity_id: Option<String> = None;

        let empty = Vec::new();
        for block in blocks_by_scene.get(scene_id).unwrap_or(&empty) {
            if block.block_type == "scene_header" {
                continue;
            }
            let block_id = if block.block_id.is_empty() {
                format!("blk_missing_{scene_id}")
            } else {
                block.block_id.clone()
            };
            let line_start = block.line_start.or(scene.line_start).unwrap_or(0);
            let line_end = block.line_end.unwrap_or(line_start);
            let text = block.text.as_str();

            match block.block_type.as_str() {
                "utterance" => {
                    let utterance_id = block.utterance_id.clone().unwrap_or_default();
                    let utter = utterance_by_id.get(utterance_id.as_str()).copied();
                    let speaker_cue_raw = block
                        .speaker_cue_raw
                        .as_deref()
                        .or(utter.map(|u| u.speaker_cue_raw.as_str()))
                        .filter(|c| !c.is_empty())
                        .unwrap_or("UNKNOWN")
                        .to_string();
                    let delivery_modifiers: Vec<String> = utter
                        .map(|u| u.delivery_modifiers.clone())
                        .unwrap_or_default();
                    let current_speaker = speakers.resolve(&speaker_cue_raw).map(str::to_string);

                    let ctx = DialogueContext::new(
                        text,
                        &speaker_cue_raw,
                        &delivery_modifiers,
                        scene,
                        last_question_pending,
                        prior_speaker_entity_id.clone(),
                        current_speaker.clone(),
                    );
                    let cls: Classification = classify_utterance(&ctx);

                    let mut participants: Vec<Participant> = Vec::new();
                    if let Some(speaker_id) = &current_speaker {
                        participants.push(Participant {
                            entity_id: speaker_id.clone(),
                            role: ParticipantRole::Speaker,
                        });
                    }
                    let mut exclude = HashSet::new();
                    if let Some(speaker_id) = &current_speaker {
                        exclude.insert(speaker_id.clone());
                    }
                    let mentions = matcher.find_mentions(text, &exclude);
                    let primary_role = if TARGET_ROLE_L2S.contains(&cls.event_type_l2.as_str()) {
                        ParticipantRole::Target
                    } else if cls.event_type_l2 == "signal_or_message_delivery" {
                        ParticipantRole::Messenger
                    } else {
                        ParticipantRole::Mentioned
                    };
                    for (idx, entity_id) in mentions.iter().take(MAX_UTTERANCE_MENTIONS).enumerate()
                    {
                        participants.push(Participant {
                            entity_id: entity_id.clone(),
                            role: if idx == 0 {
                                primary_role
                            } else {
                                ParticipantRole::Mentioned
                            },
                        });
                    }
                    // Weak listener inference from the roster, never for
                    // narration overlays.
                    let narration = matches!(
                        cls.event_type_l2.as_str(),
                        "voiceover_narration" | "frame_narration_segment"
                    );
                    if !narration {
                        if let Some(speaker_id) = &current_speaker {
                            let mut existing: HashSet<String> = participants
                                .iter()
                                .map(|p| p.entity_id.clone())
                                .collect();
                            let others = scene_speakers
                                .get(scene_id)
                                .map(|set| {
                                    set.iter()
                                        .filter(|e| e.as_str() != speaker_id)
                                        .cloned()
                                        .collect::<Vec<_>>()
                                })
                                .unwrap_or_default();
                            for listener in others.into_iter().take(MAX_INFERRED_LISTENERS) {
                                if existing.contains(&listener) {
                                    continue;
                                }
                                existing.insert(listener.clone());
                                participants.push(Participant {
                                    entity_id: listener,
                                    role: ParticipantRole::Listener,
                                });
                            }
                        }
                    }

                    let mut notes = cls.notes.clone();
                    notes.push(markers_note(&block.markers));
                    let event_block_id = if utterance_id.is_empty() {
                        block_id.clone()
                    } else {
                        utterance_id.clone()
                    };
                    builder.append(
                        scene,
                        &mut acc,
                        location_entity_id,
                        EventDraft {
                            l2: cls.event_type_l2.clone(),
                            confidence: cls.confidence,
                            notes,
                            summary: event_summary(
                                &cls.event_type_l2,
                                scene,
                                "utterance",
                                text,
                                Some(&speaker_cue_raw),
                            ),
                            participants,
                            block_type: "utterance".to_string(),
                            block_id: event_block_id,
                            line_start,
                            line_end,
                            evidence_text: format!("{speaker_cue_raw}: {text}"),
                            source_block_ref: Some(json!({
                                "block_id": block_id,
                                "utterance_id": if utterance_id.is_empty() { Value::Null } else { Value::String(utterance_id.clone()) },
                                "speaker_cue_raw": speaker_cue_raw,
                                "delivery_modifiers": delivery_modifiers,
                                "markers": block.markers,
                            })),
                        },
                    );

                    last_question_pending = cls.event_type_l2 == "question";
                    prior_speaker_entity_id = current_speaker;
                }
                "action" => {
                    let action_id = block.action_id.clone().unwrap_or_default();
                    let cls = classify_action(&ActionContext::new(text, scene));
                    let mentions = matcher.find_mentions(text, &HashSet::new());
                    let participants: Vec<Participant> = mentions
                        .into_iter()
                        .take(MAX_ACTION_MENTIONS)
                        .map(|entity_id| Participant {
                            entity_id,
                            role: ParticipantRole::Participant,
                        })
                        .collect();

                    let mut notes = cls.notes.clone();
                    notes.push(markers_note(&block.markers));
                    let event_block_id = if action_id.is_empty() {
                        block_id.clone()
                    } else {
                        action_id.clone()
                    };
                    builder.append(
                        scene,
                        &mut acc,
                        location_entity_id,
                        EventDraft {
                            l2: cls.event_type_l2.clone(),
                            confidence: cls.confidence,
                            notes,
                            summary: event_summary(&cls.event_type_l2, scene, "action", text, None),
                            participants,
                            block_type: "action".to_string(),
                            block_id: event_block_id,
                            line_start,
                            line_end,
                            evidence_text: text.to_string(),
                            source_block_ref: Some(json!({
                                "block_id": block_id,
                                "action_id": if action_id.is_empty() { Value::Null } else { Value::String(action_id.clone()) },
                                "markers": block.markers,
                            })),
                        },
                    );
                    last_question_pending = false;
                }
                _ => {}
            }
        }

        let exit_line = scene.line_end.unwrap_or(header_line_end);
        builder.append(
            scene,
            &mut acc,
            location_entity_id,
            EventDraft {
                l2: "scene_exit".to_string(),
                confidence: 1.0,
                notes: vec!["synthetic_scene_boundary_end".to_string()],
                summary: format!("Scene exit: {header_text}"),
                participants: Vec::new(),
                block_type: "scene".to_string(),
                block_id: scene_id.to_string(),
                line_start: exit_line,
                line_end: exit_line,
                evidence_text: header_text.clone(),
                source_block_ref: Some(json!({"synthetic": true, "kind": "scene_exit"})),
            },
        );

        scene_index.push(SceneIndexItem {
            scene_id: scene_id.to_string(),
            scene_index: scene.scene_index,
            header_raw: scene.header_raw.clone(),
            header_prefix: scene.header_prefix.clone(),
            location_raw: scene.location_raw.clone(),
            location_canonical_id: scene.location_canonical_id.clone(),
            time_of_day: scene.time_of_day.clone(),
            year_explicit: scene.year_explicit,
            year_inferred: scene.year_inferred,
            flags: scene.flags.clone(),
            line_start: scene.line_start,
            line_end: scene.line_end,
            event_count: acc.event_ids.len(),
            event_ids: acc.event_ids,
            event_type_l1_counts: acc.l1_counts,
            event_type_l2_counts: acc.l2_counts,
            participant_entity_ids: acc.participant_entities.into_iter().collect(),
            evidence_refs: acc.evidence_refs,
            event_refs: acc.event_refs,
        });
    }

    scene_index.sort_by(|a, b| {
        a.scene_index
            .cmp(&b.scene_index)
            .then_with(|| a.scene_id.cmp(&b.scene_id))
    });

    Assembly {
        events: builder.events,
        participants: builder.participants,
        scene_index,
        event_type_l1_counts: builder.l1_counts,
        event_type_l2_counts: builder.l2_counts,
    }
}
