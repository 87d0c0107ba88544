//! Dialogue (utterance) classification cascade.

use super::{static_regex, Classification};
use crate::domain::Scene;
use crate::text::{normalize_apostrophes, text_has_any};

/// Everything one dialogue line is classified from. The classifier is a
/// pure function of this context; adjacency state (pending question,
/// prior speaker) is threaded in by the assembler.
pub struct DialogueContext {
    text_norm: String,
    text_lower: String,
    text_chars: usize,
    cue_upper: String,
    modifiers: Vec<String>,
    scene_loc_lower: String,
    scene_header_lower: String,
    pub last_question_pending: bool,
    pub prior_speaker_entity_id: Option<String>,
    pub current_speaker_entity_id: Option<String>,
}

impl DialogueContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        text: &str,
        speaker_cue_raw: &str,
        delivery_modifiers: &[String],
        scene: &Scene,
        last_question_pending: bool,
        prior_speaker_entity_id: Option<String>,
        current_speaker_entity_id: Option<String>,
    ) -> Self {
        let text_norm = normalize_apostrophes(text);
        let text_lower = text_norm.to_lowercase();
        let text_chars = text_norm.chars().count();
        Self {
            text_norm,
            text_lower,
            text_chars,
            cue_upper: normalize_apostrophes(speaker_cue_raw).to_uppercase(),
            modifiers: delivery_modifiers.to_vec(),
            scene_loc_lower: normalize_apostrophes(scene.location_raw.as_deref().unwrap_or(""))
                .to_lowercase(),
            scene_header_lower: normalize_apostrophes(scene.header_raw.as_deref().unwrap_or(""))
                .to_lowercase(),
            last_question_pending,
            prior_speaker_entity_id,
            current_speaker_entity_id,
        }
    }

    fn has_modifier(&self, modifier: &str) -> bool {
        self.modifiers.iter().any(|m| m == modifier)
    }
}

type DialogueRule = fn(&DialogueContext) -> Option<Classification>;

/// Ordered cascade; first match wins. Delivery modifiers and structural
/// cues come before keyword rules, keyword rules before length-based
/// fallbacks.
const DIALOGUE_RULES: &[DialogueRule] = &[
    rule_pre_lap,
    rule_overlap,
    rule_voice_over,
    rule_reporter_question,
    rule_press_keywords,
    rule_phone,
    rule_question,
    rule_answer_response,
    rule_greeting,
    rule_farewell,
    rule_introduction,
    rule_apology,
    rule_promise,
    rule_insult,
    rule_threat,
    rule_request,
    rule_instruction,
    rule_warning,
    rule_refusal,
    rule_agreement,
    rule_toast,
    rule_persuasion,
    rule_negotiation,
    rule_explanation,
    rule_confession,
    rule_public_address,
];

/// Classify one dialogue line. Falls through to `statement` (0.62).
pub fn classify_utterance(ctx: &DialogueContext) -> Classification {
    for rule in DIALOGUE_RULES {
        if let Some(classification) = rule(ctx) {
            return classification;
        }
    }
    Classification::new("statement", 0.62, &["default_utterance"])
}

fn rule_pre_lap(ctx: &DialogueContext) -> Option<Classification> {
    ctx.has_modifier("pre_lap")
        .then(|| Classification::new("prelap_audio_transition", 0.97, &["delivery_modifier:pre_lap"]))
}

fn rule_overlap(ctx: &DialogueContext) -> Option<Classification> {
    ctx.has_modifier("overlap").then(|| {
        Classification::new("overlap_dialogue_transition", 0.96, &["delivery_modifier:overlap"])
    })
}

fn rule_voice_over(ctx: &DialogueContext) -> Option<Classification> {
    if !ctx.has_modifier("voice_over") {
        return None;
    }
    // Voice-over inside the frame location narrates the frame story, not
    // a flashback.
    if ctx.scene_loc_lower.contains("assisted living")
        || ctx.scene_header_lower.contains("assisted living")
    {
        return Some(Classification::new(
            "frame_narration_segment",
            0.93,
            &["voiceover_in_frame_scene"],
        ));
    }
    Some(Classification::new(
        "voiceover_narration",
        0.95,
        &["delivery_modifier:voice_over"],
    ))
}

fn rule_reporter_question(ctx: &DialogueContext) -> Option<Classification> {
    (ctx.cue_upper.contains("REPORTER") && ctx.text_norm.contains('?'))
        .then(|| Classification::new("press_qna_exchange", 0.92, &["reporter_cue_question"]))
}

fn rule_press_keywords(ctx: &DialogueContext) -> Option<Classification> {
    (text_has_any(&ctx.text_lower, &["committee", "senator", "press", "reporters"])
        && ctx.text_norm.contains('?'))
    .then(|| Classification::new("press_qna_exchange", 0.78, &["press_keywords"]))
}

fn rule_phone(ctx: &DialogueContext) -> Option<Classification> {
    let opener = static_regex!(r"^\W*(hello|hold on)\b");
    let call_phrase = static_regex!(r"\b(call me|call him|call her|call back)\b");

    let phone_scene = text_has_any(&ctx.scene_loc_lower, &["phone", "telephone"])
        || text_has_any(&ctx.scene_header_lower, &["phone", "telephone"]);
    let explicit_phone_conversation =
        opener.is_match(&ctx.text_lower) || ctx.text_lower.contains("on the phone");
    let phone_scene_dialogue = phone_scene
        && (ctx.text_lower.contains("phone")
            || ctx.text_lower.contains("telephone")
            || call_phrase.is_match(&ctx.text_lower)
            || opener.is_match(&ctx.text_lower));

    (explicit_phone_conversation || phone_scene_dialogue)
        .then(|| Classification::new("phone_call_conversation", 0.72, &["phone_keywords"]))
}

fn rule_question(ctx: &DialogueContext) -> Option<Classification> {
    if !ctx.text_norm.contains('?') {
        return None;
    }
    let interrogatives = [
        "what do i owe",
        "what are the odds",
        "where are",
        "why",
        "how",
        "who",
        "when",
    ];
    if text_has_any(&ctx.text_lower, &interrogatives) {
        return Some(Classification::new("question", 0.92, &["question_mark+interrogative"]));
    }
    Some(Classification::new("question", 0.88, &["question_mark"]))
}

fn rule_answer_response(ctx: &DialogueContext) -> Option<Classification> {
    if !ctx.last_question_pending {
        return None;
    }
    let current = ctx.current_speaker_entity_id.as_deref()?;
    if Some(current) == ctx.prior_speaker_entity_id.as_deref() {
        return None;
    }
    (ctx.text_chars <= 260).then(|| {
        Classification::new("answer_response", 0.76, &["follows_question_different_speaker"])
    })
}

fn rule_greeting(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"^\W*(hi|hello|hey|good morning|good evening)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("greeting_or_opening", 0.83, &["greeting_keyword"]))
}

fn rule_farewell(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(goodbye|bye|see you)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("farewell_or_closing", 0.83, &["farewell_keyword"]))
}

fn rule_introduction(ctx: &DialogueContext) -> Option<Classification> {
    (static_regex!(r"\bthis is\b").is_match(&ctx.text_lower)
        && static_regex!(r"\bmeet\b").is_match(&ctx.text_lower))
    .then(|| Classification::new("introduction", 0.78, &["introduce+meet_keywords"]))
}

fn rule_apology(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(my fault|i'm sorry|sorry)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("apology_or_regret", 0.86, &["apology_keyword"]))
}

fn rule_promise(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(vow|i promise|i swear)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("promise_or_vow", 0.9, &["promise_keyword"]))
}

fn rule_insult(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(shut up|idiot|stupid|moron|son of a bitch)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("insult_or_disrespect", 0.85, &["insult_keyword"]))
}

fn rule_threat(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(kill you|dead|or else|i'll kill|we'll kill)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("threat_verbal", 0.84, &["threat_keyword"]))
}

fn rule_request(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(can you|could you|would you|please|let me|let us|let's)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("request", 0.78, &["request_phrase"]))
}

fn rule_instruction(ctx: &DialogueContext) -> Option<Classification> {
    if !static_regex!(r"\b(go|call|tell|take|sit|listen)\b").is_match(&ctx.text_lower)
        || ctx.text_chars >= 90
    {
        return None;
    }
    // Light heuristic for imperative/ordering speech: the line has to
    // open with the verb itself.
    let first_word = ctx.text_lower.split_whitespace().next()?;
    ["go", "call", "tell", "take", "sit", "listen"]
        .contains(&first_word)
        .then(|| Classification::new("instruction_order", 0.72, &["imperative_opening"]))
}

fn rule_warning(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(don't|do not|be careful|watch out|careful)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("warning", 0.7, &["warning_keyword"]))
}

fn rule_refusal(ctx: &DialogueContext) -> Option<Classification> {
    (static_regex!(r"\b(no|nope|can't|cannot|won't|wouldn't|not gonna)\b").is_match(&ctx.text_lower)
        && ctx.text_chars < 120)
        .then(|| Classification::new("refusal", 0.68, &["refusal_phrase"]))
}

fn rule_agreement(ctx: &DialogueContext) -> Option<Classification> {
    (static_regex!(r"\b(okay|ok|all right|fine|sure|yeah)\b").is_match(&ctx.text_lower)
        && ctx.text_chars < 100)
        .then(|| Classification::new("agreement_acceptance", 0.65, &["acceptance_keyword"]))
}

fn rule_toast(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(cheers|toast)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("joke_banter_or_toast", 0.76, &["toast_keyword"]))
}

fn rule_persuasion(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(why don't you|you gotta|you have to|listen to me)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("persuasion_attempt", 0.69, &["persuasion_phrase"]))
}

fn rule_negotiation(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(deal|terms|price|percent|split)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("negotiation", 0.66, &["negotiation_keyword"]))
}

fn rule_explanation(ctx: &DialogueContext) -> Option<Classification> {
    (static_regex!(r"\b(because|it turns out|the thing was|what happened)\b")
        .is_match(&ctx.text_lower)
        || ctx.text_chars > 220)
        .then(|| {
            Classification::new("explanation_account", 0.74, &["explanatory_phrase_or_length"])
        })
}

fn rule_confession(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(i did|i killed|i took|it was me)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("confession_or_admission", 0.68, &["admission_phrase"]))
}

fn rule_public_address(ctx: &DialogueContext) -> Option<Classification> {
    static_regex!(r"\b(rally|brothers|sisters|ladies and gentlemen)\b")
        .is_match(&ctx.text_lower)
        .then(|| Classification::new("public_speech_or_address", 0.7, &["address_phrase"]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> Scene {
        serde_json::from_value(serde_json::json!({
            "scene_id": "scene_001",
            "scene_index": 1,
            "header_raw": "INT. LATIN CASINO - NIGHT",
            "location_raw": "LATIN CASINO"
        }))
        .unwrap()
    }

    fn ctx(text: &str) -> DialogueContext {
        DialogueContext::new(text, "FRANK", &[], &scene(), false, None, None)
    }

    #[test]
    fn test_question_mark_classifies_question() {
        let cls = classify_utterance(&ctx("You did what?"));
        assert_eq!(cls.event_type_l2, "question");
        assert_eq!(cls.confidence, 0.88);

        let cls = classify_utterance(&ctx("Why would he do that?"));
        assert_eq!(cls.confidence, 0.92);
        assert_eq!(cls.notes, vec!["question_mark+interrogative"]);
    }

    #[test]
    fn test_answer_after_question_by_different_speaker() {
        let c = DialogueContext::new(
            "He went to Detroit.",
            "RUSSELL",
            &[],
            &scene(),
            true,
            Some("char_frank".to_string()),
            Some("char_russell".to_string()),
        );
        let cls = classify_utterance(&c);
        assert_eq!(cls.event_type_l2, "answer_response");
        assert_eq!(cls.confidence, 0.76);
    }

    #[test]
    fn test_same_speaker_does_not_answer_own_question() {
        let c = DialogueContext::new(
            "He went to Detroit.",
            "FRANK",
            &[],
            &scene(),
            true,
            Some("char_frank".to_string()),
            Some("char_frank".to_string()),
        );
        let cls = classify_utterance(&c);
        assert_ne!(cls.event_type_l2, "answer_response");
    }

    #[test]
    fn test_voice_over_modifier() {
        let c = DialogueContext::new(
            "It was all over the papers.",
            "FRANK V/O",
            &["voice_over".to_string()],
            &scene(),
            false,
            None,
            None,
        );
        let cls = classify_utterance(&c);
        assert_eq!(cls.event_type_l2, "voiceover_narration");
        assert_eq!(cls.confidence, 0.95);
    }

    #[test]
    fn test_voice_over_in_frame_scene() {
        let frame_scene: Scene = serde_json::from_value(serde_json::json!({
            "scene_id": "scene_000",
            "header_raw": "INT. ASSISTED LIVING HOME - DAY",
            "location_raw": "ASSISTED LIVING HOME"
        }))
        .unwrap();
        let c = DialogueContext::new(
            "Nowadays nobody remembers.",
            "FRANK V/O",
            &["voice_over".to_string()],
            &frame_scene,
            false,
            None,
            None,
        );
        let cls = classify_utterance(&c);
        assert_eq!(cls.event_type_l2, "frame_narration_segment");
    }

    #[test]
    fn test_threat_before_generic_fallbacks() {
        let cls = classify_utterance(&ctx("Do it or else."));
        assert_eq!(cls.event_type_l2, "threat_verbal");
    }

    #[test]
    fn test_imperative_requires_leading_verb() {
        let cls = classify_utterance(&ctx("Go see him."));
        assert_eq!(cls.event_type_l2, "instruction_order");

        let cls = classify_utterance(&ctx("Maybe you should go."));
        assert_ne!(cls.event_type_l2, "instruction_order");
    }

    #[test]
    fn test_default_statement() {
        let cls = classify_utterance(&ctx("The house painter arrived at noon."));
        assert_eq!(cls.event_type_l2, "statement");
        assert_eq!(cls.confidence, 0.62);
        assert_eq!(cls.notes, vec!["default_utterance"]);
    }
}
