//! Action-beat classification cascade.

use super::{static_regex, Classification};
use crate::domain::Scene;
use crate::text::{normalize_apostrophes, text_has_any};

/// Lowercased views of one action beat plus its scene context.
pub struct ActionContext {
    lower: String,
    scene_loc_lower: String,
    scene_header_lower: String,
    scene_flags: Vec<String>,
    shooting_context: bool,
}

impl ActionContext {
    pub fn new(text: &str, scene: &Scene) -> Self {
        let lower = normalize_apostrophes(text).to_lowercase();
        let shooting_context = static_regex!(
            r"\b(gunshot|gunshots|shotgun|shooting|shoots|shoot)\b"
        )
        .is_match(&lower)
            || lower.contains("shots fired")
            || static_regex!(r"\bshot\b").is_match(&lower);
        Self {
            lower,
            scene_loc_lower: normalize_apostrophes(scene.location_raw.as_deref().unwrap_or(""))
                .to_lowercase(),
            scene_header_lower: normalize_apostrophes(scene.header_raw.as_deref().unwrap_or(""))
                .to_lowercase(),
            scene_flags: scene.flags.clone(),
            shooting_context,
        }
    }

    fn text_any(&self, needles: &[&str]) -> bool {
        text_has_any(&self.lower, needles)
    }

    fn loc_any(&self, needles: &[&str]) -> bool {
        text_has_any(&self.scene_loc_lower, needles)
    }
}

/// Classify one action beat. Ordered first-match-wins; structural markers
/// outrank content keywords, specific contexts outrank generic ones.
/// Falls through to `observation_or_witnessing` (0.48).
pub fn classify_action(ctx: &ActionContext) -> Classification {
    // Narrative structure first
    if ctx.lower.contains("back to") {
        if ctx.scene_flags.iter().any(|f| f == "flashback")
            || ctx.scene_header_lower.contains("flashback")
        {
            return Classification::new("flashback_return", 0.96, &["back_to_in_flashback_scene"]);
        }
        return Classification::new("structural_callback_or_rejoin", 0.9, &["back_to_marker"]);
    }
    if ctx.lower.contains("flashback") {
        return Classification::new("flashback_enter", 0.9, &["flashback_keyword_action"]);
    }
    if ctx.lower.contains("overlap") {
        return Classification::new("overlap_dialogue_transition", 0.82, &["overlap_keyword_action"]);
    }
    if ctx.lower.contains("pre-lap") {
        return Classification::new("prelap_audio_transition", 0.82, &["prelap_keyword_action"]);
    }

    // Health / end-of-life context
    if ctx.text_any(&["assisted living", "nursing", "wheelchair", "care facility"])
        || ctx.loc_any(&["assisted living"])
    {
        return Classification::new(
            "nursing_home_or_assisted_living_interaction",
            0.89,
            &["assisted_living_context"],
        );
    }
    if ctx.text_any(&["hospital", "doctor", "treatment", "medical"]) {
        return Classification::new("medical_consultation_or_treatment", 0.74, &["medical_keywords"]);
    }
    if static_regex!(r"\b(dies|died|dead|death)\b").is_match(&ctx.lower)
        && !ctx.shooting_context
        && !ctx.lower.contains("not dead")
    {
        return Classification::new("death_event", 0.72, &["death_keywords"]);
    }
    if ctx.text_any(&["coffin", "grave", "cemetery", "burial", "plot"]) {
        return Classification::new("end_of_life_preparation", 0.7, &["end_of_life_keywords"]);
    }

    // Criminal / violence
    if ctx.shooting_context {
        return Classification::new("shooting", 0.92, &["shooting_keywords"]);
    }
    if ctx.text_any(&["kill", "murder", "killed", "homicide"]) {
        return Classification::new("homicide_killing", 0.83, &["killing_keywords"]);
    }
    if ctx.text_any(&["gun", "pistol", "revolver", "rifle", "weapon"])
        && !ctx.text_any(&["shot", "shoot"])
    {
        return Classification::new("weapon_display_or_preparation", 0.8, &["weapon_keywords"]);
    }
    // Stage choreography mentions kicks without any assault happening.
    let dance_performance_kick = static_regex!(r"\bhigh[- ]kick(?:ing|ed|s)?\b")
        .is_match(&ctx.lower)
        && (ctx.lower.contains("dancer") || ctx.lower.contains("stage"));
    if !dance_performance_kick
        && static_regex!(r"\b(punch|beat|beating|kick|smash)\b").is_match(&ctx.lower)
    {
        return Classification::new("assault_or_beating", 0.76, &["assault_keywords"]);
    }
    if ctx.text_any(&["collecting money", "collect money", "collection"])
        && ctx.text_any(&["money", "debt"])
    {
        return Classification::new("debt_collection_attempt", 0.8, &["collection_money_keywords"]);
    }
    if ctx.text_any(&["take care of it", "go see him", "job for you", "assignment"]) {
        return Classification::new("criminal_assignment_or_tasking", 0.68, &["tasking_phrase"]);
    }
    if ctx.text_any(&["shylock", "loan"]) {
        return Classification::new("loan_sharking_or_shylock_business", 0.7, &["shylock_keyword"]);
    }
    if ctx.text_any(&["payoff", "pay off", "bribe"]) {
        return Classification::new("bribery_or_payoff", 0.66, &["payoff_keyword"]);
    }

    // Legal / law enforcement / incarceration
    if ctx.text_any(&["fbi", "agent", "questioning", "interrogat", "government"]) {
        return Classification::new(
            "law_enforcement_contact_or_questioning",
            0.73,
            &["law_enforcement_keywords"],
        );
    }
    if ctx.text_any(&["bug", "wiretap", "surveillance", "phone tap"]) {
        return Classification::new(
            "surveillance_disclosure_or_bugging_discussion",
            0.75,
            &["surveillance_keywords"],
        );
    }
    if ctx.text_any(&["committee", "hearing"]) || ctx.loc_any(&["hearing", "committee"]) {
        return Classification::new("hearing_or_committee_session", 0.85, &["hearing_keywords"]);
    }
    if ctx.text_any(&["courtroom", "judge", "court"]) || ctx.loc_any(&["courtroom", "court"]) {
        return Classification::new("court_appearance", 0.82, &["court_keywords"]);
    }
    if ctx.text_any(&["testifies", "sworn", "testimony"]) {
        return Classification::new("testimony_or_sworn_statement", 0.8, &["testimony_keywords"]);
    }
    if ctx.text_any(&["indict", "charge", "charged"]) {
        return Classification::new("indictment_or_charge", 0.74, &["charge_keywords"]);
    }
    if ctx.text_any(&["sentence", "sentencing"]) {
        return Classification::new("sentencing", 0.74, &["sentencing_keywords"]);
    }
    if ctx.text_any(&["prison", "penitentiary", "cell", "confinement"])
        || ctx.loc_any(&["prison", "penitentiary"])
    {
        return Classification::new("prison_confinement_life", 0.82, &["prison_keywords"]);
    }
    if ctx.text_any(&["parole", "released"]) {
        return Classification::new("release_or_parole", 0.7, &["parole_keywords"]);
    }

    // Business / labor / political
    if ctx.text_any(&["teamster", "union", "local one-o-seven"]) || ctx.loc_any(&["teamsters"]) {
        if ctx.text_any(&["rally", "crowd", "podium"]) {
            return Classification::new("public_event_or_rally", 0.8, &["teamster_rally_keywords"]);
        }
        if ctx.text_any(&["office", "meeting", "headquarters", "hq"]) {
            return Classification::new(
                "union_meeting_or_union_office_interaction",
                0.82,
                &["union_office_keywords"],
            );
        }
        return Classification::new(
            "union_meeting_or_union_office_interaction",
            0.7,
            &["union_keywords"],
        );
    }
    if ctx.text_any(&[
        "delivery",
        "delivers",
        "loading dock",
        "carcasses",
        "unloading",
        "load",
        "truck",
    ]) {
        if ctx.text_any(&["load", "unload", "luggage", "trunk"])
            && ctx.loc_any(&["highway", "house", "howard johnson", "lincoln"])
        {
            // Luggage and trunks read as travel logistics outside a work
            // location.
            return Classification::new(
                "logistics_loading_unloading",
                0.72,
                &["travel_loading_keywords"],
            );
        }
        if ctx.text_any(&["carcasses", "store manager", "yard manager", "seal"]) {
            return Classification::new(
                "delivery_or_transport_job",
                0.92,
                &["meat_delivery_keywords"],
            );
        }
        return Classification::new("work_shift_or_job_task", 0.72, &["work_delivery_keywords"]);
    }
    if ctx.text_any(&["cash", "money handoff", "pays him", "payment"]) {
        return Classification::new("cash_payment_or_side_deal", 0.67, &["cash_keywords"]);
    }
    if ctx.text_any(&["campaign", "fundraiser", "fundraising"]) {
        return Classification::new("campaign_support_or_fundraising", 0.7, &["campaign_keywords"]);
    }
    if static_regex!(r"\b(strategy|plan|leaders)\b").is_match(&ctx.lower) {
        return Classification::new("leadership_strategy_session", 0.62, &["strategy_keywords"]);
    }

    // Movement / travel / logistics
    if ctx.text_any(&[
        "engine starts making noises",
        "misfiring",
        "timing chain",
        "broke down",
        "breakdown",
    ]) {
        return Classification::new("vehicle_issue_or_breakdown", 0.92, &["engine_issue_keywords"]);
    }
    if ctx.text_any(&["wrench", "fix", "adjustment", "repair", "maintenance"])
        && ctx.text_any(&["engine", "hood", "truck", "car"])
    {
        return Classification::new(
            "vehicle_repair_or_maintenance",
            0.92,
            &["vehicle_repair_keywords"],
        );
    }
    if ctx.text_any(&["luggage", "trunk", "garment bag", "loading", "unloading"])
        && !ctx.text_any(&["carcasses"])
    {
        return Classification::new(
            "logistics_loading_unloading",
            0.86,
            &["travel_loading_keywords"],
        );
    }
    if ctx.text_any(&["gas station", "guard rail", "stop", "stuckey", "texaco"])
        && (ctx.text_any(&["smoking", "smoke", "stop", "guard rail"])
            || ctx.loc_any(&["highway", "i-80"]))
    {
        return Classification::new("travel_stopover", 0.86, &["stopover_keywords"]);
    }
    if ctx.text_any(&["howard johnson", "hotel", "motel", "check in", "suite"])
        || ctx.loc_any(&["hotel", "howard johnson"])
    {
        return Classification::new("lodging_checkin_or_stay", 0.8, &["lodging_keywords"]);
    }
    if ctx.text_any(&["airport", "airstrip", "landing strip", "flight", "plane"])
        || ctx.loc_any(&["airstrip", "airport"])
    {
        return Classification::new("air_travel_or_flight", 0.82, &["air_travel_keywords"]);
    }
    if ctx.text_any(&["walk", "walking", "approach", "hallway", "moving along", "drift into"])
        && !ctx.text_any(&["watch", "watches"])
    {
        return Classification::new(
            "walking_approach_or_tail",
            0.66,
            &["walking_approach_keywords"],
        );
    }
    if ctx.text_any(&["drives", "driving", "drive", "car", "truck", "highway", "road", "lincoln"]) {
        if ctx.loc_any(&["highway", "i-80", "howard johnson"])
            || ctx.text_any(&["detroit", "road trip"])
        {
            return Classification::new("road_trip_segment", 0.78, &["road_trip_context"]);
        }
        return Classification::new("drive_or_vehicle_travel", 0.76, &["vehicle_travel_keywords"]);
    }
    if ctx.text_any(&["arrives", "arrival", "comes in", "approach a particular man"]) {
        return Classification::new("arrival", 0.62, &["arrival_keyword"]);
    }
    if ctx.text_any(&["leaves", "heads off", "departure"]) {
        return Classification::new("departure", 0.62, &["departure_keyword"]);
    }

    // Domestic / ritual / leisure
    if ctx.text_any(&["wedding", "invitation", "bride", "married"]) || ctx.loc_any(&["wedding"]) {
        return Classification::new("wedding_related_event", 0.88, &["wedding_keywords"]);
    }
    if ctx.text_any(&["baptism", "church", "priest"]) || ctx.loc_any(&["church"]) {
        return Classification::new("religious_ritual", 0.84, &["religious_keywords"]);
    }
    if ctx.text_any(&["smoke", "cigarette", "smoking"]) {
        return Classification::new(
            "smoking_break_or_smoking_conflict",
            0.84,
            &["smoking_keywords"],
        );
    }
    if ctx.text_any(&["bar", "drink", "bartender", "toasts"])
        || ctx.loc_any(&["lounge", "casino", "copa", "bar"])
    {
        return Classification::new("bar_or_social_drinking", 0.74, &["bar_drinking_keywords"]);
    }
    if ctx.text_any(&["eat", "eating", "dinner", "meal", "restaurant"]) {
        return Classification::new("meal_or_dining", 0.72, &["meal_keywords"]);
    }
    if ctx.text_any(&["house", "kitchen", "bureau", "home"]) {
        return Classification::new("domestic_routine", 0.62, &["domestic_keywords"]);
    }

    // Social relationship
    if ctx.text_any(&["doesn't know yet", "first meets", "appears out of nowhere"]) {
        return Classification::new("first_meeting", 0.8, &["first_meeting_phrase"]);
    }
    if ctx.text_any(&["private ceremony", "daughter", "wife", "family"]) {
        return Classification::new("family_interaction", 0.64, &["family_keywords"]);
    }
    if ctx.text_any(&["ignores", "no attention", "avoid", "distancing", "silent treatment"]) {
        return Classification::new(
            "estrangement_or_distance_behavior",
            0.66,
            &["distance_keywords"],
        );
    }
    if ctx.text_any(&["hug", "comfort", "care", "protect"]) {
        return Classification::new("affection_or_care_signal", 0.64, &["care_keywords"]);
    }
    if ctx.text_any(&["nod", "respect", "deference", "obeys"]) {
        return Classification::new("deference_signal", 0.6, &["deference_keywords"]);
    }

    // Perception / surveillance
    if ctx.text_any(&[
        "watches", "watching", "looking", "looks", "glances", "stares", "sees", "we see", "regard",
    ]) {
        return Classification::new("observation_or_witnessing", 0.72, &["observation_keywords"]);
    }
    if ctx.text_any(&["realizes", "it turns out", "recognizes"]) {
        return Classification::new(
            "recognition_or_realization",
            0.72,
            &["realization_keywords"],
        );
    }
    if ctx.text_any(&["suspicious", "distrust", "suspects"]) {
        return Classification::new(
            "suspicion_or_distrust_expression",
            0.7,
            &["suspicion_keywords"],
        );
    }
    if ctx.text_any(&["follow", "tailing", "tails"]) {
        return Classification::new("following_or_tail_surveillance", 0.75, &["tailing_keywords"]);
    }
    if ctx.text_any(&["waits", "waiting", "watch"]) {
        return Classification::new("stakeout_or_waiting_watch", 0.62, &["waiting_watch_keywords"]);
    }
    if ctx.text_any(&["coded", "don't say names", "secret", "secrecy"]) {
        return Classification::new("privacy_or_secrecy_behavior", 0.62, &["secrecy_keywords"]);
    }
    if ctx.text_any(&["message", "tells him", "relay", "signal"]) {
        return Classification::new("signal_or_message_delivery", 0.58, &["message_keywords"]);
    }
    if ctx.text_any(&["tv", "news", "headline", "anchor"]) {
        return Classification::new("news_media_awareness_update", 0.68, &["news_keywords"]);
    }

    // Generic fallbacks
    if ctx.text_any(&["work", "shift", "job", "task"]) {
        return Classification::new("work_shift_or_job_task", 0.5, &["generic_work_fallback"]);
    }
    Classification::new("observation_or_witnessing", 0.48, &["default_action_fallback"])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(header: &str, location: &str, flags: &[&str]) -> Scene {
        serde_json::from_value(serde_json::json!({
            "scene_id": "scene_010",
            "scene_index": 10,
            "header_raw": header,
            "location_raw": location,
            "flags": flags,
        }))
        .unwrap()
    }

    fn plain_scene() -> Scene {
        scene("EXT. STREET - DAY", "STREET", &[])
    }

    #[test]
    fn test_back_to_in_flashback_scene() {
        let s = scene("INT. LATIN CASINO - NIGHT [FLASHBACK]", "LATIN CASINO", &["flashback"]);
        let cls = classify_action(&ActionContext::new("BACK TO the casino floor.", &s));
        assert_eq!(cls.event_type_l2, "flashback_return");
        assert_eq!(cls.confidence, 0.96);
    }

    #[test]
    fn test_back_to_outside_flashback() {
        let cls = classify_action(&ActionContext::new("BACK TO the street.", &plain_scene()));
        assert_eq!(cls.event_type_l2, "structural_callback_or_rejoin");
    }

    #[test]
    fn test_shot_suppresses_death_event() {
        let cls = classify_action(&ActionContext::new(
            "Two shots and he is dead before he hits the floor.",
            &plain_scene(),
        ));
        assert_eq!(cls.event_type_l2, "shooting");
        assert_eq!(cls.confidence, 0.92);
    }

    #[test]
    fn test_death_without_shooting_context() {
        let cls = classify_action(&ActionContext::new(
            "He died in his sleep that winter.",
            &plain_scene(),
        ));
        assert_eq!(cls.event_type_l2, "death_event");
    }

    #[test]
    fn test_weapon_display_requires_no_shot() {
        let cls = classify_action(&ActionContext::new(
            "He lays the pistol on the table.",
            &plain_scene(),
        ));
        assert_eq!(cls.event_type_l2, "weapon_display_or_preparation");
    }

    #[test]
    fn test_dance_high_kick_is_not_assault() {
        let cls = classify_action(&ActionContext::new(
            "Dancers high-kicking across the stage.",
            &plain_scene(),
        ));
        assert_ne!(cls.event_type_l2, "assault_or_beating");
    }

    #[test]
    fn test_union_rally_branch() {
        let cls = classify_action(&ActionContext::new(
            "Union men crowd around the podium at the rally.",
            &plain_scene(),
        ));
        assert_eq!(cls.event_type_l2, "public_event_or_rally");
        assert_eq!(cls.confidence, 0.8);
    }

    #[test]
    fn test_meat_delivery_branch() {
        let cls = classify_action(&ActionContext::new(
            "He backs the truck up to the dock and checks the carcasses with the store manager.",
            &plain_scene(),
        ));
        assert_eq!(cls.event_type_l2, "delivery_or_transport_job");
        assert_eq!(cls.confidence, 0.92);
    }

    #[test]
    fn test_road_trip_context() {
        let s = scene("EXT. I-80 WEST - DAY", "I-80 WEST", &[]);
        let cls = classify_action(&ActionContext::new("The Lincoln rolls on.", &s));
        assert_eq!(cls.event_type_l2, "road_trip_segment");
    }

    #[test]
    fn test_default_action_fallback() {
        let cls = classify_action(&ActionContext::new("A long, quiet moment.", &plain_scene()));
        assert_eq!(cls.event_type_l2, "observation_or_witnessing");
        assert_eq!(cls.confidence, 0.48);
        assert_eq!(cls.notes, vec!["default_action_fallback"]);
    }
}
