//! Append-only turn log with aggregated business state.

use crate::audio::vad::{Clock, SystemClock};
use crate::session::merge;
use crate::session::model::{
    CallSession, CallStage, CallStatus, Entities, Interruption, LeadStage, Role, ScoringRules,
    Turn, TurnMetadata,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Call identifier derived from the wall clock: `call_<unix seconds>`.
pub fn new_call_id() -> String {
    format!("call_{}", Utc::now().timestamp())
}

/// Serializable snapshot written at call end.
#[derive(Debug, Clone, Serialize)]
pub struct SessionExport {
    #[serde(flatten)]
    pub session: CallSession,
    pub duration: f64,
}

pub struct SessionStore {
    session: CallSession,
    rules: ScoringRules,
    clock: Arc<dyn Clock>,
    started: Instant,
    last_timestamp: f64,
}

impl SessionStore {
    pub fn new(call_id: impl Into<String>, rules: ScoringRules) -> Self {
        Self::with_clock(call_id, rules, Arc::new(SystemClock))
    }

    pub fn with_clock(call_id: impl Into<String>, rules: ScoringRules, clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            session: CallSession::new(call_id.into(), Utc::now()),
            rules,
            clock,
            started,
            last_timestamp: 0.0,
        }
    }

    /// Seconds since the call started, never less than the previous turn.
    fn offset(&mut self) -> f64 {
        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(self.started)
            .as_secs_f64();
        self.last_timestamp = self.last_timestamp.max(elapsed);
        self.last_timestamp
    }

    pub fn add_user_turn(&mut self, text: &str) {
        let timestamp = self.offset();
        self.session.turns.push(Turn {
            role: Role::User,
            text: text.to_string(),
            timestamp,
            intent: None,
            sentiment: None,
            entities: Entities::new(),
            action_items: Vec::new(),
            decisions: Vec::new(),
        });
    }

    /// Append an assistant turn and fold its metadata into the aggregates.
    pub fn add_assistant_turn(&mut self, text: &str, metadata: TurnMetadata) {
        let timestamp = self.offset();
        let session = &mut self.session;
        merge::append_sentiment(
            &mut session.sentiment_timeline,
            timestamp,
            metadata.sentiment.as_deref(),
        );
        merge::extend_unique(&mut session.action_items, &metadata.action_items);
        merge::extend_unique(&mut session.decisions, &metadata.decisions);
        merge::merge_entities(&mut session.entities, &metadata.entities);
        merge::project_entities(&mut session.business_state, &metadata.entities);
        merge::apply_lead_score(
            &mut session.business_state,
            &mut session.scoring,
            &self.rules,
        );
        merge::update_insights(
            &mut session.insights,
            metadata.intent.as_deref(),
            metadata.sentiment.as_deref(),
            &metadata.entities,
            text,
        );

        session.turns.push(Turn {
            role: Role::Assistant,
            text: text.to_string(),
            timestamp,
            intent: metadata.intent,
            sentiment: metadata.sentiment,
            entities: metadata.entities,
            action_items: metadata.action_items,
            decisions: metadata.decisions,
        });
    }

    /// Record the lead stage reported by reasoning. `None` leaves it unchanged.
    pub fn set_lead_stage(&mut self, stage: Option<LeadStage>) {
        if let Some(stage) = stage {
            self.session.business_state.lead_stage = Some(stage);
        }
    }

    /// Move the call stage forward. Returns whether it changed.
    pub fn advance_stage(&mut self, next: CallStage) -> bool {
        let current = self.session.call_stage;
        self.session.call_stage = current.advance(next);
        self.session.call_stage != current
    }

    pub fn record_interruption(&mut self, text: &str) {
        let timestamp = self.offset();
        self.session.interruptions.push(Interruption {
            timestamp,
            text: text.to_string(),
        });
    }

    /// Rebuild the rolling summary from the customer profile and call state.
    pub fn update_summary(&mut self) {
        let state = &self.session.business_state;
        let insights = &self.session.insights;
        let unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".to_string());
        let list = |items: &[String]| {
            if items.is_empty() {
                "none".to_string()
            } else {
                items.join(", ")
            }
        };

        let lead_stage = state.lead_stage.map(LeadStage::as_str).unwrap_or("new");
        let summary = format!(
            "Customer Profile:\n\
             - Name: {}\n\
             - Budget: {}\n\
             - Location: {}\n\
             - Configuration: {}\n\
             - Properties Discussed: {}\n\
             Call State:\n\
             - Lead Stage: {}\n\
             - Last Intent: {}\n\
             - Sentiment: {}\n\
             - Objections: {}",
            unknown(&state.customer_name),
            unknown(&state.budget),
            unknown(&state.location),
            unknown(&state.configuration),
            list(&insights.properties_discussed),
            lead_stage,
            unknown(&insights.last_intent),
            unknown(&insights.last_sentiment),
            list(&insights.objections),
        );
        self.session.summary = summary;
    }

    /// Summary plus the last `max_turns` turns, speaker-labelled.
    pub fn context_for_prompt(&self, max_turns: usize) -> String {
        let turns = &self.session.turns;
        let recent = &turns[turns.len().saturating_sub(max_turns)..];
        let mut context = format!(
            "Conversation summary: {}\n\nRecent exchanges:\n",
            self.session.summary
        );
        for turn in recent {
            context.push_str(turn.role.label());
            context.push_str(": ");
            context.push_str(&turn.text);
            context.push('\n');
        }
        context
    }

    /// Every turn as `Speaker: text` lines.
    pub fn full_transcript(&self) -> String {
        self.session
            .turns
            .iter()
            .map(|turn| format!("{}: {}", turn.role.label(), turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Close the session: completed status, ended stage, end time.
    pub fn complete(&mut self) {
        let session = &mut self.session;
        session.business_state.call_status = CallStatus::Completed;
        session.call_stage = session.call_stage.advance(CallStage::Ended);
        if session.end_time.is_none() {
            let elapsed = self
                .clock
                .now()
                .saturating_duration_since(self.started);
            let elapsed = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
            session.end_time = Some(session.start_time + elapsed);
        }
    }

    pub fn entities(&self) -> &Entities {
        &self.session.entities
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn call_id(&self) -> &str {
        &self.session.call_id
    }

    pub fn export(&self) -> SessionExport {
        SessionExport {
            session: self.session.clone(),
            duration: self.session.duration_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn store_with_clock() -> (SessionStore, ManualClock) {
        let clock = ManualClock::new();
        let store = SessionStore::with_clock("call_test", ScoringRules::default(), Arc::new(clock.clone()));
        (store, clock)
    }

    fn metadata(value: serde_json::Value) -> TurnMetadata {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_new_call_id_format() {
        let id = new_call_id();
        let secs = id.strip_prefix("call_").unwrap();
        assert!(secs.parse::<i64>().unwrap() > 1_600_000_000);
    }

    #[test]
    fn test_turn_timestamps_follow_clock() {
        let (mut store, clock) = store_with_clock();
        clock.advance(Duration::from_millis(1500));
        store.add_user_turn("hi");
        clock.advance(Duration::from_secs(2));
        store.add_assistant_turn("hello", TurnMetadata::default());

        let turns = &store.session().turns;
        assert!((turns[0].timestamp - 1.5).abs() < 1e-9);
        assert!((turns[1].timestamp - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_budget_and_location_score_ten_and_stay_ten() {
        let (mut store, _clock) = store_with_clock();
        for _ in 0..3 {
            store.add_user_turn("My budget is 80 lakhs in Powai");
            store.add_assistant_turn(
                "Great, let me look.",
                metadata(json!({
                    "intent": "property_inquiry",
                    "sentiment": "positive",
                    "entities": {"budget": "80L", "location": "Powai"}
                })),
            );
        }
        let state = &store.session().business_state;
        assert_eq!(state.lead_score, 10);
        assert_eq!(state.budget.as_deref(), Some("80L"));
        assert_eq!(store.session().sentiment_timeline.len(), 3);
    }

    #[test]
    fn test_repeated_merges_leave_lists_unique() {
        let (mut store, _clock) = store_with_clock();
        let md = json!({
            "intent": "objection",
            "entities": {"property_id": "V002"},
            "action_items": ["send brochure"],
            "decisions": ["visit on Saturday"]
        });
        for _ in 0..4 {
            store.add_user_turn("It is a bit far");
            store.add_assistant_turn("I understand.", metadata(md.clone()));
        }
        let session = store.session();
        assert_eq!(session.action_items, vec!["send brochure"]);
        assert_eq!(session.decisions, vec!["visit on Saturday"]);
        assert_eq!(session.business_state.interested_property_ids, vec!["V002"]);
        assert_eq!(session.insights.properties_discussed, vec!["V002"]);
        assert_eq!(session.insights.objections, vec!["I understand."]);
        assert_eq!(session.turns.len(), 8);
    }

    #[test]
    fn test_objection_keeps_the_assistant_reply() {
        let (mut store, _clock) = store_with_clock();
        store.add_user_turn("It is too expensive");
        store.add_assistant_turn(
            "I understand the price concern, we have offers.",
            TurnMetadata::with_intent("objection", "negative"),
        );
        assert_eq!(
            store.session().insights.objections,
            vec!["I understand the price concern, we have offers."]
        );
    }

    #[test]
    fn test_lead_score_is_monotonic() {
        let (mut store, _clock) = store_with_clock();
        let steps = [
            json!({"entities": {"budget": "1Cr"}}),
            json!({"entities": {"location": "Andheri"}}),
            json!({"entities": {"budget": null, "location": ""}}),
            json!({"entities": {"site_visit_scheduled": true}}),
            json!({"entities": {"site_visit_scheduled": false}}),
        ];
        let mut last = 0;
        for step in steps {
            store.add_assistant_turn("ok", metadata(step));
            let score = store.session().business_state.lead_score;
            assert!(score >= last && score <= 100);
            last = score;
        }
        assert_eq!(last, 40);
    }

    #[test]
    fn test_context_for_prompt_format() {
        let (mut store, _clock) = store_with_clock();
        store.add_assistant_turn("Hello, how may I help?", TurnMetadata::default());
        store.add_user_turn("Looking for a flat");
        store.add_assistant_turn("Which area?", TurnMetadata::default());
        store.add_user_turn("Borivali");

        let context = store.context_for_prompt(2);
        assert_eq!(
            context,
            "Conversation summary: \n\nRecent exchanges:\nAssistant: Which area?\nUser: Borivali\n"
        );
        // Larger window than the log is fine
        assert!(store.context_for_prompt(10).contains("Assistant: Hello, how may I help?"));
    }

    #[test]
    fn test_context_for_prompt_is_pure() {
        let (mut store, _clock) = store_with_clock();
        store.add_user_turn("hi");
        let before = store.session().clone();
        let _ = store.context_for_prompt(3);
        assert_eq!(*store.session(), before);
    }

    #[test]
    fn test_summary_reflects_profile() {
        let (mut store, _clock) = store_with_clock();
        store.add_user_turn("I am Priya, 95 lakhs, Borivali");
        store.add_assistant_turn(
            "Thanks Priya",
            metadata(json!({
                "intent": "share_requirements",
                "sentiment": "positive",
                "entities": {"customer_name": "Priya", "budget": "95L", "location": "Borivali", "property_id": "F001"}
            })),
        );
        store.set_lead_stage(Some(LeadStage::Qualified));
        store.update_summary();

        let summary = &store.session().summary;
        assert!(summary.contains("- Name: Priya"));
        assert!(summary.contains("- Budget: 95L"));
        assert!(summary.contains("- Properties Discussed: F001"));
        assert!(summary.contains("- Lead Stage: qualified"));
        assert!(summary.contains("- Objections: none"));
    }

    #[test]
    fn test_set_lead_stage_none_keeps_previous() {
        let (mut store, _clock) = store_with_clock();
        store.set_lead_stage(Some(LeadStage::Hot));
        store.set_lead_stage(None);
        assert_eq!(store.session().business_state.lead_stage, Some(LeadStage::Hot));
    }

    #[test]
    fn test_stage_never_leaves_ended() {
        let (mut store, _clock) = store_with_clock();
        assert!(store.advance_stage(CallStage::Closing));
        assert!(!store.advance_stage(CallStage::Qualification));
        assert!(store.advance_stage(CallStage::Ended));
        assert!(!store.advance_stage(CallStage::Greeting));
        assert_eq!(store.session().call_stage, CallStage::Ended);
    }

    #[test]
    fn test_complete_sets_status_and_end_time() {
        let (mut store, clock) = store_with_clock();
        clock.advance(Duration::from_secs(90));
        store.complete();
        let session = store.session();
        assert_eq!(session.business_state.call_status, CallStatus::Completed);
        assert_eq!(session.call_stage, CallStage::Ended);
        assert!((session.duration_secs() - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_full_transcript_and_export() {
        let (mut store, _clock) = store_with_clock();
        store.add_assistant_turn("Hello", TurnMetadata::with_intent("greeting", "neutral"));
        store.add_user_turn("Hi there");
        store.record_interruption("Let me tell you about");

        assert_eq!(store.full_transcript(), "Assistant: Hello\nUser: Hi there");

        let json = serde_json::to_value(store.export()).unwrap();
        assert_eq!(json["call_id"], "call_test");
        assert_eq!(json["turns"].as_array().unwrap().len(), 2);
        assert_eq!(json["interruptions"][0]["text"], "Let me tell you about");
        assert_eq!(json["business_state"]["call_status"], "ongoing");
        assert!(json["duration"].is_number());
    }
}
