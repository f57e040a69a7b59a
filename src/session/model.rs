//! Call session data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Cumulative entity map, keyed by entity name.
pub type Entities = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Speaker label used in prompts and transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// Structured facts attached to an assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnMetadata {
    pub intent: Option<String>,
    pub sentiment: Option<String>,
    pub entities: Entities,
    pub action_items: Vec<String>,
    pub decisions: Vec<String>,
}

impl TurnMetadata {
    pub fn with_intent(intent: &str, sentiment: &str) -> Self {
        Self {
            intent: Some(intent.to_string()),
            sentiment: Some(sentiment.to_string()),
            ..Self::default()
        }
    }
}

/// One utterance in the call log. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Seconds since call start.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub entities: Entities,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<String>,
}

/// Business progress of the call. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallStage {
    #[default]
    Greeting,
    Qualification,
    Closing,
    Ended,
}

impl CallStage {
    /// Stage implied by one reasoning result, if any.
    pub fn implied_by(lead_stage: Option<LeadStage>, end_call: bool) -> Option<CallStage> {
        if end_call {
            return Some(CallStage::Ended);
        }
        match lead_stage {
            Some(LeadStage::Qualified) => Some(CallStage::Qualification),
            Some(LeadStage::Hot) => Some(CallStage::Closing),
            _ => None,
        }
    }

    /// The later of `self` and `next`.
    pub fn advance(self, next: CallStage) -> CallStage {
        self.max(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    #[default]
    Ongoing,
    Completed,
}

/// Lead seriousness as judged by the reasoning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStage {
    New,
    Qualified,
    Hot,
    NeedsFollowup,
    Closed,
}

impl LeadStage {
    /// Lenient parse of a model-provided label. Unknown labels yield `None`.
    pub fn parse(label: &str) -> Option<LeadStage> {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "new" => Some(LeadStage::New),
            "qualified" => Some(LeadStage::Qualified),
            "hot" => Some(LeadStage::Hot),
            "needs_followup" | "needs_follow_up" | "followup" => Some(LeadStage::NeedsFollowup),
            "closed" => Some(LeadStage::Closed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStage::New => "new",
            LeadStage::Qualified => "qualified",
            LeadStage::Hot => "hot",
            LeadStage::NeedsFollowup => "needs_followup",
            LeadStage::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LeadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the business knows about the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessState {
    pub customer_name: Option<String>,
    pub phone_number: Option<String>,
    pub budget: Option<String>,
    pub location: Option<String>,
    pub configuration: Option<String>,
    pub interested_property_ids: Vec<String>,
    pub site_visit_scheduled: bool,
    pub visit_date: Option<String>,
    pub lead_score: u8,
    pub lead_stage: Option<LeadStage>,
    pub call_status: CallStatus,
}

impl BusinessState {
    pub fn is_qualified(&self) -> bool {
        self.budget.is_some() && self.location.is_some()
    }
}

/// Conversation-level observations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Insights {
    pub objections: Vec<String>,
    pub interests: Vec<String>,
    pub properties_discussed: Vec<String>,
    pub last_intent: Option<String>,
    pub last_sentiment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentPoint {
    pub timestamp: f64,
    pub sentiment: String,
}

/// An assistant utterance cut off by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interruption {
    pub timestamp: f64,
    pub text: String,
}

/// One-shot lead score increments already applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreLedger {
    pub qualified_awarded: bool,
    pub site_visit_awarded: bool,
}

/// Lead score increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringRules {
    pub qualified_bonus: u8,
    pub site_visit_bonus: u8,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            qualified_bonus: crate::defaults::QUALIFIED_BONUS,
            site_visit_bonus: crate::defaults::SITE_VISIT_BONUS,
        }
    }
}

/// Everything recorded about one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub call_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub turns: Vec<Turn>,
    pub summary: String,
    pub action_items: Vec<String>,
    pub decisions: Vec<String>,
    pub sentiment_timeline: Vec<SentimentPoint>,
    pub entities: Entities,
    pub business_state: BusinessState,
    pub insights: Insights,
    pub call_stage: CallStage,
    pub interruptions: Vec<Interruption>,
    pub scoring: ScoreLedger,
}

impl CallSession {
    pub fn new(call_id: String, start_time: DateTime<Utc>) -> Self {
        Self {
            call_id,
            start_time,
            end_time: None,
            turns: Vec::new(),
            summary: String::new(),
            action_items: Vec::new(),
            decisions: Vec::new(),
            sentiment_timeline: Vec::new(),
            entities: Entities::new(),
            business_state: BusinessState::default(),
            insights: Insights::default(),
            call_stage: CallStage::Greeting,
            interruptions: Vec::new(),
            scoring: ScoreLedger::default(),
        }
    }

    /// Seconds between start and end (or the last turn while ongoing).
    pub fn duration_secs(&self) -> f64 {
        match self.end_time {
            Some(end) => (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0,
            None => self.turns.last().map(|t| t.timestamp).unwrap_or(0.0),
        }
    }
}
