use crate::defaults;
use crate::error::{LeadlineError, Result};
use crate::session::{Entities, LeadStage, TurnMetadata};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Input for one reasoning call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningRequest {
    /// The caller's latest utterance.
    pub user_text: String,
    /// Rolling summary plus the most recent exchanges.
    pub context: String,
    /// Entities extracted so far in the call.
    pub entities: Entities,
}

/// Structured result of one reasoning call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningOutput {
    pub intent: String,
    pub sentiment: String,
    pub entities: Entities,
    pub response: String,
    /// `None` leaves the recorded lead stage unchanged.
    pub lead_stage: Option<LeadStage>,
    pub end_call: bool,
    pub action_items: Vec<String>,
    pub decisions: Vec<String>,
}

impl ReasoningOutput {
    /// Result used whenever reasoning fails or returns nothing usable.
    pub fn fallback() -> Self {
        Self {
            intent: "unknown".to_string(),
            sentiment: "neutral".to_string(),
            entities: Entities::new(),
            response: defaults::REASONING_FALLBACK.to_string(),
            lead_stage: None,
            end_call: false,
            action_items: Vec::new(),
            decisions: Vec::new(),
        }
    }

    pub fn metadata(&self) -> TurnMetadata {
        TurnMetadata {
            intent: Some(self.intent.clone()),
            sentiment: Some(self.sentiment.clone()),
            entities: self.entities.clone(),
            action_items: self.action_items.clone(),
            decisions: self.decisions.clone(),
        }
    }
}

/// Trait for the reasoning service.
///
/// Implementations return the raw model text; [`parse_reasoning`] turns it
/// into a [`ReasoningOutput`].
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, request: &ReasoningRequest) -> Result<String>;

    fn name(&self) -> &str;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReasoning {
    intent: Option<String>,
    sentiment: Option<String>,
    entities: Option<Value>,
    final_response: Option<String>,
    lead_stage: Option<String>,
    end_call: Option<Value>,
    action_items: Option<Value>,
    decisions: Option<Value>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes"),
        _ => false,
    }
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Parse raw model output.
///
/// Takes the text from the first `{` to the last `}`, so surrounding prose
/// or code fences are ignored. A missing or empty response is replaced with a
/// clarification request.
pub fn parse_reasoning(raw: &str) -> Result<ReasoningOutput> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            return Err(LeadlineError::ReasoningParse {
                message: "no JSON object in reasoning output".to_string(),
            });
        }
    };

    let parsed: RawReasoning =
        serde_json::from_str(json).map_err(|e| LeadlineError::ReasoningParse {
            message: e.to_string(),
        })?;

    let entities = match parsed.entities {
        Some(Value::Object(map)) => map,
        _ => Entities::new(),
    };

    Ok(ReasoningOutput {
        intent: non_blank(parsed.intent).unwrap_or_else(|| "unknown".to_string()),
        sentiment: non_blank(parsed.sentiment).unwrap_or_else(|| "neutral".to_string()),
        entities,
        response: non_blank(parsed.final_response)
            .unwrap_or_else(|| defaults::EMPTY_RESPONSE_FALLBACK.to_string()),
        lead_stage: parsed.lead_stage.as_deref().and_then(LeadStage::parse),
        end_call: parsed.end_call.as_ref().is_some_and(truthy),
        action_items: string_list(parsed.action_items),
        decisions: string_list(parsed.decisions),
    })
}

/// Run one reasoning call, substituting the fallback on any failure.
pub async fn reason_or_fallback(reasoner: &dyn Reasoner, request: &ReasoningRequest) -> ReasoningOutput {
    let outcome = match reasoner.reason(request).await {
        Ok(raw) => parse_reasoning(&raw),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(reasoner = reasoner.name(), "Reasoning failed, using fallback: {}", e);
            ReasoningOutput::fallback()
        }
    }
}

const DEFAULT_SCRIPTED_REPLY: &str = r#"{"intent": "inquiry", "sentiment": "neutral", "entities": {}, "final_response": "Could you tell me a little more about what you are looking for?", "lead_stage": "new", "end_call": false}"#;

/// Reasoner that replays canned replies in order.
///
/// Used by tests and by offline simulation. Once the script runs out every
/// call gets a generic follow-up question.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ReasoningRequest>>,
    should_fail: bool,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(self, replies: &[&str]) -> Self {
        if let Ok(mut queue) = self.replies.lock() {
            queue.extend(replies.iter().map(|r| r.to_string()));
        }
        self
    }

    /// Queue replies given as JSON values.
    pub fn with_values(self, values: Vec<Value>) -> Self {
        if let Ok(mut queue) = self.replies.lock() {
            queue.extend(values.into_iter().map(|v| v.to_string()));
        }
        self
    }

    /// Load a script: a JSON array of reasoning objects.
    pub fn from_script(script: &str) -> Result<Self> {
        let values: Vec<Value> =
            serde_json::from_str(script).map_err(|e| LeadlineError::ConfigParse {
                message: format!("invalid reasoning script: {}", e),
            })?;
        Ok(Self::new().with_values(values))
    }

    /// Configure the reasoner to fail on every call
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Every request received, in call order
    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason(&self, request: &ReasoningRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if self.should_fail {
            return Err(LeadlineError::Reasoning {
                message: "scripted reasoning failure".to_string(),
            });
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        Ok(next.unwrap_or_else(|| DEFAULT_SCRIPTED_REPLY.to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_extracts_outermost_object() {
        let raw = "Sure, here it is:\n```json\n{\"intent\": \"inquiry\", \"entities\": {\"budget\": \"80L\"}, \"sentiment\": \"positive\", \"final_response\": \"Great!\", \"lead_stage\": \"qualified\", \"end_call\": false}\n```";
        let output = parse_reasoning(raw).unwrap();
        assert_eq!(output.intent, "inquiry");
        assert_eq!(output.sentiment, "positive");
        assert_eq!(output.entities["budget"], "80L");
        assert_eq!(output.response, "Great!");
        assert_eq!(output.lead_stage, Some(LeadStage::Qualified));
        assert!(!output.end_call);
    }

    #[test]
    fn test_parse_empty_response_asks_for_clarification() {
        let output = parse_reasoning(r#"{"intent": "inquiry", "final_response": "  "}"#).unwrap();
        assert_eq!(output.response, "Could you please clarify that?");
        assert_eq!(output.sentiment, "neutral");
        assert_eq!(output.lead_stage, None);
    }

    #[test]
    fn test_parse_rejects_text_without_json() {
        assert!(matches!(
            parse_reasoning("I cannot help with that."),
            Err(LeadlineError::ReasoningParse { .. })
        ));
        assert!(parse_reasoning("} backwards {").is_err());
        assert!(parse_reasoning("{ not json }").is_err());
    }

    #[test]
    fn test_parse_lenient_fields() {
        let output = parse_reasoning(
            r#"{"intent": "closing", "final_response": "Bye", "end_call": "true", "lead_stage": "needs followup", "entities": "none", "action_items": ["Send brochure", "", "Call back"], "decisions": "Visit on Saturday"}"#,
        )
        .unwrap();
        assert!(output.end_call);
        assert_eq!(output.lead_stage, Some(LeadStage::NeedsFollowup));
        assert!(output.entities.is_empty());
        assert_eq!(output.action_items, vec!["Send brochure", "Call back"]);
        assert_eq!(output.decisions, vec!["Visit on Saturday"]);
    }

    #[test]
    fn test_fallback_values() {
        let fallback = ReasoningOutput::fallback();
        assert_eq!(fallback.intent, "unknown");
        assert_eq!(fallback.sentiment, "neutral");
        assert_eq!(
            fallback.response,
            "I'm sorry, I am facing a temporary issue. Could you please repeat that?"
        );
        assert_eq!(fallback.lead_stage, None);
        assert!(!fallback.end_call);
    }

    #[tokio::test]
    async fn test_reason_or_fallback_on_failure() {
        let reasoner = ScriptedReasoner::new().with_failure();
        let output = reason_or_fallback(&reasoner, &ReasoningRequest::default()).await;
        assert_eq!(output, ReasoningOutput::fallback());
    }

    #[tokio::test]
    async fn test_reason_or_fallback_on_garbage() {
        let reasoner = ScriptedReasoner::new().with_replies(&["the model rambled"]);
        let output = reason_or_fallback(&reasoner, &ReasoningRequest::default()).await;
        assert_eq!(output, ReasoningOutput::fallback());
    }

    #[tokio::test]
    async fn test_scripted_reasoner_replays_in_order() {
        let reasoner = ScriptedReasoner::new().with_values(vec![
            json!({"intent": "greeting", "final_response": "Hello"}),
            json!({"intent": "inquiry", "final_response": "Sure"}),
        ]);
        let request = ReasoningRequest {
            user_text: "hi".to_string(),
            ..ReasoningRequest::default()
        };
        assert_eq!(reason_or_fallback(&reasoner, &request).await.response, "Hello");
        assert_eq!(reason_or_fallback(&reasoner, &request).await.response, "Sure");
        let generic = reason_or_fallback(&reasoner, &request).await;
        assert!(generic.response.starts_with("Could you tell me"));
        assert_eq!(reasoner.requests().len(), 3);
        assert_eq!(reasoner.requests()[0].user_text, "hi");
    }

    #[test]
    fn test_from_script_requires_array() {
        let reasoner = ScriptedReasoner::from_script(r#"[{"final_response": "One"}]"#).unwrap();
        assert_eq!(reasoner.replies.lock().unwrap().len(), 1);
        assert!(ScriptedReasoner::from_script(r#"{"final_response": "One"}"#).is_err());
    }

    #[test]
    fn test_metadata_carries_turn_facts() {
        let mut output = ReasoningOutput::fallback();
        output.action_items = vec!["Share brochure".to_string()];
        let metadata = output.metadata();
        assert_eq!(metadata.intent.as_deref(), Some("unknown"));
        assert_eq!(metadata.action_items, vec!["Share brochure"]);
    }
}
