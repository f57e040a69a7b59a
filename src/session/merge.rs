//! Per-field merge rules for assistant turn metadata.
//!
//! Each function touches one part of the session and is safe to call again
//! with the same input: repeated merges of the same facts change nothing.

use crate::defaults::MAX_LEAD_SCORE;
use crate::session::model::{
    BusinessState, Entities, Insights, ScoreLedger, ScoringRules, SentimentPoint,
};
use serde_json::Value;

/// Append `item` unless already present. Returns whether it was added.
pub fn push_unique(list: &mut Vec<String>, item: &str) -> bool {
    let item = item.trim();
    if item.is_empty() || list.iter().any(|existing| existing == item) {
        return false;
    }
    list.push(item.to_string());
    true
}

/// Append every new item of `items` in order.
pub fn extend_unique(list: &mut Vec<String>, items: &[String]) {
    for item in items {
        push_unique(list, item);
    }
}

/// Record a sentiment reading. Every reading is kept, repeats included.
pub fn append_sentiment(timeline: &mut Vec<SentimentPoint>, timestamp: f64, sentiment: Option<&str>) {
    if let Some(sentiment) = sentiment.map(str::trim).filter(|s| !s.is_empty()) {
        timeline.push(SentimentPoint {
            timestamp,
            sentiment: sentiment.to_string(),
        });
    }
}

/// Shallow merge, last write wins per key.
pub fn merge_entities(cumulative: &mut Entities, new: &Entities) {
    for (key, value) in new {
        cumulative.insert(key.clone(), value.clone());
    }
}

/// Text form of an entity value. Null and blank values carry no information.
pub fn entity_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(entity_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Every text item of a value that may be a single item or a list.
fn entity_items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(entity_text).collect(),
        other => entity_text(other).into_iter().collect(),
    }
}

fn entity_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "scheduled"),
        _ => false,
    }
}

/// Project known entity keys from one turn into the business state.
pub fn project_entities(state: &mut BusinessState, new: &Entities) {
    let fields: [(&str, &mut Option<String>); 6] = [
        ("customer_name", &mut state.customer_name),
        ("phone_number", &mut state.phone_number),
        ("budget", &mut state.budget),
        ("location", &mut state.location),
        ("configuration", &mut state.configuration),
        ("visit_date", &mut state.visit_date),
    ];
    for (key, field) in fields {
        if let Some(text) = new.get(key).and_then(entity_text) {
            *field = Some(text);
        }
    }

    if let Some(value) = new.get("property_id") {
        for id in entity_items(value) {
            push_unique(&mut state.interested_property_ids, &id);
        }
    }

    let visit_flag = new.get("site_visit_scheduled").is_some_and(entity_flag);
    if visit_flag || new.get("visit_date").and_then(entity_text).is_some() {
        state.site_visit_scheduled = true;
    }
}

/// Apply the one-shot lead score increments.
///
/// The qualification bonus is awarded the first time budget and location are
/// both known while the score is below it; the site visit bonus the first
/// time a visit is scheduled while the score is below both bonuses combined.
/// The score never decreases and never exceeds the maximum.
pub fn apply_lead_score(state: &mut BusinessState, ledger: &mut ScoreLedger, rules: &ScoringRules) {
    if !ledger.qualified_awarded && state.is_qualified() {
        ledger.qualified_awarded = true;
        if state.lead_score < rules.qualified_bonus {
            state.lead_score = add_capped(state.lead_score, rules.qualified_bonus);
        }
    }

    let visit_ceiling = rules.qualified_bonus.saturating_add(rules.site_visit_bonus);
    if !ledger.site_visit_awarded && state.site_visit_scheduled {
        ledger.site_visit_awarded = true;
        if state.lead_score < visit_ceiling {
            state.lead_score = add_capped(state.lead_score, rules.site_visit_bonus);
        }
    }
}

fn add_capped(score: u8, bonus: u8) -> u8 {
    score.saturating_add(bonus).min(MAX_LEAD_SCORE)
}

/// Update last intent/sentiment, objections and the properties discussed.
///
/// On an objection turn the assistant's `text` is what gets recorded.
pub fn update_insights(
    insights: &mut Insights,
    intent: Option<&str>,
    sentiment: Option<&str>,
    entities: &Entities,
    text: &str,
) {
    if let Some(intent) = intent.filter(|i| !i.trim().is_empty()) {
        insights.last_intent = Some(intent.to_string());
        if intent.trim().eq_ignore_ascii_case("objection") {
            push_unique(&mut insights.objections, text);
        }
    }
    if let Some(sentiment) = sentiment.filter(|s| !s.trim().is_empty()) {
        insights.last_sentiment = Some(sentiment.to_string());
    }
    if let Some(value) = entities.get("property_id") {
        for id in entity_items(value) {
            push_unique(&mut insights.properties_discussed, &id);
        }
    }
    for key in ["interest", "interests"] {
        if let Some(value) = entities.get(key) {
            for interest in entity_items(value) {
                push_unique(&mut insights.interests, &interest);
            }
        }
    }
}
