//! Prompt text for the reasoning and minutes models.

use crate::knowledge;
use crate::llm::reasoner::ReasoningRequest;
use crate::session::CallSession;
use serde::Serialize;

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Prompt for one reasoning call.
pub fn reasoning_prompt(request: &ReasoningRequest) -> String {
    let entities = serde_json::to_string(&request.entities).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"You are the core intelligence engine of a professional real estate voice assistant.

COMPANY CONTEXT:
{company}
{context}
Previously extracted entities:
{entities}

User message:
"{user_text}"

Analyze intent, entities, sentiment, lead seriousness and whether the call should end.

Lead stage definitions:
- new: basic inquiry, low seriousness
- qualified: budget and location known
- hot: strong buying intent or site visit request
- needs_followup: interested but hesitant
- closed: call completed successfully

Useful entity keys: customer_name, phone_number, budget, location, configuration,
property_id, visit_date, site_visit_scheduled, interest.

Return STRICT JSON ONLY:
{{
    "intent": "",
    "entities": {{}},
    "sentiment": "",
    "final_response": "",
    "lead_stage": "",
    "end_call": false,
    "action_items": [],
    "decisions": []
}}

Rules:
- Use company knowledge when answering about properties, loans or discounts.
- If the user shares budget and location, the lead is at least "qualified".
- If the user asks for a visit, the lead is "hot".
- If the user hesitates, use intent "objection" and stage "needs_followup".
- If the user clearly ends the call, set end_call to true.
- Keep final_response short and natural for a voice call.
- No markdown, no backticks, no text outside the JSON.
"#,
        company = knowledge::company_context(&request.user_text),
        context = request.context,
        entities = entities,
        user_text = request.user_text,
    )
}

/// Prompt for the minutes of meeting.
pub fn minutes_prompt(session: &CallSession, transcript: &str) -> String {
    format!(
        r#"You are a senior CRM documentation assistant for a large real estate company.

Generate professional Minutes of Meeting for the call below.

CALL METADATA
Company: {company}
Date: {date}
Duration: {duration:.2} minutes
Lead Score: {score}
Total Properties Available: {total}
Business State:
{state}

TRANSCRIPT
{transcript}

ACTION ITEMS
{actions}

DECISIONS
{decisions}

SENTIMENT TIMELINE
{sentiment}

INSTRUCTIONS
Create structured minutes with these sections:
1. Call Overview
2. Customer Requirements
3. Properties Discussed
4. Key Decisions
5. Action Items
6. Customer Sentiment Summary
7. Lead Qualification Assessment (Hot / Warm / Cold with reasoning)
8. Recommended Follow-up Action

Write in a professional corporate tone. Do NOT include markdown. Return plain structured text.
"#,
        company = knowledge::COMPANY.name,
        date = session.start_time.format("%Y-%m-%d %H:%M"),
        duration = session.duration_secs() / 60.0,
        score = session.business_state.lead_score,
        total = knowledge::PROPERTIES.len(),
        state = pretty(&session.business_state),
        transcript = transcript,
        actions = pretty(&session.action_items),
        decisions = pretty(&session.decisions),
        sentiment = pretty(&session.sentiment_timeline),
    )
}
