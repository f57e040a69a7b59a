//! Minutes of meeting for a finished call.

use crate::error::Result;
use crate::knowledge;
use crate::session::{CallSession, LeadStage};
use async_trait::async_trait;

#[async_trait]
pub trait MinutesGenerator: Send + Sync {
    async fn generate(&self, session: &CallSession, transcript: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Plain-text minutes built directly from the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateMinutes;

/// Lead temperature used in the qualification assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadTemperature {
    Hot,
    Warm,
    Cold,
}

impl LeadTemperature {
    pub fn assess(session: &CallSession) -> Self {
        let state = &session.business_state;
        if state.site_visit_scheduled || state.lead_stage == Some(LeadStage::Hot) {
            LeadTemperature::Hot
        } else if state.is_qualified()
            || matches!(
                state.lead_stage,
                Some(LeadStage::Qualified | LeadStage::NeedsFollowup)
            )
        {
            LeadTemperature::Warm
        } else {
            LeadTemperature::Cold
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LeadTemperature::Hot => "Hot",
            LeadTemperature::Warm => "Warm",
            LeadTemperature::Cold => "Cold",
        }
    }
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("Not provided")
}

fn bullet_list(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        return format!("- {}", empty);
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn properties_section(session: &CallSession) -> String {
    let mut ids: Vec<String> = session.insights.properties_discussed.clone();
    for id in &session.business_state.interested_property_ids {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    let lines: Vec<String> = ids
        .iter()
        .map(|id| match knowledge::find_property(id) {
            Some(p) => format!("{} ({}, {}, {})", p.id, p.kind, p.location, p.price),
            None => id.clone(),
        })
        .collect();
    bullet_list(&lines, "No specific property discussed")
}

fn sentiment_section(session: &CallSession) -> String {
    let timeline = &session.sentiment_timeline;
    if timeline.is_empty() {
        return "No sentiment recorded.".to_string();
    }
    let path: Vec<&str> = timeline.iter().map(|p| p.sentiment.as_str()).collect();
    let last = path.last().copied().unwrap_or("neutral");
    format!("Sentiment moved {} and ended {}.", path.join(" -> "), last)
}

fn follow_up(session: &CallSession, temperature: LeadTemperature) -> String {
    let state = &session.business_state;
    if state.site_visit_scheduled {
        match &state.visit_date {
            Some(date) => format!("Confirm the site visit on {} and share directions.", date),
            None => "Confirm the site visit date and share directions.".to_string(),
        }
    } else {
        match temperature {
            LeadTemperature::Hot | LeadTemperature::Warm => {
                "Call back within 24 hours with matching listings.".to_string()
            }
            LeadTemperature::Cold => "Send the brochure and check in next week.".to_string(),
        }
    }
}

impl TemplateMinutes {
    pub fn render(&self, session: &CallSession) -> String {
        let state = &session.business_state;
        let temperature = LeadTemperature::assess(session);
        let lead_stage = state.lead_stage.map(LeadStage::as_str).unwrap_or("new");

        format!(
            "MINUTES OF MEETING\n\
             Company: {company}\n\
             Call ID: {call_id}\n\
             Date: {date}\n\
             Duration: {duration:.2} minutes\n\
             \n\
             1. CALL OVERVIEW\n\
             {turns} turns exchanged. Final call stage: {stage:?}. Interruptions: {interruptions}.\n\
             \n\
             2. CUSTOMER REQUIREMENTS\n\
             - Name: {name}\n\
             - Phone: {phone}\n\
             - Budget: {budget}\n\
             - Location: {location}\n\
             - Configuration: {configuration}\n\
             - Interests: {interests}\n\
             \n\
             3. PROPERTIES DISCUSSED\n\
             {properties}\n\
             \n\
             4. KEY DECISIONS\n\
             {decisions}\n\
             \n\
             5. ACTION ITEMS\n\
             {actions}\n\
             \n\
             6. CUSTOMER SENTIMENT SUMMARY\n\
             {sentiment}\n\
             \n\
             7. LEAD QUALIFICATION ASSESSMENT\n\
             {temperature} lead. Lead stage: {lead_stage}. Lead score: {score}/100.\n\
             \n\
             8. RECOMMENDED FOLLOW-UP ACTION\n\
             {follow_up}\n",
            company = knowledge::COMPANY.name,
            call_id = session.call_id,
            date = session.start_time.format("%Y-%m-%d %H:%M UTC"),
            duration = session.duration_secs() / 60.0,
            turns = session.turns.len(),
            stage = session.call_stage,
            interruptions = session.interruptions.len(),
            name = or_unknown(&state.customer_name),
            phone = or_unknown(&state.phone_number),
            budget = or_unknown(&state.budget),
            location = or_unknown(&state.location),
            configuration = or_unknown(&state.configuration),
            interests = if session.insights.interests.is_empty() {
                "None noted".to_string()
            } else {
                session.insights.interests.join(", ")
            },
            properties = properties_section(session),
            decisions = bullet_list(&session.decisions, "None recorded"),
            actions = bullet_list(&session.action_items, "None recorded"),
            sentiment = sentiment_section(session),
            temperature = temperature.label(),
            lead_stage = lead_stage,
            score = state.lead_score,
            follow_up = follow_up(session, temperature),
        )
    }
}

#[async_trait]
impl MinutesGenerator for TemplateMinutes {
    async fn generate(&self, session: &CallSession, _transcript: &str) -> Result<String> {
        Ok(self.render(session))
    }

    fn name(&self) -> &str {
        "template"
    }
}

/// Generate minutes, falling back to the template on failure.
pub async fn minutes_or_template(
    generator: &dyn MinutesGenerator,
    session: &CallSession,
    transcript: &str,
) -> String {
    match generator.generate(session, transcript).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!(generator = generator.name(), "Minutes came back empty, using template");
            TemplateMinutes.render(session)
        }
        Err(e) => {
            tracing::warn!(generator = generator.name(), "Minutes generation failed, using template: {}", e);
            TemplateMinutes.render(session)
        }
    }
}
