//! Reasoning and minutes-of-meeting services.

#[cfg(feature = "http")]
pub mod gemini;
pub mod minutes;
pub mod prompt;
pub mod reasoner;

#[cfg(feature = "http")]
pub use gemini::{GeminiClient, GeminiMinutes, GeminiReasoner};
pub use minutes::{LeadTemperature, MinutesGenerator, TemplateMinutes, minutes_or_template};
pub use reasoner::{
    Reasoner, ReasoningOutput, ReasoningRequest, ScriptedReasoner, parse_reasoning,
    reason_or_fallback,
};
