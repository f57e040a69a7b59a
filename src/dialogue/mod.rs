//! Conversation control for one call.

pub mod idle;
pub mod orchestrator;

pub use idle::{IdleConfig, IdleDecision, IdlePolicy};
pub use orchestrator::{
    CallOutcome, CallPhase, ControlEvent, DialogueOrchestrator, EndReason, OrchestratorConfig,
    TRANSCRIPT_TARGET,
};
