//! Per-call session state: the turn log plus everything derived from it.

pub mod export;
pub mod merge;
pub mod model;
pub mod store;

pub use export::{FileSessionPersister, SessionPersister};
pub use model::{
    BusinessState, CallSession, CallStage, CallStatus, Entities, Insights, Interruption,
    LeadStage, Role, ScoreLedger, ScoringRules, SentimentPoint, Turn, TurnMetadata,
};
pub use store::{SessionExport, SessionStore, new_call_id};
