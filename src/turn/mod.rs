//! Turn taking: utterance boundaries and barge-in.

pub mod controller;

pub use controller::{SpeechCanceller, TurnAction, TurnController, TurnStep, Utterance};
