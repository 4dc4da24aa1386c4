//! Guided symptom conversations.
//!
//! - [`questions`]: the five follow-up questions, with built-in fallbacks
//! - [`validation`]: answer and opening-symptom checks (fail open)
//! - [`report`]: final health report (fail closed)
//! - [`remedy`]: best-effort triage and guidance attached to the report
//! - [`engine`]: the state machine tying them to the conversation store

pub mod engine;
pub mod questions;
pub mod remedy;
pub mod report;
pub mod validation;

pub use engine::ConversationEngine;
pub use remedy::RemedyPipeline;
