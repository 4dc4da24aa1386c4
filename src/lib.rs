//! Tena - Symptom triage and self-care guidance.
//!
//! # Overview
//!
//! Tena turns a free-text symptom description (English or Amharic) into:
//!
//! - a RED/YELLOW/GREEN triage verdict that escalates conservatively and
//!   never guesses when the language model is unavailable
//! - a self-care guidance card drawn only from approved content
//! - a short guided conversation of five follow-up questions that ends in a
//!   structured health report
//!
//! The language model is reached through one narrow capability,
//! [`gateway::LanguageModel`]. Every reply is treated as untrusted text.
//!
//! # Modules
//!
//! - [`model`]: Conversations, questions, reports, triage results, HTTP bodies
//! - [`error`]: Error taxonomy and HTTP status mapping
//! - [`gateway`]: Language-model capability and provider adapters
//! - [`content`]: Immutable flag rules and approved topic content
//! - [`triage`]: Triage classifier
//! - [`topics`]: Closed topic enumeration and topic mapper
//! - [`guidance`]: Guidance card composer
//! - [`conversation`]: Question generation, validation, reports, state machine
//! - [`storage`]: SQLite conversation store
//! - [`reaper`]: Background expiry of stale conversations
//! - [`config`]: Environment configuration
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod config;
pub mod content;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod guidance;
pub mod model;
pub mod reaper;
pub mod storage;
pub mod topics;
pub mod triage;

pub use error::{Error, Result};
