//! Rule and content library.
//!
//! Red/yellow flag rules and approved topic content, loaded once at startup
//! and never written afterwards. The library is an ordinary value: build it in
//! `main`, wrap it in an `Arc`, and hand it to the triage classifier and the
//! guidance composer. It is safe for unsynchronized concurrent reads.
//!
//! # Files
//!
//! A content directory holds three JSON files:
//!
//! - `red_flags.json`: array of [`FlagRule`] with `"level": "RED"`
//! - `yellow_flags.json`: array of [`FlagRule`] with `"level": "YELLOW"`
//! - `topics.json`: array of [`TopicEntry`]

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, ensure};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Language, TriageLevel};
use crate::topics::TopicKey;

/// A keyword rule steering triage prompts and escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRule {
    pub id: String,

    /// Lowercase phrases; a rule matches when any keyword appears in the text.
    pub keywords: Vec<String>,

    pub language: Language,

    pub level: TriageLevel,

    pub description: String,
}

impl FlagRule {
    /// The first keyword contained in `text`, compared case-insensitively.
    pub fn matching_keyword(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.keywords
            .iter()
            .find(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
            .map(String::as_str)
    }
}

/// One language version of a topic's guidance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicTranslation {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub self_care: Vec<String>,
    #[serde(default)]
    pub over_the_counter: Vec<String>,
    #[serde(default)]
    pub seek_care_when: Vec<String>,
    #[serde(default)]
    pub disclaimer: Option<String>,
}

/// A guidance topic with its translations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicEntry {
    pub topic_key: TopicKey,

    /// Only approved topics are ever shown to users.
    #[serde(default)]
    pub approved: bool,

    pub translations: HashMap<Language, TopicTranslation>,
}

/// Short description of an approved topic, embedded in triage prompts.
#[derive(Debug, Clone, Serialize)]
pub struct TopicSummary {
    pub topic_key: TopicKey,
    pub title: String,
    pub summary: String,
}

/// Immutable rule and topic library.
#[derive(Debug, Clone, Default)]
pub struct ContentLibrary {
    rules: Vec<FlagRule>,
    topics: Vec<TopicEntry>,
}

impl ContentLibrary {
    pub fn new(rules: Vec<FlagRule>, topics: Vec<TopicEntry>) -> Self {
        Self { rules, topics }
    }

    /// Load and check the three content files under `dir`.
    pub fn load_dir(dir: &Path) -> anyhow::Result<Self> {
        let red: Vec<FlagRule> = read_json(&dir.join("red_flags.json"))?;
        let yellow: Vec<FlagRule> = read_json(&dir.join("yellow_flags.json"))?;
        let topics: Vec<TopicEntry> = read_json(&dir.join("topics.json"))?;

        for rule in &red {
            ensure!(
                rule.level == TriageLevel::Red,
                "red_flags.json rule '{}' has level {}",
                rule.id,
                rule.level.as_str()
            );
        }
        for rule in &yellow {
            ensure!(
                rule.level == TriageLevel::Yellow,
                "yellow_flags.json rule '{}' has level {}",
                rule.id,
                rule.level.as_str()
            );
        }

        let mut rules = red;
        rules.extend(yellow);
        Ok(Self::new(rules, topics))
    }

    /// Rules for one language and level.
    pub fn rules_by_language_and_level(
        &self,
        language: Language,
        level: TriageLevel,
    ) -> Vec<&FlagRule> {
        self.rules
            .iter()
            .filter(|r| r.language == language && r.level == level)
            .collect()
    }

    pub fn red_flag_rules(&self, language: Language) -> Vec<&FlagRule> {
        self.rules_by_language_and_level(language, TriageLevel::Red)
    }

    pub fn yellow_flag_rules(&self, language: Language) -> Vec<&FlagRule> {
        self.rules_by_language_and_level(language, TriageLevel::Yellow)
    }

    /// Approved content for `topic` in `language`.
    ///
    /// # Errors
    ///
    /// - `TopicNotFound` if the topic has no approved entry
    /// - `LanguageNotAvailable` if the entry lacks this translation
    pub fn approved_topic_content(
        &self,
        topic: TopicKey,
        language: Language,
    ) -> Result<&TopicTranslation> {
        let entry = self
            .topics
            .iter()
            .find(|t| t.approved && t.topic_key == topic)
            .ok_or_else(|| Error::TopicNotFound(topic.as_str().to_string()))?;

        entry
            .translations
            .get(&language)
            .ok_or_else(|| Error::LanguageNotAvailable {
                topic: topic.as_str().to_string(),
                language: language.code().to_string(),
            })
    }

    /// Approved topics translated into `language`, in file order.
    pub fn approved_topics(&self, language: Language) -> Vec<TopicSummary> {
        self.topics
            .iter()
            .filter(|t| t.approved)
            .filter_map(|t| {
                t.translations.get(&language).map(|tr| TopicSummary {
                    topic_key: t.topic_key,
                    title: tr.title.clone(),
                    summary: tr.summary.clone(),
                })
            })
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
