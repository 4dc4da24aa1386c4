//! Triage classification.
//!
//! Turns free-text symptoms into a RED/YELLOW/GREEN verdict. The model does
//! the reading; this module builds a deterministic prompt from the rule
//! library, parses the reply, and then escalates conservatively:
//!
//! 1. Start from the model's level (or nothing, if it answered `UNCLEAR`).
//! 2. Any rule whose keyword appears in the model's flags or literally in the
//!    input raises the level to at least that rule's level.
//! 3. An unclear reply that no rule escalated becomes a GREEN result carrying
//!    [`UNCLEAR_FLAG`] and a clarification message.
//!
//! There is no local fallback when the model is unreachable or unreadable:
//! that is [`Error::ClassificationFailed`]. Guessing GREEN without the model
//! could hide an emergency.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, instrument};

use crate::content::{ContentLibrary, FlagRule, TopicSummary};
use crate::error::{Error, GatewayError, Result};
use crate::gateway::{LanguageModel, null_as_default, parse_json, strip_code_fences};
use crate::model::{Language, TriageLevel, TriageResult, UNCLEAR_FLAG, check_symptom_text};

/// Marker identifying triage prompts.
pub const PROMPT_TAG: &str = "TASK: triage_classification";

/// What the model said, before rule escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelVerdict {
    Level(TriageLevel, Vec<String>),
    Unclear(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct VerdictReply {
    level: String,
    #[serde(default, deserialize_with = "null_as_default")]
    flags: Vec<String>,
}

/// Classifies symptom text into a [`TriageResult`].
pub struct TriageClassifier {
    gateway: Arc<dyn LanguageModel>,
    content: Arc<ContentLibrary>,
}

impl TriageClassifier {
    pub fn new(gateway: Arc<dyn LanguageModel>, content: Arc<ContentLibrary>) -> Self {
        Self { gateway, content }
    }

    /// Classify `text` written in `language`.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the text is outside 3..=500 characters (no model call)
    /// - `ClassificationFailed` if the model is unreachable, times out, or
    ///   replies with something that is not a verdict
    #[instrument(skip(self, text), fields(language = language.code(), chars = text.chars().count()))]
    pub async fn classify(&self, text: &str, language: Language) -> Result<TriageResult> {
        let text = check_symptom_text(text)?;

        let red = self.content.red_flag_rules(language);
        let yellow = self.content.yellow_flag_rules(language);
        let topics = self.content.approved_topics(language);
        let prompt = build_prompt(text, language, &red, &yellow, &topics);

        let raw = self
            .gateway
            .classify(&prompt)
            .await
            .map_err(Error::ClassificationFailed)?;
        let verdict = parse_verdict(&raw).map_err(Error::ClassificationFailed)?;

        let rules: Vec<&FlagRule> = red.into_iter().chain(yellow).collect();
        let result = resolve(verdict, text, language, &rules);

        info!(
            level = result.level.as_str(),
            flag_count = result.flags.len(),
            unclear = result.is_unclear(),
            "Triage classified"
        );
        Ok(result)
    }
}

fn format_rules(rules: &[&FlagRule]) -> String {
    if rules.is_empty() {
        return "- (none)".to_string();
    }
    rules
        .iter()
        .map(|r| format!("- {} (keywords: {})", r.description, r.keywords.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_topics(topics: &[TopicSummary]) -> String {
    if topics.is_empty() {
        return "- (none)".to_string();
    }
    topics
        .iter()
        .map(|t| format!("- {}: {}", t.topic_key, t.title))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(
    text: &str,
    language: Language,
    red: &[&FlagRule],
    yellow: &[&FlagRule],
    topics: &[TopicSummary],
) -> String {
    format!(
        r#"{PROMPT_TAG}
You are a cautious medical triage assistant. Classify the urgency of the symptoms below.

RED flags (emergency, seek care now):
{red}

YELLOW flags (see a health worker soon):
{yellow}

Approved self-care topics (GREEN is only appropriate for mild complaints like these):
{topics}

Rules:
- If any RED flag applies, the level is RED.
- Otherwise, if any YELLOW flag applies, the level is YELLOW.
- Otherwise, if the symptoms are mild and fit self-care, the level is GREEN.
- When unsure between two levels, choose the more urgent one.
- If the text does not describe symptoms you can assess, use level "UNCLEAR".
- "flags" lists the matched flag keywords or short symptom tags.

Respond ONLY with JSON: {{"level": "RED" | "YELLOW" | "GREEN" | "UNCLEAR", "flags": ["..."]}}

Input language: {language}
Symptoms:
"""{text}""""#,
        red = format_rules(red),
        yellow = format_rules(yellow),
        topics = format_topics(topics),
        language = language.name(),
    )
}

fn parse_verdict(raw: &str) -> Result<ModelVerdict, GatewayError> {
    // Some models answer the bare word instead of the JSON object
    let bare = strip_code_fences(raw).trim_matches(|c: char| c == '"' || c.is_whitespace());
    if bare.eq_ignore_ascii_case(UNCLEAR_FLAG) {
        return Ok(ModelVerdict::Unclear(Vec::new()));
    }

    let reply: VerdictReply = parse_json(raw)?;
    let flags = clean_flags(reply.flags);

    if reply.level.trim().eq_ignore_ascii_case(UNCLEAR_FLAG) {
        return Ok(ModelVerdict::Unclear(flags));
    }

    TriageLevel::parse(&reply.level)
        .map(|level| ModelVerdict::Level(level, flags))
        .ok_or_else(|| GatewayError::malformed(format!("unknown triage level '{}'", reply.level)))
}

fn clean_flags(flags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for flag in flags {
        let flag = flag.trim();
        if flag.is_empty() || flag.eq_ignore_ascii_case(UNCLEAR_FLAG) {
            continue;
        }
        if !cleaned.iter().any(|f| f.eq_ignore_ascii_case(flag)) {
            cleaned.push(flag.to_string());
        }
    }
    cleaned
}

/// Apply rule escalation to the model verdict.
fn resolve(
    verdict: ModelVerdict,
    text: &str,
    language: Language,
    rules: &[&FlagRule],
) -> TriageResult {
    let (mut level, mut flags) = match verdict {
        ModelVerdict::Level(level, flags) => (Some(level), flags),
        ModelVerdict::Unclear(flags) => (None, flags),
    };

    let flag_text = flags.join("\n");
    for rule in rules {
        let matched = rule
            .matching_keyword(text)
            .or_else(|| rule.matching_keyword(&flag_text));

        if let Some(keyword) = matched {
            level = Some(level.map_or(rule.level, |l| l.max(rule.level)));
            if !flags.iter().any(|f| f.eq_ignore_ascii_case(keyword)) {
                flags.push(keyword.to_string());
            }
        }
    }

    match level {
        Some(level) => TriageResult {
            level,
            flags,
            message: level_message(level, language).to_string(),
        },
        None => {
            flags.push(UNCLEAR_FLAG.to_string());
            TriageResult {
                level: TriageLevel::Green,
                flags,
                message: clarification_message(language).to_string(),
            }
        }
    }
}

fn level_message(level: TriageLevel, language: Language) -> &'static str {
    match (language, level) {
        (Language::En, TriageLevel::Red) => {
            "Your symptoms may be a medical emergency. Go to the nearest emergency department or call your local emergency number now."
        }
        (Language::En, TriageLevel::Yellow) => {
            "Your symptoms should be checked by a health worker. Watch them closely and visit a clinic within 24 hours, sooner if they get worse."
        }
        (Language::En, TriageLevel::Green) => {
            "Your symptoms appear mild. The self-care guidance below may help; see a health worker if they get worse or do not improve."
        }
        (Language::Am, TriageLevel::Red) => {
            "ምልክቶችዎ የድንገተኛ ህክምና ሁኔታን ሊያመለክቱ ይችላሉ። አሁኑኑ ወደ ቅርብ የድንገተኛ ህክምና ክፍል ይሂዱ ወይም የአደጋ ጊዜ ቁጥር ይደውሉ።"
        }
        (Language::Am, TriageLevel::Yellow) => {
            "ምልክቶችዎ በጤና ባለሙያ መታየት አለባቸው። በቅርበት ይከታተሏቸው፤ በ24 ሰዓት ውስጥ ወደ ጤና ተቋም ይሂዱ፣ ከባሱ ቶሎ ይሂዱ።"
        }
        (Language::Am, TriageLevel::Green) => {
            "ምልክቶችዎ ቀላል ይመስላሉ። ከታች ያሉት የራስ እንክብካቤ ምክሮች ሊረዱ ይችላሉ፤ ከባሱ ወይም ካልተሻሻሉ የጤና ባለሙያ ያማክሩ።"
        }
    }
}

fn clarification_message(language: Language) -> &'static str {
    match language {
        Language::En => {
            "We could not understand your symptoms well enough to assess them. Please describe what you feel, where, and for how long."
        }
        Language::Am => {
            "ምልክቶችዎን ለመገምገም በበቂ ሁኔታ መረዳት አልቻልንም። ምን እንደሚሰማዎት፣ የት እና ለምን ያህል ጊዜ እንደሆነ እባክዎ ይግለጹ።"
        }
    }
}
