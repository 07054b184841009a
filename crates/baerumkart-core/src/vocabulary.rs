//! Keyword and pattern tables that drive classification and intent tracking.
//!
//! The defaults are the Norwegian rule set the assistant ships with. A
//! `rules.yaml` next to `main.yaml` can override any table; fields left out
//! keep their default.

use anyhow::{Context, Result};
use baerumkart_schema::Intent;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TRIP_KEYWORDS: &[&str] = &[
    "tur",
    "telt",
    "bål",
    "fottur",
    "sykkeltur",
    "camping",
    "utendørs",
    "utsiktspunkt",
    "skitur",
    "overnatting",
    "utstyr",
    "tid",
    "lang",
];

pub const DEFAULT_FOLLOW_UP_PATTERN: &str = r"anbefale|fortell (meg )?(mer|mre)|hva (med|er)|hvor";

pub const DEFAULT_REGION_NAMES: &[&str] = &["bærum", "baerum"];

pub const DEFAULT_TRIP_TYPES: &[&str] = &[
    "teltur",
    "fottur",
    "sykkeltur",
    "bål",
    "utsiktspunkt",
    "skitur",
    "camping",
];

pub const GENERIC_TRIP_TYPE: &str = "tur";

pub const DEFAULT_KNOWN_TOPICS: &[&str] = &[
    "kolsåstoppen",
    "fossum teltplass",
    "brunkollen",
    "bærumsmarka bålplass",
];

const DEFAULT_INTENT_RULES: &[(Intent, &str)] = &[
    (Intent::Recommend, "anbefale"),
    (Intent::Info, "fortell meg (mer|mre)|hva med|om området"),
    (Intent::Equipment, "utstyr|pakke|klær|fottøy|mat|overnatte"),
    (Intent::Duration, "hvor lang|tid|estimere"),
    (Intent::Parking, "parkering"),
];

/// Serialized form of the rule tables (`rules.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub trip_keywords: Option<Vec<String>>,
    #[serde(default)]
    pub follow_up_pattern: Option<String>,
    #[serde(default)]
    pub region_names: Option<Vec<String>>,
    #[serde(default)]
    pub trip_types: Option<Vec<String>>,
    #[serde(default)]
    pub known_topics: Option<Vec<String>>,
    /// Evaluated in order; first match wins, no match means `general`.
    #[serde(default)]
    pub intent_rules: Option<Vec<IntentRuleConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRuleConfig {
    pub intent: Intent,
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub struct IntentRule {
    pub intent: Intent,
    pub pattern: Regex,
}

/// Compiled rule tables. All matching is done on lowercased text.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    pub trip_keywords: Vec<String>,
    pub follow_up: Regex,
    pub region_names: Vec<String>,
    pub trip_types: Vec<String>,
    pub known_topics: Vec<String>,
    pub intent_rules: Vec<IntentRule>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn lowered(items: Vec<String>) -> Vec<String> {
    items.into_iter().map(|s| s.to_lowercase()).collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            trip_keywords: owned(DEFAULT_TRIP_KEYWORDS),
            follow_up: Regex::new(DEFAULT_FOLLOW_UP_PATTERN).expect("valid follow-up pattern"),
            region_names: owned(DEFAULT_REGION_NAMES),
            trip_types: owned(DEFAULT_TRIP_TYPES),
            known_topics: owned(DEFAULT_KNOWN_TOPICS),
            intent_rules: DEFAULT_INTENT_RULES
                .iter()
                .map(|(intent, pattern)| IntentRule {
                    intent: *intent,
                    pattern: Regex::new(pattern).expect("valid intent pattern"),
                })
                .collect(),
        }
    }
}

impl Vocabulary {
    /// Build from `rules.yaml` content, falling back to defaults per table.
    pub fn from_rules(rules: &RulesConfig) -> Result<Self> {
        let mut vocab = Self::default();

        if let Some(keywords) = &rules.trip_keywords {
            vocab.trip_keywords = lowered(keywords.clone());
        }
        if let Some(pattern) = &rules.follow_up_pattern {
            vocab.follow_up = Regex::new(pattern)
                .with_context(|| format!("invalid follow_up_pattern: {pattern}"))?;
        }
        if let Some(regions) = &rules.region_names {
            vocab.region_names = lowered(regions.clone());
        }
        if let Some(types) = &rules.trip_types {
            vocab.trip_types = lowered(types.clone());
        }
        if let Some(topics) = &rules.known_topics {
            vocab.known_topics = lowered(topics.clone());
        }
        if let Some(intent_rules) = &rules.intent_rules {
            vocab.intent_rules = intent_rules
                .iter()
                .map(|rule| {
                    Ok(IntentRule {
                        intent: rule.intent,
                        pattern: Regex::new(&rule.pattern).with_context(|| {
                            format!("invalid pattern for intent {}: {}", rule.intent.as_str(), rule.pattern)
                        })?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }

        Ok(vocab)
    }

    pub fn is_trip_related(&self, lower: &str) -> bool {
        self.trip_keywords.iter().any(|k| lower.contains(k.as_str())) || self.follow_up.is_match(lower)
    }

    pub fn mentions_region(&self, lower: &str) -> bool {
        self.region_names.iter().any(|r| lower.contains(r.as_str()))
    }

    /// First trip type contained in the message, else the generic `tur`.
    pub fn trip_type(&self, lower: &str) -> String {
        self.trip_types
            .iter()
            .find(|t| lower.contains(t.as_str()))
            .cloned()
            .unwrap_or_else(|| GENERIC_TRIP_TYPE.to_string())
    }

    pub fn known_topic(&self, lower: &str) -> Option<&str> {
        self.known_topics
            .iter()
            .find(|t| lower.contains(t.as_str()))
            .map(String::as_str)
    }

    pub fn intent(&self, lower: &str) -> Intent {
        self.intent_rules
            .iter()
            .find(|rule| rule.pattern.is_match(lower))
            .map(|rule| rule.intent)
            .unwrap_or(Intent::General)
    }
}
