//! Activation payload parsing.
//!
//! Deep links carry a start payload such as
//! `guide__utm_source=instagram__utm_medium=social__ref=1001`: the head selects
//! the funnel and every `__key=value` segment after it is an attribution field.

use serde::{Deserialize, Serialize};

const SEGMENT_DELIMITER: &str = "__";
const FUNNEL_PREFIX: &str = "guide";

/// Campaign attribution attached to a visitor session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub source: String,
    pub medium: String,
    pub campaign: String,
    pub content: String,
    pub term: String,
    /// Visitor id of whoever shared the link
    pub referrer: Option<i64>,
}

impl Attribution {
    pub fn is_empty(&self) -> bool {
        self == &Attribution::default()
    }

    /// Referrer id, unless it is the visitor's own id
    pub fn referrer_for(&self, visitor_id: i64) -> Option<i64> {
        self.referrer.filter(|referrer| *referrer != visitor_id)
    }

    fn set(&mut self, key: &str, value: &str) {
        let key = key.trim().to_lowercase();
        let value = value.trim();
        let key = key.strip_prefix("utm_").unwrap_or(&key);
        match key {
            "source" => self.source = value.to_string(),
            "medium" => self.medium = value.to_string(),
            "campaign" => self.campaign = value.to_string(),
            "content" => self.content = value.to_string(),
            "term" => self.term = value.to_string(),
            "ref" | "referrer" => self.referrer = value.parse().ok(),
            _ => {}
        }
    }
}

/// A parsed deep-link activation
#[derive(Clone, Debug, PartialEq)]
pub struct Activation {
    pub attribution: Attribution,
    pub raw: String,
}

/// Parse the attribution segments of a start payload.
///
/// The first segment is the funnel selector and is not inspected here.
pub fn parse_attribution(payload: &str) -> Attribution {
    let mut attribution = Attribution::default();
    for segment in payload.split(SEGMENT_DELIMITER).skip(1) {
        if let Some((key, value)) = segment.split_once('=') {
            attribution.set(key, value);
        }
    }
    attribution
}

/// Returns the activation when the payload selects the guide funnel.
///
/// The head segment must start with `guide` or equal one of the localized
/// keywords (compared case-insensitively).
pub fn parse_activation(payload: &str, keywords: &[String]) -> Option<Activation> {
    let raw = payload.trim();
    let head = raw.split(SEGMENT_DELIMITER).next()?.to_lowercase();
    if head.is_empty() {
        return None;
    }
    if !head.starts_with(FUNNEL_PREFIX) && !keywords.iter().any(|keyword| *keyword == head) {
        return None;
    }

    Some(Activation {
        attribution: parse_attribution(raw),
        raw: raw.to_string(),
    })
}

/// Whether free text mentions one of the activation keywords
pub fn mentions_keyword(text: &str, keywords: &[String]) -> bool {
    let lowered = text.to_lowercase();
    keywords.iter().any(|keyword| lowered.contains(keyword.as_str()))
}

/// Deep link that starts the funnel
pub fn deep_link(bot_username: &str) -> String {
    format!("https://t.me/{bot_username}?start={FUNNEL_PREFIX}")
}
