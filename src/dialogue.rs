//! Visitor session state for the guide funnel.

use std::time::Duration;

use lazy_static::lazy_static;
use moka::future::Cache;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::attribution::Attribution;
use crate::dispatcher::GuideDocument;
use crate::ledger::LeadRef;

pub const MAX_DISPLAY_NAME_LEN: usize = 255;
const SESSION_CAPACITY: u64 = 100_000;

lazy_static! {
    // one '@', no whitespace, dotted domain with non-empty labels
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("valid e-mail pattern");
}

/// Where the visitor stands in the funnel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunnelStage {
    #[default]
    Idle,
    AwaitingName,
    AwaitingEmail,
    Done,
}

/// Conversation state for one visitor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelSession {
    pub stage: FunnelStage,
    pub attribution: Attribution,
    /// Raw deep-link payload of the current activation
    pub start_payload: Option<String>,
    /// Today's lead row, once recorded
    pub pending_lead: Option<LeadRef>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// Document picked from the catalog; the default guide otherwise
    pub document: Option<GuideDocument>,
}

impl FunnelSession {
    /// Fresh session for a deep-link activation
    pub fn activated(attribution: Attribution, start_payload: String) -> Self {
        Self {
            attribution,
            start_payload: Some(start_payload),
            ..Default::default()
        }
    }
}

/// Validates a display name input
pub fn validate_display_name(name: &str) -> Result<String, &'static str> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err("empty");
    }

    if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err("too_long");
    }

    Ok(trimmed.to_string())
}

/// Validates an e-mail address: exactly one `@`, a dot in the domain, no whitespace
pub fn validate_email(candidate: &str) -> Result<String, &'static str> {
    let trimmed = candidate.trim();
    if EMAIL_RE.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err("invalid_email")
    }
}

/// Per-visitor session storage with a time-to-live.
///
/// A session that is not touched for `ttl` is dropped and the visitor starts
/// from a fresh idle session.
#[derive(Clone)]
pub struct SessionStore {
    cache: Cache<i64, FunnelSession>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(SESSION_CAPACITY)
                .time_to_idle(ttl)
                .build(),
        }
    }

    /// Current session, or a fresh idle one
    pub async fn load(&self, visitor_id: i64) -> FunnelSession {
        self.cache.get(&visitor_id).await.unwrap_or_default()
    }

    pub async fn save(&self, visitor_id: i64, session: FunnelSession) {
        self.cache.insert(visitor_id, session).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_validation() {
        assert_eq!(validate_display_name("  Анна ").unwrap(), "Анна");
        assert_eq!(validate_display_name("   "), Err("empty"));
        assert_eq!(validate_display_name(&"я".repeat(256)), Err("too_long"));
        assert!(validate_display_name(&"я".repeat(255)).is_ok());
    }

    #[test]
    fn test_email_accepts_plain_addresses() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("first.last+wine@mail.example.ru").is_ok());
        assert_eq!(validate_email("  a@b.co ").unwrap(), "a@b.co");
    }

    #[test]
    fn test_email_rejects_malformed_addresses() {
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a b@c.com").is_err());
        assert!(validate_email("a@@b.com").is_err());
        assert!(validate_email("a@b@c.com").is_err());
        assert!(validate_email("@b.com").is_err());
        assert!(validate_email("a@.com").is_err());
        assert!(validate_email("a@b.").is_err());
        assert!(validate_email("").is_err());
    }

    #[tokio::test]
    async fn test_session_store_defaults_to_idle() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.load(42).await;
        assert_eq!(session.stage, FunnelStage::Idle);
        assert!(session.pending_lead.is_none());
    }

    #[tokio::test]
    async fn test_session_store_roundtrip() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = FunnelSession {
            stage: FunnelStage::AwaitingEmail,
            display_name: Some("Анна".to_string()),
            ..Default::default()
        };
        store.save(42, session.clone()).await;
        assert_eq!(store.load(42).await, session);
        assert_eq!(store.load(7).await, FunnelSession::default());
    }
}
