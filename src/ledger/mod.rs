//! Lead ledger: persistence of leads, referrals, daily reports and the
//! document catalog.
//!
//! Backends implement the small [`LeadStore`] primitive trait; the
//! idempotence rules (one lead per visitor per day, no blanking of filled
//! fields, one referral per ordered pair) live once in [`Ledger`].

pub mod memory;
pub mod postgres;
pub mod record_store;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::attribution::Attribution;
use crate::errors::LedgerError;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use record_store::RecordStore;

/// Number of values reported per counting dimension
pub const TOP_VALUES: usize = 3;

/// Opaque reference to a stored lead row
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadRef(pub String);

impl std::fmt::Display for LeadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What started the funnel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    #[default]
    DeepLink,
    Keyword,
    ButtonRecheck,
    CatalogPick,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::DeepLink => "deep_link",
            Trigger::Keyword => "keyword",
            Trigger::ButtonRecheck => "button_recheck",
            Trigger::CatalogPick => "catalog_pick",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "deep_link" => Some(Trigger::DeepLink),
            "keyword" => Some(Trigger::Keyword),
            "button_recheck" => Some(Trigger::ButtonRecheck),
            "catalog_pick" => Some(Trigger::CatalogPick),
            _ => None,
        }
    }
}

/// Mutable columns of a lead row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeadField {
    Username,
    FirstName,
    LastName,
    DisplayName,
    Email,
    UtmSource,
    UtmMedium,
    UtmCampaign,
    UtmContent,
    UtmTerm,
    StartPayload,
    Trigger,
    Subscribed,
    DocumentName,
    DocumentRef,
    ReferrerId,
}

impl LeadField {
    pub const ALL: [LeadField; 16] = [
        LeadField::Username,
        LeadField::FirstName,
        LeadField::LastName,
        LeadField::DisplayName,
        LeadField::Email,
        LeadField::UtmSource,
        LeadField::UtmMedium,
        LeadField::UtmCampaign,
        LeadField::UtmContent,
        LeadField::UtmTerm,
        LeadField::StartPayload,
        LeadField::Trigger,
        LeadField::Subscribed,
        LeadField::DocumentName,
        LeadField::DocumentRef,
        LeadField::ReferrerId,
    ];

    /// Column name shared by every backend
    pub fn column(&self) -> &'static str {
        match self {
            LeadField::Username => "username",
            LeadField::FirstName => "first_name",
            LeadField::LastName => "last_name",
            LeadField::DisplayName => "display_name",
            LeadField::Email => "email",
            LeadField::UtmSource => "utm_source",
            LeadField::UtmMedium => "utm_medium",
            LeadField::UtmCampaign => "utm_campaign",
            LeadField::UtmContent => "utm_content",
            LeadField::UtmTerm => "utm_term",
            LeadField::StartPayload => "start_payload",
            LeadField::Trigger => "activation_trigger",
            LeadField::Subscribed => "subscribed",
            LeadField::DocumentName => "document_name",
            LeadField::DocumentRef => "document_ref",
            LeadField::ReferrerId => "referrer_id",
        }
    }
}

/// One visitor's interaction with the funnel on one day
#[derive(Clone, Debug, PartialEq)]
pub struct LeadRecord {
    pub created_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub visitor_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub email: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
    pub start_payload: String,
    pub trigger: Trigger,
    pub subscribed: bool,
    pub document_name: String,
    pub document_ref: String,
    pub referrer_id: String,
}

impl LeadRecord {
    /// Empty lead for a visitor on a given day
    pub fn new(visitor_id: i64, date: NaiveDate) -> Self {
        Self {
            created_at: Utc::now(),
            date,
            visitor_id,
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            display_name: String::new(),
            email: String::new(),
            utm_source: String::new(),
            utm_medium: String::new(),
            utm_campaign: String::new(),
            utm_content: String::new(),
            utm_term: String::new(),
            start_payload: String::new(),
            trigger: Trigger::default(),
            subscribed: false,
            document_name: String::new(),
            document_ref: String::new(),
            referrer_id: String::new(),
        }
    }

    /// Copy attribution fields onto the lead
    pub fn with_attribution(mut self, attribution: &Attribution) -> Self {
        self.utm_source = attribution.source.clone();
        self.utm_medium = attribution.medium.clone();
        self.utm_campaign = attribution.campaign.clone();
        self.utm_content = attribution.content.clone();
        self.utm_term = attribution.term.clone();
        self.referrer_id = attribution
            .referrer_for(self.visitor_id)
            .map(|id| id.to_string())
            .unwrap_or_default();
        self
    }

    /// String form of a field, as written to the store
    pub fn value(&self, field: LeadField) -> String {
        match field {
            LeadField::Username => self.username.clone(),
            LeadField::FirstName => self.first_name.clone(),
            LeadField::LastName => self.last_name.clone(),
            LeadField::DisplayName => self.display_name.clone(),
            LeadField::Email => self.email.clone(),
            LeadField::UtmSource => self.utm_source.clone(),
            LeadField::UtmMedium => self.utm_medium.clone(),
            LeadField::UtmCampaign => self.utm_campaign.clone(),
            LeadField::UtmContent => self.utm_content.clone(),
            LeadField::UtmTerm => self.utm_term.clone(),
            LeadField::StartPayload => self.start_payload.clone(),
            LeadField::Trigger => self.trigger.as_str().to_string(),
            LeadField::Subscribed => self.subscribed.to_string(),
            LeadField::DocumentName => self.document_name.clone(),
            LeadField::DocumentRef => self.document_ref.clone(),
            LeadField::ReferrerId => self.referrer_id.clone(),
        }
    }

    /// Overwrite a field from its string form
    pub fn apply(&mut self, field: LeadField, value: &str) {
        let value_owned = value.to_string();
        match field {
            LeadField::Username => self.username = value_owned,
            LeadField::FirstName => self.first_name = value_owned,
            LeadField::LastName => self.last_name = value_owned,
            LeadField::DisplayName => self.display_name = value_owned,
            LeadField::Email => self.email = value_owned,
            LeadField::UtmSource => self.utm_source = value_owned,
            LeadField::UtmMedium => self.utm_medium = value_owned,
            LeadField::UtmCampaign => self.utm_campaign = value_owned,
            LeadField::UtmContent => self.utm_content = value_owned,
            LeadField::UtmTerm => self.utm_term = value_owned,
            LeadField::StartPayload => self.start_payload = value_owned,
            LeadField::Trigger => self.trigger = Trigger::parse(value).unwrap_or_default(),
            LeadField::Subscribed => self.subscribed = parse_flag(value),
            LeadField::DocumentName => self.document_name = value_owned,
            LeadField::DocumentRef => self.document_ref = value_owned,
            LeadField::ReferrerId => self.referrer_id = value_owned,
        }
    }
}

/// Interpret the string forms a store may hand back for a boolean column
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "да"
    )
}

/// Fields of `incoming` that should be written over `existing`: non-empty
/// and different from what is stored.
pub fn changed_fields(existing: &LeadRecord, incoming: &LeadRecord) -> Vec<(LeadField, String)> {
    LeadField::ALL
        .iter()
        .filter_map(|field| {
            let new_value = incoming.value(*field);
            if new_value.trim().is_empty() || new_value == existing.value(*field) {
                None
            } else {
                Some((*field, new_value))
            }
        })
        .collect()
}

/// A stored lead together with its reference
#[derive(Clone, Debug, PartialEq)]
pub struct LeadRow {
    pub reference: LeadRef,
    pub record: LeadRecord,
}

/// Result of an upsert
#[derive(Clone, Debug, PartialEq)]
pub struct UpsertOutcome {
    pub reference: LeadRef,
    /// A new row was inserted rather than an existing one patched
    pub created: bool,
    pub changed: Vec<LeadField>,
}

/// Who invited whom
#[derive(Clone, Debug, PartialEq)]
pub struct Referral {
    pub inviter_id: i64,
    pub invited_id: i64,
    pub date: NaiveDate,
}

/// One daily report row
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRecord {
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub total_interactions: u64,
    pub distinct_visitors: u64,
    /// Channel member count at report time, when it could be read
    pub member_count: Option<u64>,
    pub member_delta: i64,
}

/// A downloadable document offered in the catalog
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub document_ref: String,
    pub active: bool,
}

/// Aggregate counters over one day of leads
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DailyCounts {
    pub total: u64,
    pub distinct_visitors: u64,
    pub sources: Vec<(String, u64)>,
    pub campaigns: Vec<(String, u64)>,
    pub referrers: Vec<(String, u64)>,
}

impl DailyCounts {
    /// Compute counters over a set of lead rows
    pub fn from_leads(leads: &[LeadRecord]) -> Self {
        let visitors: HashSet<i64> = leads.iter().map(|lead| lead.visitor_id).collect();
        Self {
            total: leads.len() as u64,
            distinct_visitors: visitors.len() as u64,
            sources: top_values(leads.iter().map(|lead| lead.utm_source.as_str())),
            campaigns: top_values(leads.iter().map(|lead| lead.utm_campaign.as_str())),
            referrers: top_values(leads.iter().map(|lead| lead.referrer_id.as_str())),
        }
    }
}

/// The most frequent non-empty values, highest count first, ties by value
pub fn top_values<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(String, u64)> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for value in values.map(str::trim).filter(|value| !value.is_empty()) {
        *counts.entry(value).or_default() += 1;
    }

    let mut ranked: Vec<(String, u64)> = counts
        .into_iter()
        .map(|(value, count)| (value.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_VALUES);
    ranked
}

/// Primitive operations a lead store backend provides
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Short backend name for diagnostics
    fn backend(&self) -> &'static str;

    async fn find_lead(
        &self,
        visitor_id: i64,
        date: NaiveDate,
    ) -> Result<Option<LeadRow>, LedgerError>;

    async fn insert_lead(&self, lead: &LeadRecord) -> Result<LeadRef, LedgerError>;

    async fn patch_lead(
        &self,
        lead: &LeadRef,
        changes: &[(LeadField, String)],
    ) -> Result<(), LedgerError>;

    async fn leads_on(&self, date: NaiveDate) -> Result<Vec<LeadRecord>, LedgerError>;

    async fn referral_exists(&self, inviter_id: i64, invited_id: i64)
        -> Result<bool, LedgerError>;

    async fn insert_referral(&self, referral: &Referral) -> Result<(), LedgerError>;

    async fn insert_report(&self, report: &ReportRecord) -> Result<(), LedgerError>;

    async fn latest_report(&self) -> Result<Option<ReportRecord>, LedgerError>;

    async fn catalog(&self) -> Result<Vec<CatalogEntry>, LedgerError>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), LedgerError>;

    /// Write a throwaway row outside the lead tables to prove write access
    async fn write_check(&self, note: &str) -> Result<(), LedgerError>;
}

/// Lead ledger bound to a store and the time zone that defines "today"
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LeadStore>,
    timezone: Tz,
}

impl Ledger {
    pub fn new(store: Arc<dyn LeadStore>, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Current calendar date in the ledger's time zone
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Today's lead for a visitor, if any
    pub async fn find_today(&self, visitor_id: i64) -> Result<Option<LeadRow>, LedgerError> {
        self.store.find_lead(visitor_id, self.today()).await
    }

    /// Insert today's lead or patch the existing one in place.
    ///
    /// The draft's date is replaced with today's date. Only non-empty values
    /// that differ from the stored ones are written.
    pub async fn upsert(&self, draft: LeadRecord) -> Result<UpsertOutcome, LedgerError> {
        let mut draft = draft;
        draft.date = self.today();

        match self.store.find_lead(draft.visitor_id, draft.date).await? {
            Some(existing) => {
                let changes = changed_fields(&existing.record, &draft);
                if changes.is_empty() {
                    debug!(user_id = %draft.visitor_id, lead = %existing.reference, "Lead unchanged");
                } else {
                    self.store.patch_lead(&existing.reference, &changes).await?;
                    info!(
                        user_id = %draft.visitor_id,
                        lead = %existing.reference,
                        fields = changes.len(),
                        "Lead updated in place"
                    );
                }
                Ok(UpsertOutcome {
                    reference: existing.reference,
                    created: false,
                    changed: changes.into_iter().map(|(field, _)| field).collect(),
                })
            }
            None => {
                let reference = self.store.insert_lead(&draft).await?;
                info!(user_id = %draft.visitor_id, lead = %reference, "Lead created");
                Ok(UpsertOutcome {
                    reference,
                    created: true,
                    changed: Vec::new(),
                })
            }
        }
    }

    /// Write a single deferred field; blank values are ignored
    pub async fn patch_field(
        &self,
        lead: &LeadRef,
        field: LeadField,
        value: &str,
    ) -> Result<(), LedgerError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }
        self.store
            .patch_lead(lead, &[(field, value.to_string())])
            .await
    }

    /// Record that `inviter_id` brought `invited_id`, once per ordered pair.
    ///
    /// Returns `true` when a referral row was created.
    pub async fn record_referral(
        &self,
        inviter_id: i64,
        invited_id: i64,
    ) -> Result<bool, LedgerError> {
        if inviter_id == invited_id {
            return Ok(false);
        }
        if self.store.referral_exists(inviter_id, invited_id).await? {
            debug!(inviter_id, invited_id, "Referral already recorded");
            return Ok(false);
        }
        self.store
            .insert_referral(&Referral {
                inviter_id,
                invited_id,
                date: self.today(),
            })
            .await?;
        info!(inviter_id, invited_id, "Referral recorded");
        Ok(true)
    }

    /// Counters over today's leads
    pub async fn count_today(&self) -> Result<DailyCounts, LedgerError> {
        let leads = self.store.leads_on(self.today()).await?;
        Ok(DailyCounts::from_leads(&leads))
    }

    pub async fn latest_report(&self) -> Result<Option<ReportRecord>, LedgerError> {
        self.store.latest_report().await
    }

    pub async fn save_report(&self, report: &ReportRecord) -> Result<(), LedgerError> {
        self.store.insert_report(report).await
    }

    /// Active catalog entries, in store order
    pub async fn active_catalog(&self) -> Result<Vec<CatalogEntry>, LedgerError> {
        let entries = self.store.catalog().await?;
        Ok(entries.into_iter().filter(|entry| entry.active).collect())
    }

    pub async fn ping(&self) -> Result<(), LedgerError> {
        self.store.ping().await
    }

    pub async fn write_check(&self, note: &str) -> Result<(), LedgerError> {
        self.store.write_check(note).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(visitor_id: i64, source: &str, campaign: &str, referrer: &str) -> LeadRecord {
        let mut record = LeadRecord::new(visitor_id, NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        record.utm_source = source.to_string();
        record.utm_campaign = campaign.to_string();
        record.referrer_id = referrer.to_string();
        record
    }

    #[test]
    fn test_changed_fields_skips_blank_values() {
        let mut existing = lead(42, "telegram", "", "");
        existing.display_name = "Анна".to_string();
        let incoming = lead(42, "", "", "");

        assert!(changed_fields(&existing, &incoming)
            .iter()
            .all(|(field, _)| *field != LeadField::DisplayName && *field != LeadField::UtmSource));
    }

    #[test]
    fn test_changed_fields_overwrites_different_values() {
        let existing = lead(42, "telegram", "", "");
        let incoming = lead(42, "instagram", "launch", "");

        let changes = changed_fields(&existing, &incoming);
        assert!(changes.contains(&(LeadField::UtmSource, "instagram".to_string())));
        assert!(changes.contains(&(LeadField::UtmCampaign, "launch".to_string())));
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_identical_records_have_no_changes() {
        let record = lead(42, "telegram", "launch", "7");
        assert!(changed_fields(&record, &record.clone()).is_empty());
    }

    #[test]
    fn test_top_values_ranking() {
        let ranked = top_values(["vk", "tg", "vk", "", "ig", "tg", "vk", "fb"].into_iter());
        assert_eq!(
            ranked,
            vec![
                ("vk".to_string(), 3),
                ("tg".to_string(), 2),
                ("fb".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_daily_counts() {
        let leads = vec![lead(1, "vk", "a", ""), lead(2, "vk", "", "1"), lead(1, "", "a", "")];
        let counts = DailyCounts::from_leads(&leads);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.distinct_visitors, 2);
        assert_eq!(counts.sources, vec![("vk".to_string(), 2)]);
        assert_eq!(counts.referrers, vec![("1".to_string(), 1)]);
    }

    #[test]
    fn test_field_roundtrip_through_strings() {
        let mut record = LeadRecord::new(42, NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        record.apply(LeadField::Trigger, "catalog_pick");
        record.apply(LeadField::Subscribed, "true");
        assert_eq!(record.trigger, Trigger::CatalogPick);
        assert!(record.subscribed);
        assert_eq!(record.value(LeadField::Trigger), "catalog_pick");
    }

    #[test]
    fn test_attribution_copies_referrer_except_self() {
        let attribution = Attribution {
            source: "ig".to_string(),
            referrer: Some(42),
            ..Default::default()
        };
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(LeadRecord::new(42, date).with_attribution(&attribution).referrer_id, "");
        assert_eq!(LeadRecord::new(7, date).with_attribution(&attribution).referrer_id, "42");
    }
}
