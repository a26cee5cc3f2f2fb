//! Hosted record-store lead backend.
//!
//! Talks to a tabular REST API with the Airtable shape: records live under
//! `{api}/{base}/{table}`, are listed with a `filterByFormula` query, created
//! with `POST` and patched with `PATCH {table}/{record_id}`. Every record
//! carries a `fields` object keyed by column name.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    parse_flag, CatalogEntry, LeadField, LeadRecord, LeadRef, LeadRow, LeadStore, Referral,
    ReportRecord, Trigger,
};
use crate::config::RecordStoreConfig;
use crate::errors::LedgerError;

const PAGE_SIZE: &str = "100";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<StoredRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoredRecord {
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Lead store backed by a hosted record-store API
#[derive(Clone)]
pub struct RecordStore {
    client: Client,
    config: RecordStoreConfig,
}

impl RecordStore {
    pub fn new(config: RecordStoreConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn table_url(&self, table: &str, record_id: Option<&str>) -> Result<Url, LedgerError> {
        let mut url = Url::parse(&self.config.api_url)
            .map_err(|e| LedgerError::Transport(format!("invalid record store URL: {e}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                LedgerError::Transport("record store URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty().push(&self.config.base_id).push(table);
            if let Some(id) = record_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn list(
        &self,
        table: &str,
        params: &[(&str, String)],
        all_pages: bool,
    ) -> Result<Vec<StoredRecord>, LedgerError> {
        let url = self.table_url(table, None)?;
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = params.to_vec();
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }

            let page: ListResponse = self
                .client
                .get(url.clone())
                .bearer_auth(&self.config.token)
                .query(&query)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            records.extend(page.records);
            match page.offset {
                Some(next) if all_pages => offset = Some(next),
                _ => break,
            }
        }

        debug!(table, records = records.len(), "Listed records");
        Ok(records)
    }

    async fn create(&self, table: &str, fields: Map<String, Value>) -> Result<String, LedgerError> {
        let created: StoredRecord = self
            .client
            .post(self.table_url(table, None)?)
            .bearer_auth(&self.config.token)
            .json(&json!({ "fields": fields, "typecast": true }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(created.id)
    }
}

/// Quote a value for use inside a filter formula
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Formula matching one visitor's lead on one day
pub fn lead_filter(visitor_id: i64, date: NaiveDate) -> String {
    format!(
        "AND({{visitor_id}}={},{{lead_date}}={})",
        quote(&visitor_id.to_string()),
        quote(&date.format(DATE_FORMAT).to_string())
    )
}

fn text(fields: &Map<String, Value>, key: &str) -> String {
    match fields.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Number(value)) => value.to_string(),
        Some(Value::Bool(value)) => value.to_string(),
        _ => String::new(),
    }
}

fn number(fields: &Map<String, Value>, key: &str) -> Option<i64> {
    match fields.get(key) {
        Some(Value::Number(value)) => value.as_i64(),
        Some(Value::String(value)) => value.trim().parse().ok(),
        _ => None,
    }
}

fn flag(fields: &Map<String, Value>, key: &str) -> bool {
    match fields.get(key) {
        Some(Value::Bool(value)) => *value,
        Some(_) => parse_flag(&text(fields, key)),
        None => false,
    }
}

fn date(fields: &Map<String, Value>, key: &str) -> Result<NaiveDate, LedgerError> {
    let raw = text(fields, key);
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| LedgerError::Decode(format!("{key}={raw:?}: {e}")))
}

fn timestamp(fields: &Map<String, Value>, key: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&text(fields, key))
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Field map written for a new lead
pub fn lead_fields(lead: &LeadRecord) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("created_at".to_string(), json!(lead.created_at.to_rfc3339()));
    fields.insert(
        "lead_date".to_string(),
        json!(lead.date.format(DATE_FORMAT).to_string()),
    );
    fields.insert("visitor_id".to_string(), json!(lead.visitor_id.to_string()));
    for field in LeadField::ALL {
        fields.insert(field.column().to_string(), field_value(field, &lead.value(field)));
    }
    fields
}

fn field_value(field: LeadField, value: &str) -> Value {
    if field == LeadField::Subscribed {
        json!(parse_flag(value))
    } else {
        json!(value)
    }
}

/// Decode a stored lead
pub fn lead_from_fields(
    reference: &str,
    fields: &Map<String, Value>,
) -> Result<LeadRow, LedgerError> {
    let visitor_id = number(fields, "visitor_id")
        .ok_or_else(|| LedgerError::Decode(format!("lead {reference} has no visitor_id")))?;
    let mut record = LeadRecord::new(visitor_id, date(fields, "lead_date")?);
    record.created_at = timestamp(fields, "created_at");
    for field in LeadField::ALL {
        match field {
            LeadField::Subscribed => record.subscribed = flag(fields, field.column()),
            LeadField::Trigger => {
                record.trigger = Trigger::parse(&text(fields, field.column())).unwrap_or_default()
            }
            other => record.apply(other, &text(fields, other.column())),
        }
    }
    Ok(LeadRow {
        reference: LeadRef(reference.to_string()),
        record,
    })
}

fn report_from_fields(fields: &Map<String, Value>) -> Result<ReportRecord, LedgerError> {
    Ok(ReportRecord {
        date: date(fields, "report_date")?,
        created_at: timestamp(fields, "created_at"),
        total_interactions: number(fields, "total_interactions").unwrap_or(0).max(0) as u64,
        distinct_visitors: number(fields, "distinct_visitors").unwrap_or(0).max(0) as u64,
        member_count: number(fields, "member_count").map(|count| count.max(0) as u64),
        member_delta: number(fields, "member_delta").unwrap_or(0),
    })
}

#[async_trait]
impl LeadStore for RecordStore {
    fn backend(&self) -> &'static str {
        "record-store"
    }

    async fn find_lead(
        &self,
        visitor_id: i64,
        date: NaiveDate,
    ) -> Result<Option<LeadRow>, LedgerError> {
        let records = self
            .list(
                &self.config.leads_table,
                &[
                    ("filterByFormula", lead_filter(visitor_id, date)),
                    ("maxRecords", "1".to_string()),
                ],
                false,
            )
            .await?;

        records
            .first()
            .map(|record| lead_from_fields(&record.id, &record.fields))
            .transpose()
    }

    async fn insert_lead(&self, lead: &LeadRecord) -> Result<LeadRef, LedgerError> {
        let id = self
            .create(&self.config.leads_table, lead_fields(lead))
            .await?;
        Ok(LeadRef(id))
    }

    async fn patch_lead(
        &self,
        lead: &LeadRef,
        changes: &[(LeadField, String)],
    ) -> Result<(), LedgerError> {
        if changes.is_empty() {
            return Ok(());
        }
        let fields: Map<String, Value> = changes
            .iter()
            .map(|(field, value)| (field.column().to_string(), field_value(*field, value)))
            .collect();

        let response = self
            .client
            .patch(self.table_url(&self.config.leads_table, Some(&lead.0))?)
            .bearer_auth(&self.config.token)
            .json(&json!({ "fields": fields, "typecast": true }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LedgerError::UnknownRow(lead.0.clone()));
        }
        response.error_for_status()?;
        Ok(())
    }

    async fn leads_on(&self, date: NaiveDate) -> Result<Vec<LeadRecord>, LedgerError> {
        let formula = format!(
            "{{lead_date}}={}",
            quote(&date.format(DATE_FORMAT).to_string())
        );
        let records = self
            .list(
                &self.config.leads_table,
                &[
                    ("filterByFormula", formula),
                    ("pageSize", PAGE_SIZE.to_string()),
                ],
                true,
            )
            .await?;

        records
            .iter()
            .map(|record| lead_from_fields(&record.id, &record.fields).map(|row| row.record))
            .collect()
    }

    async fn referral_exists(
        &self,
        inviter_id: i64,
        invited_id: i64,
    ) -> Result<bool, LedgerError> {
        let formula = format!(
            "AND({{inviter_id}}={},{{invited_id}}={})",
            quote(&inviter_id.to_string()),
            quote(&invited_id.to_string())
        );
        let records = self
            .list(
                &self.config.referrals_table,
                &[
                    ("filterByFormula", formula),
                    ("maxRecords", "1".to_string()),
                ],
                false,
            )
            .await?;
        Ok(!records.is_empty())
    }

    async fn insert_referral(&self, referral: &Referral) -> Result<(), LedgerError> {
        let mut fields = Map::new();
        fields.insert("inviter_id".to_string(), json!(referral.inviter_id.to_string()));
        fields.insert("invited_id".to_string(), json!(referral.invited_id.to_string()));
        fields.insert(
            "referral_date".to_string(),
            json!(referral.date.format(DATE_FORMAT).to_string()),
        );
        self.create(&self.config.referrals_table, fields).await?;
        Ok(())
    }

    async fn insert_report(&self, report: &ReportRecord) -> Result<(), LedgerError> {
        let mut fields = Map::new();
        fields.insert(
            "report_date".to_string(),
            json!(report.date.format(DATE_FORMAT).to_string()),
        );
        fields.insert("created_at".to_string(), json!(report.created_at.to_rfc3339()));
        fields.insert("total_interactions".to_string(), json!(report.total_interactions));
        fields.insert("distinct_visitors".to_string(), json!(report.distinct_visitors));
        if let Some(count) = report.member_count {
            fields.insert("member_count".to_string(), json!(count));
        }
        fields.insert("member_delta".to_string(), json!(report.member_delta));
        self.create(&self.config.reports_table, fields).await?;
        Ok(())
    }

    async fn latest_report(&self) -> Result<Option<ReportRecord>, LedgerError> {
        let records = self
            .list(
                &self.config.reports_table,
                &[
                    ("sort[0][field]", "created_at".to_string()),
                    ("sort[0][direction]", "desc".to_string()),
                    ("maxRecords", "1".to_string()),
                ],
                false,
            )
            .await?;

        records
            .first()
            .map(|record| report_from_fields(&record.fields))
            .transpose()
    }

    async fn catalog(&self) -> Result<Vec<CatalogEntry>, LedgerError> {
        let records = self
            .list(
                &self.config.catalog_table,
                &[("pageSize", PAGE_SIZE.to_string())],
                true,
            )
            .await?;

        Ok(records
            .iter()
            .map(|record| CatalogEntry {
                name: text(&record.fields, "name"),
                document_ref: text(&record.fields, "document_ref"),
                active: flag(&record.fields, "active"),
            })
            .filter(|entry| !entry.name.is_empty() && !entry.document_ref.is_empty())
            .collect())
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.list(
            &self.config.leads_table,
            &[("maxRecords", "1".to_string())],
            false,
        )
        .await?;
        Ok(())
    }

    async fn write_check(&self, note: &str) -> Result<(), LedgerError> {
        let mut fields = Map::new();
        fields.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
        fields.insert("note".to_string(), json!(note));
        let id = self.create(&self.config.diagnostics_table, fields).await?;
        debug!(record = %id, "Diagnostic record written");
        Ok(())
    }
}
