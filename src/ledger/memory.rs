//! In-process lead store, used when no external store is configured.

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use super::{CatalogEntry, LeadField, LeadRecord, LeadRef, LeadRow, LeadStore, Referral, ReportRecord};
use crate::errors::LedgerError;

#[derive(Default)]
struct Tables {
    leads: Vec<LeadRecord>,
    referrals: Vec<Referral>,
    reports: Vec<ReportRecord>,
    catalog: Vec<CatalogEntry>,
    diagnostics: Vec<String>,
}

/// Lead store kept in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Vec<CatalogEntry>) -> Self {
        Self {
            tables: Mutex::new(Tables {
                catalog,
                ..Default::default()
            }),
        }
    }

    pub async fn leads(&self) -> Vec<LeadRecord> {
        self.tables.lock().await.leads.clone()
    }

    pub async fn referrals(&self) -> Vec<Referral> {
        self.tables.lock().await.referrals.clone()
    }

    pub async fn reports(&self) -> Vec<ReportRecord> {
        self.tables.lock().await.reports.clone()
    }

    pub async fn diagnostics(&self) -> Vec<String> {
        self.tables.lock().await.diagnostics.clone()
    }
}

fn row_index(lead: &LeadRef) -> Result<usize, LedgerError> {
    lead.0
        .parse::<usize>()
        .map_err(|_| LedgerError::UnknownRow(lead.0.clone()))
}

#[async_trait]
impl LeadStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find_lead(
        &self,
        visitor_id: i64,
        date: NaiveDate,
    ) -> Result<Option<LeadRow>, LedgerError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .leads
            .iter()
            .enumerate()
            .find(|(_, lead)| lead.visitor_id == visitor_id && lead.date == date)
            .map(|(index, lead)| LeadRow {
                reference: LeadRef(index.to_string()),
                record: lead.clone(),
            }))
    }

    async fn insert_lead(&self, lead: &LeadRecord) -> Result<LeadRef, LedgerError> {
        let mut tables = self.tables.lock().await;
        tables.leads.push(lead.clone());
        Ok(LeadRef((tables.leads.len() - 1).to_string()))
    }

    async fn patch_lead(
        &self,
        lead: &LeadRef,
        changes: &[(LeadField, String)],
    ) -> Result<(), LedgerError> {
        let index = row_index(lead)?;
        let mut tables = self.tables.lock().await;
        let record = tables
            .leads
            .get_mut(index)
            .ok_or_else(|| LedgerError::UnknownRow(lead.0.clone()))?;
        for (field, value) in changes {
            record.apply(*field, value);
        }
        Ok(())
    }

    async fn leads_on(&self, date: NaiveDate) -> Result<Vec<LeadRecord>, LedgerError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .leads
            .iter()
            .filter(|lead| lead.date == date)
            .cloned()
            .collect())
    }

    async fn referral_exists(
        &self,
        inviter_id: i64,
        invited_id: i64,
    ) -> Result<bool, LedgerError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .referrals
            .iter()
            .any(|r| r.inviter_id == inviter_id && r.invited_id == invited_id))
    }

    async fn insert_referral(&self, referral: &Referral) -> Result<(), LedgerError> {
        self.tables.lock().await.referrals.push(referral.clone());
        Ok(())
    }

    async fn insert_report(&self, report: &ReportRecord) -> Result<(), LedgerError> {
        self.tables.lock().await.reports.push(report.clone());
        Ok(())
    }

    async fn latest_report(&self) -> Result<Option<ReportRecord>, LedgerError> {
        Ok(self.tables.lock().await.reports.last().cloned())
    }

    async fn catalog(&self) -> Result<Vec<CatalogEntry>, LedgerError> {
        Ok(self.tables.lock().await.catalog.clone())
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn write_check(&self, note: &str) -> Result<(), LedgerError> {
        self.tables.lock().await.diagnostics.push(note.to_string());
        Ok(())
    }
}
