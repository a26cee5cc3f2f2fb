//! PostgreSQL lead store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use super::{
    parse_flag, CatalogEntry, LeadField, LeadRecord, LeadRef, LeadRow, LeadStore, Referral,
    ReportRecord, Trigger,
};
use crate::errors::LedgerError;

const LEAD_COLUMNS: &str = "id, created_at, lead_date, visitor_id, username, first_name, \
    last_name, display_name, email, utm_source, utm_medium, utm_campaign, utm_content, \
    utm_term, start_payload, activation_trigger, subscribed, document_name, document_ref, \
    referrer_id";

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS leads (
            id BIGSERIAL PRIMARY KEY,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            lead_date DATE NOT NULL,
            visitor_id BIGINT NOT NULL,
            username TEXT NOT NULL DEFAULT '',
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            display_name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            utm_source TEXT NOT NULL DEFAULT '',
            utm_medium TEXT NOT NULL DEFAULT '',
            utm_campaign TEXT NOT NULL DEFAULT '',
            utm_content TEXT NOT NULL DEFAULT '',
            utm_term TEXT NOT NULL DEFAULT '',
            start_payload TEXT NOT NULL DEFAULT '',
            activation_trigger TEXT NOT NULL DEFAULT '',
            subscribed BOOLEAN NOT NULL DEFAULT FALSE,
            document_name TEXT NOT NULL DEFAULT '',
            document_ref TEXT NOT NULL DEFAULT '',
            referrer_id TEXT NOT NULL DEFAULT ''
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create leads table")?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS leads_visitor_day ON leads (visitor_id, lead_date)",
    )
    .execute(pool)
    .await
    .context("Failed to create leads index")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS referrals (
            id BIGSERIAL PRIMARY KEY,
            inviter_id BIGINT NOT NULL,
            invited_id BIGINT NOT NULL,
            referral_date DATE NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (inviter_id, invited_id)
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create referrals table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS daily_reports (
            id BIGSERIAL PRIMARY KEY,
            report_date DATE NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            total_interactions BIGINT NOT NULL,
            distinct_visitors BIGINT NOT NULL,
            member_count BIGINT,
            member_delta BIGINT NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create daily_reports table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS guide_catalog (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            document_ref TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create guide_catalog table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS store_diagnostics (
            id BIGSERIAL PRIMARY KEY,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            note TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create store_diagnostics table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

fn lead_from_row(row: &PgRow) -> Result<LeadRow, sqlx::Error> {
    let id: i64 = row.try_get("id")?;
    let trigger: String = row.try_get("activation_trigger")?;
    let record = LeadRecord {
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        date: row.try_get::<NaiveDate, _>("lead_date")?,
        visitor_id: row.try_get("visitor_id")?,
        username: row.try_get("username")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        utm_source: row.try_get("utm_source")?,
        utm_medium: row.try_get("utm_medium")?,
        utm_campaign: row.try_get("utm_campaign")?,
        utm_content: row.try_get("utm_content")?,
        utm_term: row.try_get("utm_term")?,
        start_payload: row.try_get("start_payload")?,
        trigger: Trigger::parse(&trigger).unwrap_or_default(),
        subscribed: row.try_get("subscribed")?,
        document_name: row.try_get("document_name")?,
        document_ref: row.try_get("document_ref")?,
        referrer_id: row.try_get("referrer_id")?,
    };
    Ok(LeadRow {
        reference: LeadRef(id.to_string()),
        record,
    })
}

fn report_from_row(row: &PgRow) -> Result<ReportRecord, sqlx::Error> {
    let total: i64 = row.try_get("total_interactions")?;
    let distinct: i64 = row.try_get("distinct_visitors")?;
    let members: Option<i64> = row.try_get("member_count")?;
    Ok(ReportRecord {
        date: row.try_get("report_date")?,
        created_at: row.try_get("created_at")?,
        total_interactions: total.max(0) as u64,
        distinct_visitors: distinct.max(0) as u64,
        member_count: members.map(|count| count.max(0) as u64),
        member_delta: row.try_get("member_delta")?,
    })
}

fn lead_id(lead: &LeadRef) -> Result<i64, LedgerError> {
    lead.0
        .parse::<i64>()
        .map_err(|_| LedgerError::UnknownRow(lead.0.clone()))
}

/// Lead store backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Connecting to lead database");
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to lead database")?;
        init_database_schema(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl LeadStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn find_lead(
        &self,
        visitor_id: i64,
        date: NaiveDate,
    ) -> Result<Option<LeadRow>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE visitor_id = $1 AND lead_date = $2 LIMIT 1"
        ))
        .bind(visitor_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(lead_from_row).transpose()?)
    }

    async fn insert_lead(&self, lead: &LeadRecord) -> Result<LeadRef, LedgerError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO leads (created_at, lead_date, visitor_id, username, first_name, \
             last_name, display_name, email, utm_source, utm_medium, utm_campaign, \
             utm_content, utm_term, start_payload, activation_trigger, subscribed, \
             document_name, document_ref, referrer_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
             RETURNING id",
        )
        .bind(lead.created_at)
        .bind(lead.date)
        .bind(lead.visitor_id)
        .bind(&lead.username)
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.display_name)
        .bind(&lead.email)
        .bind(&lead.utm_source)
        .bind(&lead.utm_medium)
        .bind(&lead.utm_campaign)
        .bind(&lead.utm_content)
        .bind(&lead.utm_term)
        .bind(&lead.start_payload)
        .bind(lead.trigger.as_str())
        .bind(lead.subscribed)
        .bind(&lead.document_name)
        .bind(&lead.document_ref)
        .bind(&lead.referrer_id)
        .fetch_one(&self.pool)
        .await?;

        debug!(lead_id = id, "Inserted lead row");
        Ok(LeadRef(id.to_string()))
    }

    async fn patch_lead(
        &self,
        lead: &LeadRef,
        changes: &[(LeadField, String)],
    ) -> Result<(), LedgerError> {
        if changes.is_empty() {
            return Ok(());
        }
        let id = lead_id(lead)?;

        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE leads SET ");
        let mut assignments = query.separated(", ");
        for (field, value) in changes {
            assignments.push(format!("{} = ", field.column()));
            if *field == LeadField::Subscribed {
                assignments.push_bind_unseparated(parse_flag(value));
            } else {
                assignments.push_bind_unseparated(value.clone());
            }
        }
        query.push(" WHERE id = ").push_bind(id);

        let result = query.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::UnknownRow(lead.0.clone()));
        }
        Ok(())
    }

    async fn leads_on(&self, date: NaiveDate) -> Result<Vec<LeadRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE lead_date = $1 ORDER BY id"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| lead_from_row(row).map(|lead| lead.record))
            .collect::<Result<Vec<_>, _>>()
            .map_err(LedgerError::from)
    }

    async fn referral_exists(
        &self,
        inviter_id: i64,
        invited_id: i64,
    ) -> Result<bool, LedgerError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM referrals WHERE inviter_id = $1 AND invited_id = $2)",
        )
        .bind(inviter_id)
        .bind(invited_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_referral(&self, referral: &Referral) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO referrals (inviter_id, invited_id, referral_date) VALUES ($1, $2, $3) \
             ON CONFLICT (inviter_id, invited_id) DO NOTHING",
        )
        .bind(referral.inviter_id)
        .bind(referral.invited_id)
        .bind(referral.date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_report(&self, report: &ReportRecord) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO daily_reports (report_date, created_at, total_interactions, \
             distinct_visitors, member_count, member_delta) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(report.date)
        .bind(report.created_at)
        .bind(report.total_interactions as i64)
        .bind(report.distinct_visitors as i64)
        .bind(report.member_count.map(|count| count as i64))
        .bind(report.member_delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_report(&self) -> Result<Option<ReportRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT report_date, created_at, total_interactions, distinct_visitors, \
             member_count, member_delta FROM daily_reports ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(report_from_row).transpose()?)
    }

    async fn catalog(&self) -> Result<Vec<CatalogEntry>, LedgerError> {
        let rows = sqlx::query("SELECT name, document_ref, active FROM guide_catalog ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<CatalogEntry, sqlx::Error> {
                Ok(CatalogEntry {
                    name: row.try_get("name")?,
                    document_ref: row.try_get("document_ref")?,
                    active: row.try_get("active")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(LedgerError::from)
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn write_check(&self, note: &str) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO store_diagnostics (note) VALUES ($1)")
            .bind(note)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
