//! Daily aggregator: counts today's leads, stores a report row and sends the
//! summary to the operator.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::bot::ui_builder::format_report;
use crate::ledger::{DailyCounts, Ledger, ReportRecord};
use crate::transport::Messenger;

/// Counters and the stored report row of one run
#[derive(Clone, Debug, PartialEq)]
pub struct DailyReport {
    pub counts: DailyCounts,
    pub record: ReportRecord,
}

/// Member-count change since the previous snapshot, 0 when either is missing
pub fn member_delta(current: Option<u64>, previous: Option<u64>) -> i64 {
    match (current, previous) {
        (Some(current), Some(previous)) => current as i64 - previous as i64,
        _ => 0,
    }
}

pub struct DailyAggregator {
    ledger: Ledger,
    messenger: Arc<dyn Messenger>,
    channel: String,
    destination: Option<i64>,
    language: String,
}

impl DailyAggregator {
    pub fn new(
        ledger: Ledger,
        messenger: Arc<dyn Messenger>,
        channel: impl Into<String>,
        destination: Option<i64>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            messenger,
            channel: channel.into(),
            destination,
            language: language.into(),
        }
    }

    /// Build today's report without saving or sending it
    pub async fn compute(&self) -> Result<DailyReport> {
        let counts = self
            .ledger
            .count_today()
            .await
            .context("Failed to count today's leads")?;

        let member_count = match self.messenger.member_count(&self.channel).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "Member count unavailable");
                None
            }
        };

        let previous = match self.ledger.latest_report().await {
            Ok(report) => report.and_then(|report| report.member_count),
            Err(e) => {
                warn!(error = %e, "Previous report unavailable");
                None
            }
        };

        let record = ReportRecord {
            date: self.ledger.today(),
            created_at: Utc::now(),
            total_interactions: counts.total,
            distinct_visitors: counts.distinct_visitors,
            member_count,
            member_delta: member_delta(member_count, previous),
        };

        Ok(DailyReport { counts, record })
    }

    /// Compute, store and send today's report
    pub async fn run(&self) -> Result<DailyReport> {
        let report = self.compute().await?;

        if let Err(e) = self.ledger.save_report(&report.record).await {
            error!(date = %report.record.date, error = %e, "Failed to save daily report");
        }

        match self.destination {
            Some(chat_id) => {
                let text = format_report(&report, Some(self.language.as_str()));
                self.messenger
                    .send_text(chat_id, &text, None)
                    .await
                    .context("Failed to send daily report")?;
            }
            None => warn!("No operator destination; daily report not sent"),
        }

        info!(
            date = %report.record.date,
            total = report.counts.total,
            distinct = report.counts.distinct_visitors,
            "Daily report complete"
        );
        Ok(report)
    }
}
