//! Daily report: counters, member-count delta, storage and delivery.

mod common;

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

use common::{FlakyStore, RecordingMessenger, CHANNEL, OPERATOR_CHAT};
use guide_funnel_bot::aggregator::DailyAggregator;
use guide_funnel_bot::ledger::{LeadRecord, LeadStore, Ledger, ReportRecord};

struct Fixture {
    messenger: Arc<RecordingMessenger>,
    store: Arc<FlakyStore>,
    ledger: Ledger,
}

fn fixture() -> Fixture {
    let store = Arc::new(FlakyStore::new());
    Fixture {
        messenger: Arc::new(RecordingMessenger::new()),
        ledger: common::ledger(store.clone()),
        store,
    }
}

fn aggregator(f: &Fixture, destination: Option<i64>) -> DailyAggregator {
    DailyAggregator::new(
        f.ledger.clone(),
        f.messenger.clone(),
        CHANNEL,
        destination,
        "en",
    )
}

async fn seed_leads(f: &Fixture) -> Result<()> {
    let today = f.ledger.today();
    let mut first = LeadRecord::new(1, today);
    first.utm_source = "instagram".to_string();
    let mut second = LeadRecord::new(2, today);
    second.utm_source = "instagram".to_string();
    second.referrer_id = "1".to_string();
    // second interaction of visitor 1, stored directly without the upsert
    let third = LeadRecord::new(1, today);

    for lead in [first, second, third] {
        f.store.insert_lead(&lead).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_report_counts_and_delta() -> Result<()> {
    let f = fixture();
    seed_leads(&f).await?;
    f.store
        .insert_report(&ReportRecord {
            date: f.ledger.today(),
            created_at: Utc::now(),
            total_interactions: 0,
            distinct_visitors: 0,
            member_count: Some(100),
            member_delta: 0,
        })
        .await?;
    f.messenger.set_member_count(Some(120));

    let report = aggregator(&f, Some(OPERATOR_CHAT)).run().await?;

    assert_eq!(report.counts.total, 3);
    assert_eq!(report.counts.distinct_visitors, 2);
    assert_eq!(report.counts.sources, vec![("instagram".to_string(), 2)]);
    assert_eq!(report.counts.referrers, vec![("1".to_string(), 1)]);
    assert_eq!(report.record.member_count, Some(120));
    assert_eq!(report.record.member_delta, 20);

    // duplicate same-day reports are appended
    let reports = f.store.reports().await;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1], report.record);

    let sent = f.messenger.texts_to(OPERATOR_CHAT);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Total interactions: 3"));
    assert!(sent[0].contains("Distinct visitors: 2"));
    assert!(sent[0].contains("120 (+20)"));
    Ok(())
}

#[tokio::test]
async fn test_missing_snapshots_give_zero_delta() -> Result<()> {
    let f = fixture();
    f.messenger.set_member_count(Some(50));

    let report = aggregator(&f, Some(OPERATOR_CHAT)).run().await?;
    assert_eq!(report.record.member_count, Some(50));
    assert_eq!(report.record.member_delta, 0);

    f.messenger.set_member_count(None);
    let report = aggregator(&f, Some(OPERATOR_CHAT)).run().await?;
    assert_eq!(report.record.member_count, None);
    assert_eq!(report.record.member_delta, 0);
    assert!(f.messenger.texts_to(OPERATOR_CHAT)[1].contains("unavailable"));
    Ok(())
}

#[tokio::test]
async fn test_empty_day() -> Result<()> {
    let f = fixture();

    let report = aggregator(&f, Some(OPERATOR_CHAT)).run().await?;
    assert_eq!(report.counts.total, 0);
    assert_eq!(report.counts.distinct_visitors, 0);
    assert!(report.counts.sources.is_empty());
    assert!(f.messenger.texts_to(OPERATOR_CHAT)[0].contains("Sources: none"));
    Ok(())
}

#[tokio::test]
async fn test_report_without_destination_is_still_saved() -> Result<()> {
    let f = fixture();
    seed_leads(&f).await?;

    let report = aggregator(&f, None).run().await?;
    assert_eq!(report.counts.total, 3);
    assert_eq!(f.store.reports().await.len(), 1);
    assert!(f.messenger.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_store_fails_the_run() -> Result<()> {
    let f = fixture();
    f.store.set_failing(true);

    assert!(aggregator(&f, Some(OPERATOR_CHAT)).run().await.is_err());
    assert!(f.messenger.sent().is_empty());
    Ok(())
}
