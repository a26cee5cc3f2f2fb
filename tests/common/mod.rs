//! Shared fixtures for the integration tests: a recording messenger, a memory
//! store that can be switched off, and a funnel or bot context wired to both.

#![allow(dead_code)]

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;

use guide_funnel_bot::alerting::OperatorAlerts;
use guide_funnel_bot::bot::BotContext;
use guide_funnel_bot::config::{AlertConfig, BotConfig};
use guide_funnel_bot::dispatcher::GuideDocument;
use guide_funnel_bot::errors::{LedgerError, TransportError};
use guide_funnel_bot::funnel::{Funnel, FunnelSettings};
use guide_funnel_bot::ledger::{
    CatalogEntry, LeadField, LeadRecord, LeadRef, LeadRow, LeadStore, Ledger, MemoryStore,
    Referral, ReportRecord,
};
use guide_funnel_bot::transport::{Keyboard, MemberStatus, Messenger};

pub const CHANNEL: &str = "@wine_channel";
pub const OPERATOR_CHAT: i64 = 999;
pub const GUIDE_FILE_ID: &str = "BQACAgIAAxkBAAIB";
pub const ADMIN: i64 = 777;

/// Everything the bot sent
#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Text {
        chat_id: i64,
        text: String,
        keyboard: Option<Keyboard>,
    },
    DocumentRef {
        chat_id: i64,
        file_ref: String,
    },
    DocumentBytes {
        chat_id: i64,
        file_name: String,
        size: usize,
    },
}

/// Messenger that records outbound traffic and answers from settable state
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    status: Mutex<Result<MemberStatus, TransportError>>,
    member_count: Mutex<Option<u64>>,
    reject_references: Mutex<bool>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            status: Mutex::new(Ok(MemberStatus::Member)),
            member_count: Mutex::new(None),
            reject_references: Mutex::new(false),
        }
    }

    pub fn set_status(&self, status: Result<MemberStatus, TransportError>) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_member_count(&self, count: Option<u64>) {
        *self.member_count.lock().unwrap() = count;
    }

    pub fn reject_references(&self, reject: bool) {
        *self.reject_references.lock().unwrap() = reject;
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Texts sent to one chat, in order
    pub fn texts_to(&self, chat: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { chat_id, text, .. } if chat_id == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Keyboard of the last text sent to a chat
    pub fn last_keyboard(&self, chat: i64) -> Option<Keyboard> {
        self.sent().into_iter().rev().find_map(|sent| match sent {
            Sent::Text {
                chat_id, keyboard, ..
            } if chat_id == chat => Some(keyboard),
            _ => None,
        })?
    }

    /// Documents delivered, either way
    pub fn documents(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|sent| !matches!(sent, Sent::Text { .. }))
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::Text {
            chat_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }

    async fn send_document_ref(
        &self,
        chat_id: i64,
        file_ref: &str,
        _caption: &str,
    ) -> Result<(), TransportError> {
        if *self.reject_references.lock().unwrap() {
            return Err(TransportError::Api(
                "Bad Request: wrong file identifier".to_string(),
            ));
        }
        self.sent.lock().unwrap().push(Sent::DocumentRef {
            chat_id,
            file_ref: file_ref.to_string(),
        });
        Ok(())
    }

    async fn send_document_bytes(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        _caption: &str,
    ) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::DocumentBytes {
            chat_id,
            file_name: file_name.to_string(),
            size: bytes.len(),
        });
        Ok(())
    }

    async fn member_status(
        &self,
        _channel: &str,
        _user_id: i64,
    ) -> Result<MemberStatus, TransportError> {
        self.status.lock().unwrap().clone()
    }

    async fn member_count(&self, _channel: &str) -> Result<u64, TransportError> {
        self.member_count
            .lock()
            .unwrap()
            .ok_or_else(|| TransportError::Api("Bad Request: chat not found".to_string()))
    }

    async fn whoami(&self) -> Result<String, TransportError> {
        Ok("guide_bot".to_string())
    }
}

pub fn default_document() -> GuideDocument {
    GuideDocument {
        name: "Wine guide".to_string(),
        file_ref: Some(GUIDE_FILE_ID.to_string()),
        path: None,
    }
}

pub fn settings(document: GuideDocument) -> FunnelSettings {
    FunnelSettings {
        channel_url: Some("https://t.me/wine_channel".to_string()),
        bot_username: "guide_bot".to_string(),
        keywords: vec!["гайд".to_string()],
        default_document: document,
        pacing: Duration::ZERO,
        language: "en".to_string(),
    }
}

pub fn ledger(store: Arc<dyn LeadStore>) -> Ledger {
    Ledger::new(store, Tz::Europe__Moscow)
}

/// Memory store that can be switched off to behave like an unreachable backend
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Vec<CatalogEntry>) -> Self {
        Self {
            inner: MemoryStore::with_catalog(catalog),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), LedgerError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(LedgerError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Deref for FlakyStore {
    type Target = MemoryStore;

    fn deref(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl LeadStore for FlakyStore {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn find_lead(
        &self,
        visitor_id: i64,
        date: NaiveDate,
    ) -> Result<Option<LeadRow>, LedgerError> {
        self.check()?;
        self.inner.find_lead(visitor_id, date).await
    }

    async fn insert_lead(&self, lead: &LeadRecord) -> Result<LeadRef, LedgerError> {
        self.check()?;
        self.inner.insert_lead(lead).await
    }

    async fn patch_lead(
        &self,
        lead: &LeadRef,
        changes: &[(LeadField, String)],
    ) -> Result<(), LedgerError> {
        self.check()?;
        self.inner.patch_lead(lead, changes).await
    }

    async fn leads_on(&self, date: NaiveDate) -> Result<Vec<LeadRecord>, LedgerError> {
        self.check()?;
        self.inner.leads_on(date).await
    }

    async fn referral_exists(
        &self,
        inviter_id: i64,
        invited_id: i64,
    ) -> Result<bool, LedgerError> {
        self.check()?;
        self.inner.referral_exists(inviter_id, invited_id).await
    }

    async fn insert_referral(&self, referral: &Referral) -> Result<(), LedgerError> {
        self.check()?;
        self.inner.insert_referral(referral).await
    }

    async fn insert_report(&self, report: &ReportRecord) -> Result<(), LedgerError> {
        self.check()?;
        self.inner.insert_report(report).await
    }

    async fn latest_report(&self) -> Result<Option<ReportRecord>, LedgerError> {
        self.check()?;
        self.inner.latest_report().await
    }

    async fn catalog(&self) -> Result<Vec<CatalogEntry>, LedgerError> {
        self.check()?;
        self.inner.catalog().await
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.check()
    }

    async fn write_check(&self, note: &str) -> Result<(), LedgerError> {
        self.check()?;
        self.inner.write_check(note).await
    }
}

/// Funnel over a recording messenger and a memory store
pub struct Harness {
    pub messenger: Arc<RecordingMessenger>,
    pub store: Arc<FlakyStore>,
    pub funnel: Funnel,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_document(default_document())
    }

    pub fn with_document(document: GuideDocument) -> Self {
        Self::build(Arc::new(FlakyStore::new()), document)
    }

    pub fn build(store: Arc<FlakyStore>, document: GuideDocument) -> Self {
        let messenger = Arc::new(RecordingMessenger::new());
        let transport: Arc<dyn Messenger> = messenger.clone();
        let alerts = Arc::new(OperatorAlerts::new(
            transport.clone(),
            &AlertConfig {
                chat_id: Some(OPERATOR_CHAT),
                cooldown: Duration::from_secs(600),
            },
        ));
        let funnel = Funnel::new(
            transport,
            ledger(store.clone()),
            alerts,
            CHANNEL,
            settings(document),
        );

        Self {
            messenger,
            store,
            funnel,
        }
    }
}

/// Bot configuration with an operator, the test channel and no pacing
pub fn bot_config(extra: &[(&str, &str)]) -> BotConfig {
    let admin = ADMIN.to_string();
    let mut vars: Vec<(&str, &str)> = vec![
        ("BOT_TOKEN", "123:abc"),
        ("BOT_USERNAME", "guide_bot"),
        ("CHANNEL_ID", CHANNEL),
        ("GUIDE_FILE_ID", GUIDE_FILE_ID),
        ("ADMIN_USER_ID", admin.as_str()),
        ("PACING_MS", "0"),
        ("BOT_LANGUAGE", "en"),
    ];
    vars.extend_from_slice(extra);
    BotConfig::from_lookup(|key| {
        vars.iter()
            .rev()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
    })
    .unwrap()
}

/// Bot context over a recording messenger and a switchable memory store
pub struct BotHarness {
    pub messenger: Arc<RecordingMessenger>,
    pub store: Arc<FlakyStore>,
    pub ctx: Arc<BotContext>,
}

impl BotHarness {
    pub fn new(config: BotConfig) -> Self {
        Self::with_store(config, Arc::new(FlakyStore::new()))
    }

    pub fn with_store(config: BotConfig, store: Arc<FlakyStore>) -> Self {
        let messenger = Arc::new(RecordingMessenger::new());
        let transport: Arc<dyn Messenger> = messenger.clone();
        let ctx = Arc::new(BotContext::new(config, transport, ledger(store.clone())));
        Self {
            messenger,
            store,
            ctx,
        }
    }
}
