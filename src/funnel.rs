//! # Guide Funnel
//!
//! The conversation state machine. An activation checks the visitor's channel
//! subscription; subscribers receive the document, get a lead row recorded and
//! are asked for a name and an e-mail.
//!
//! ```text
//! Idle --activate--> (checking) --subscribed-----> AwaitingName --name/skip--> AwaitingEmail --email/skip--> Done
//!                               --not subscribed--> Idle
//!                               --unknown--------> Idle
//! ```
//!
//! The funnel owns no session storage: [`Funnel::handle`] takes the current
//! session by value and returns the next one.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::alerting::OperatorAlerts;
use crate::attribution::{deep_link, mentions_keyword, parse_attribution};
use crate::bot::ui_builder::{guide_keyboard, skip_keyboard, subscribe_keyboard, SKIP_EMAIL, SKIP_NAME};
use crate::config::BotConfig;
use crate::dialogue::{validate_display_name, validate_email, FunnelSession, FunnelStage};
use crate::dispatcher::{DocumentDispatcher, GuideDocument};
use crate::ledger::{LeadField, LeadRecord, LeadRef, Ledger, Trigger};
use crate::localization::{t_args_lang, t_lang};
use crate::oracle::{Subscription, SubscriptionOracle};
use crate::transport::{Keyboard, Messenger};

/// Who is talking to the bot
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Visitor {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Visitor {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Inbound funnel events
#[derive(Clone, Debug, PartialEq)]
pub enum FunnelEvent {
    Activate {
        trigger: Trigger,
        /// Raw start payload, present for deep links
        payload: Option<String>,
        /// Catalog pick; the default guide otherwise
        document: Option<GuideDocument>,
    },
    Text(String),
    SkipName,
    SkipEmail,
}

/// Static funnel settings
#[derive(Clone, Debug)]
pub struct FunnelSettings {
    pub channel_url: Option<String>,
    pub bot_username: String,
    pub keywords: Vec<String>,
    pub default_document: GuideDocument,
    pub pacing: Duration,
    pub language: String,
}

impl FunnelSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            channel_url: config.channel_url.clone(),
            bot_username: config.bot_username.clone(),
            keywords: config.keywords.clone(),
            default_document: GuideDocument::from(&config.guide),
            pacing: config.pacing,
            language: config.default_language.clone(),
        }
    }
}

pub struct Funnel {
    messenger: Arc<dyn Messenger>,
    oracle: SubscriptionOracle,
    dispatcher: DocumentDispatcher,
    ledger: Ledger,
    alerts: Arc<OperatorAlerts>,
    settings: FunnelSettings,
}

impl Funnel {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        ledger: Ledger,
        alerts: Arc<OperatorAlerts>,
        channel: impl Into<String>,
        settings: FunnelSettings,
    ) -> Self {
        Self {
            oracle: SubscriptionOracle::new(messenger.clone(), channel),
            dispatcher: DocumentDispatcher::new(messenger.clone()),
            messenger,
            ledger,
            alerts,
            settings,
        }
    }

    pub fn settings(&self) -> &FunnelSettings {
        &self.settings
    }

    fn lang(&self) -> Option<&str> {
        Some(self.settings.language.as_str())
    }

    /// Advance the conversation by one event
    pub async fn handle(
        &self,
        visitor: &Visitor,
        session: FunnelSession,
        event: FunnelEvent,
    ) -> FunnelSession {
        debug!(user_id = %visitor.id, stage = ?session.stage, event = ?event, "Funnel event");

        match event {
            FunnelEvent::Activate {
                trigger,
                payload,
                document,
            } => {
                let session = self.prepare_activation(session, trigger, payload, document);
                self.activate(visitor, session, trigger).await
            }
            FunnelEvent::Text(text) => self.handle_text(visitor, session, &text).await,
            FunnelEvent::SkipName => match session.stage {
                FunnelStage::AwaitingName => self.ask_email(visitor, session).await,
                _ => {
                    debug!(user_id = %visitor.id, "Stale name skip ignored");
                    session
                }
            },
            FunnelEvent::SkipEmail => match session.stage {
                FunnelStage::AwaitingEmail => {
                    self.say(visitor.id, &t_lang("email-skipped", self.lang()), None)
                        .await;
                    FunnelSession {
                        stage: FunnelStage::Done,
                        ..session
                    }
                }
                _ => {
                    debug!(user_id = %visitor.id, "Stale e-mail skip ignored");
                    session
                }
            },
        }
    }

    /// Send the welcome hint with the deep-link button
    pub async fn welcome(&self, chat_id: i64) {
        let keyboard = guide_keyboard(&deep_link(&self.settings.bot_username), self.lang());
        self.say(chat_id, &t_lang("welcome", self.lang()), Some(keyboard))
            .await;
    }

    /// Session as it stands when the subscription check runs.
    ///
    /// A deep link starts over with the attribution of its payload; other
    /// triggers keep the attribution already collected.
    fn prepare_activation(
        &self,
        session: FunnelSession,
        trigger: Trigger,
        payload: Option<String>,
        document: Option<GuideDocument>,
    ) -> FunnelSession {
        match (trigger, payload) {
            (Trigger::DeepLink, Some(payload)) => FunnelSession {
                document,
                ..FunnelSession::activated(parse_attribution(&payload), payload)
            },
            _ => {
                let document = match (trigger, document) {
                    (_, Some(document)) => Some(document),
                    (Trigger::ButtonRecheck, None) => session.document,
                    _ => None,
                };
                FunnelSession {
                    stage: FunnelStage::Idle,
                    attribution: session.attribution,
                    start_payload: session.start_payload,
                    pending_lead: None,
                    display_name: None,
                    email: None,
                    document,
                }
            }
        }
    }

    async fn activate(
        &self,
        visitor: &Visitor,
        session: FunnelSession,
        trigger: Trigger,
    ) -> FunnelSession {
        match self.oracle.check(visitor.id).await {
            Subscription::Subscribed => self.deliver(visitor, session, trigger).await,
            Subscription::NotSubscribed => {
                info!(user_id = %visitor.id, trigger = trigger.as_str(), "Visitor not subscribed");
                let keyboard = subscribe_keyboard(self.settings.channel_url.as_deref(), self.lang());
                self.say(visitor.id, &t_lang("need-sub", self.lang()), Some(keyboard))
                    .await;
                session
            }
            Subscription::Unknown => {
                self.say(visitor.id, &t_lang("check-error", self.lang()), None)
                    .await;
                session
            }
        }
    }

    async fn deliver(
        &self,
        visitor: &Visitor,
        mut session: FunnelSession,
        trigger: Trigger,
    ) -> FunnelSession {
        let document = session
            .document
            .clone()
            .unwrap_or_else(|| self.settings.default_document.clone());

        self.say(visitor.id, &t_lang("sub-confirmed", self.lang()), None)
            .await;
        self.pause().await;

        if let Err(e) = self
            .dispatcher
            .send(visitor.id, &document, &t_lang("doc-caption", self.lang()))
            .await
        {
            error!(user_id = %visitor.id, document = %document.name, error = %e, "Document delivery failed");
            self.say(visitor.id, &t_lang("delivery-failed", self.lang()), None)
                .await;
            self.alerts
                .alert(&t_args_lang(
                    "alert-delivery",
                    &[
                        ("document", &document.name),
                        ("id", &visitor.id.to_string()),
                        ("error", &e.to_string()),
                    ],
                    self.lang(),
                ))
                .await;
            return session;
        }
        self.pause().await;

        session.pending_lead = self.record_lead(visitor, &session, trigger, &document).await;

        let keyboard = skip_keyboard(SKIP_NAME, self.lang());
        self.say(visitor.id, &t_lang("ask-name", self.lang()), Some(keyboard))
            .await;
        session.stage = FunnelStage::AwaitingName;
        session
    }

    async fn record_lead(
        &self,
        visitor: &Visitor,
        session: &FunnelSession,
        trigger: Trigger,
        document: &GuideDocument,
    ) -> Option<LeadRef> {
        let mut draft = LeadRecord::new(visitor.id, self.ledger.today())
            .with_attribution(&session.attribution);
        draft.username = visitor.username.clone().unwrap_or_default();
        draft.first_name = visitor.first_name.clone().unwrap_or_default();
        draft.last_name = visitor.last_name.clone().unwrap_or_default();
        draft.start_payload = session.start_payload.clone().unwrap_or_default();
        draft.trigger = trigger;
        draft.subscribed = true;
        draft.document_name = document.name.clone();
        draft.document_ref = document.reference();

        let outcome = match self.ledger.upsert(draft).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ledger_failed(visitor.id, &e.to_string()).await;
                return None;
            }
        };

        if let Some(referrer) = session.attribution.referrer_for(visitor.id) {
            if let Err(e) = self.ledger.record_referral(referrer, visitor.id).await {
                warn!(user_id = %visitor.id, referrer, error = %e, "Failed to record referral");
            }
        }

        Some(outcome.reference)
    }

    async fn handle_text(
        &self,
        visitor: &Visitor,
        mut session: FunnelSession,
        text: &str,
    ) -> FunnelSession {
        match session.stage {
            FunnelStage::AwaitingName => match validate_display_name(text) {
                Ok(name) => {
                    self.patch(visitor.id, &session, LeadField::DisplayName, &name)
                        .await;
                    session.display_name = Some(name);
                    self.ask_email(visitor, session).await
                }
                Err(reason) => {
                    let key = if reason == "too_long" {
                        "name-too-long"
                    } else {
                        "name-invalid"
                    };
                    let keyboard = skip_keyboard(SKIP_NAME, self.lang());
                    self.say(visitor.id, &t_lang(key, self.lang()), Some(keyboard))
                        .await;
                    session
                }
            },
            FunnelStage::AwaitingEmail => match validate_email(text) {
                Ok(email) => {
                    self.patch(visitor.id, &session, LeadField::Email, &email)
                        .await;
                    self.say(visitor.id, &t_lang("email-ok", self.lang()), None)
                        .await;
                    info!(user_id = %visitor.id, "Funnel completed with e-mail");
                    session.email = Some(email);
                    session.stage = FunnelStage::Done;
                    session
                }
                Err(_) => {
                    let keyboard = skip_keyboard(SKIP_EMAIL, self.lang());
                    self.say(visitor.id, &t_lang("email-bad", self.lang()), Some(keyboard))
                        .await;
                    session
                }
            },
            FunnelStage::Idle | FunnelStage::Done => {
                if mentions_keyword(text, &self.settings.keywords) {
                    let session = self.prepare_activation(session, Trigger::Keyword, None, None);
                    self.activate(visitor, session, Trigger::Keyword).await
                } else {
                    self.welcome(visitor.id).await;
                    session
                }
            }
        }
    }

    async fn ask_email(&self, visitor: &Visitor, session: FunnelSession) -> FunnelSession {
        let keyboard = skip_keyboard(SKIP_EMAIL, self.lang());
        self.say(visitor.id, &t_lang("ask-email", self.lang()), Some(keyboard))
            .await;
        FunnelSession {
            stage: FunnelStage::AwaitingEmail,
            ..session
        }
    }

    /// Patch a follow-up answer onto the pending lead, if one was recorded
    async fn patch(&self, visitor_id: i64, session: &FunnelSession, field: LeadField, value: &str) {
        let Some(lead) = &session.pending_lead else {
            warn!(user_id = %visitor_id, field = field.column(), "No pending lead; answer not recorded");
            return;
        };
        if let Err(e) = self.ledger.patch_field(lead, field, value).await {
            self.ledger_failed(visitor_id, &e.to_string()).await;
        }
    }

    async fn ledger_failed(&self, visitor_id: i64, cause: &str) {
        error!(user_id = %visitor_id, error = %cause, "Lead ledger write failed");
        self.alerts
            .alert(&t_args_lang(
                "alert-ledger",
                &[("id", &visitor_id.to_string()), ("error", cause)],
                self.lang(),
            ))
            .await;
    }

    async fn say(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) {
        if let Err(e) = self.messenger.send_text(chat_id, text, keyboard).await {
            warn!(user_id = %chat_id, error = %e, "Failed to send message");
        }
    }

    async fn pause(&self) {
        if !self.settings.pacing.is_zero() {
            tokio::time::sleep(self.settings.pacing).await;
        }
    }
}
