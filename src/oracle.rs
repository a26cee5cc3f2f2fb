//! Subscription oracle: is the visitor subscribed to the gating channel?

use std::sync::Arc;

use tracing::{debug, warn};

use crate::transport::{MemberStatus, Messenger};

/// Answer of a subscription check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subscription {
    Subscribed,
    NotSubscribed,
    /// Membership could not be determined; every failure mode lands here
    Unknown,
}

/// Checks channel membership through the transport
#[derive(Clone)]
pub struct SubscriptionOracle {
    messenger: Arc<dyn Messenger>,
    channel: String,
}

impl SubscriptionOracle {
    pub fn new(messenger: Arc<dyn Messenger>, channel: impl Into<String>) -> Self {
        Self {
            messenger,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn check(&self, visitor_id: i64) -> Subscription {
        match self.messenger.member_status(&self.channel, visitor_id).await {
            Ok(MemberStatus::Member) => {
                debug!(user_id = %visitor_id, "Visitor is subscribed");
                Subscription::Subscribed
            }
            Ok(MemberStatus::NotMember) => {
                debug!(user_id = %visitor_id, "Visitor is not subscribed");
                Subscription::NotSubscribed
            }
            Err(e) => {
                warn!(user_id = %visitor_id, channel = %self.channel, error = %e, "Subscription check failed");
                Subscription::Unknown
            }
        }
    }
}
