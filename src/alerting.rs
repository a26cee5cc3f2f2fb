//! # Operator Alerts Module
//!
//! Sends failure alerts to the operator chat. Alerts are rate-limited by a
//! cool-down window so a burst of identical failures produces one message.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::config::AlertConfig;
use crate::transport::Messenger;

/// Admits at most one alert per cool-down window
///
/// # State
///
/// - **Open**: no alert sent yet, or the window since the last one elapsed
/// - **Cooling down**: an alert went out less than `cooldown` ago
#[derive(Debug)]
pub struct AlertThrottle {
    last_sent: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl AlertThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_sent: Mutex::new(None),
            cooldown,
        }
    }

    /// Claim the right to send an alert now
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Claim the right to send an alert at `now`
    ///
    /// Check and update happen under one lock, so concurrent callers cannot
    /// both pass within the same window.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut last_sent = self
            .last_sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match *last_sent {
            Some(previous) if now.saturating_duration_since(previous) < self.cooldown => false,
            _ => {
                *last_sent = Some(now);
                true
            }
        }
    }
}

/// Rate-limited operator alert sender
pub struct OperatorAlerts {
    messenger: Arc<dyn Messenger>,
    destination: Option<i64>,
    throttle: AlertThrottle,
}

impl OperatorAlerts {
    pub fn new(messenger: Arc<dyn Messenger>, config: &AlertConfig) -> Self {
        Self {
            messenger,
            destination: config.chat_id,
            throttle: AlertThrottle::new(config.cooldown),
        }
    }

    pub fn destination(&self) -> Option<i64> {
        self.destination
    }

    /// Send an alert if a destination is configured and the window allows it.
    ///
    /// Returns whether an alert was delivered.
    pub async fn alert(&self, text: &str) -> bool {
        let Some(chat_id) = self.destination else {
            warn!(alert = %text, "No operator destination configured");
            return false;
        };

        if !self.throttle.try_acquire() {
            debug!(alert = %text, "Operator alert suppressed by cool-down");
            return false;
        }

        match self
            .messenger
            .send_text(chat_id, &format!("⚠️ {text}"), None)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(chat_id, error = %e, "Failed to deliver operator alert");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_alert_passes() {
        let throttle = AlertThrottle::new(Duration::from_secs(600));
        assert!(throttle.try_acquire());
    }

    #[test]
    fn test_alerts_within_window_are_suppressed() {
        let throttle = AlertThrottle::new(Duration::from_secs(600));
        let start = Instant::now();

        assert!(throttle.try_acquire_at(start));
        assert!(!throttle.try_acquire_at(start + Duration::from_secs(1)));
        assert!(!throttle.try_acquire_at(start + Duration::from_secs(599)));
        assert!(throttle.try_acquire_at(start + Duration::from_secs(600)));
        assert!(!throttle.try_acquire_at(start + Duration::from_secs(601)));
    }

    #[test]
    fn test_zero_cooldown_never_suppresses() {
        let throttle = AlertThrottle::new(Duration::ZERO);
        let now = Instant::now();
        assert!(throttle.try_acquire_at(now));
        assert!(throttle.try_acquire_at(now));
    }
}
