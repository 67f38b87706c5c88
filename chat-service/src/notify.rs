//! Best-effort out-of-band notifications.
//!
//! Push notifications (receiver offline) and moderation alerts (conversation
//! reported) go through external HTTP gateways. Failures here are logged and
//! swallowed: the primary operation has already committed and must not be
//! failed or rolled back by a side channel.

use serde_json::json;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    push_url: Option<String>,
    moderation_url: Option<String>,
}

impl Notifier {
    pub fn new(push_url: Option<String>, moderation_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            push_url,
            moderation_url,
        }
    }

    /// Read gateway endpoints from the environment. Unset variables disable
    /// the corresponding channel.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("PUSH_GATEWAY_URL").ok(),
            std::env::var("MODERATION_WEBHOOK_URL").ok(),
        )
    }

    /// A notifier with both channels disabled, for tests
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Dispatch a push notification to an offline receiver's device
    pub async fn push(&self, push_token: &str, title: &str, body: &str) {
        let Some(url) = &self.push_url else {
            debug!("push gateway not configured, skipping dispatch");
            return;
        };

        let payload = json!({
            "to": push_token,
            "title": title,
            "body": body,
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(status = %resp.status(), "push notification dispatched");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "push gateway rejected notification");
            }
            Err(err) => {
                warn!(error = %err, "push notification dispatch failed");
            }
        }
    }

    /// Alert the moderation channel that a conversation was reported
    pub async fn moderation_alert(&self, conversation_id: &str, reported_by: &str, reason: &str) {
        let Some(url) = &self.moderation_url else {
            debug!("moderation webhook not configured, skipping alert");
            return;
        };

        let payload = json!({
            "conversation_id": conversation_id,
            "reported_by": reported_by,
            "reason": reason,
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(conversation = conversation_id, "moderation alert dispatched");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "moderation webhook rejected alert");
            }
            Err(err) => {
                warn!(error = %err, "moderation alert dispatch failed");
            }
        }
    }
}
