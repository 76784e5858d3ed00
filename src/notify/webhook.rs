/// Webhook notification sink.
///
/// Posts each notification as a JSON document to a configured URL, so an
/// external feed/email service can take over rendering and delivery. One
/// request per notification, no retries.

use std::time::Duration;

use crate::model::DeliveryError;
use crate::notify::{Notification, NotificationSink};

/// Default request timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub struct WebhookSink {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl NotificationSink for WebhookSink {
    fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .json(notification)
            .send()?;

        if !response.status().is_success() {
            return Err(DeliveryError::Http(response.status().as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
