/// Notification building and delivery.
///
/// The [`Dispatcher`] turns a metric, its threshold and a notification type
/// into one [`Notification`] per recipient and hands each to a
/// [`NotificationSink`]. Delivery is fire-once: sink failures are logged and
/// counted, never retried.
///
/// Submodules:
/// - `types`: notification type map (verb, level, templates).
/// - `render`: pure template rendering.
/// - `recipients`: identity predicates and the fan-out rule.
/// - `webhook`: HTTP sink posting notifications as JSON.

pub mod recipients;
pub mod render;
pub mod types;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logging::{self, Component};
use crate::model::{DeliveryError, DispatchError, Metric, MetricId, TargetRef, Threshold, UserId};
use recipients::{resolve_recipients, Identity};
use render::{capitalize_first, render, MessageData};
use types::{NotificationLevel, NotificationTypes};

// ---------------------------------------------------------------------------
// Notification record
// ---------------------------------------------------------------------------

/// One delivered notification, addressed to a single recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub recipient: UserId,
    /// The metric that produced the notification.
    pub actor: MetricId,
    pub actor_label: String,
    /// The threshold the notification is about.
    pub action_object: Threshold,
    pub target: Option<TargetRef>,
    pub notification_type: String,
    pub level: NotificationLevel,
    pub verb: String,
    pub message: String,
    pub email_subject: String,
    pub timestamp: DateTime<Utc>,
    pub data: MessageData,
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

pub trait NotificationSink {
    fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError>;
}

impl<T: NotificationSink + ?Sized> NotificationSink for Box<T> {
    fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError> {
        (**self).deliver(notification)
    }
}

/// Delivers to every inner sink in order. A failure in one sink does not
/// stop the others; the first error is returned.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NotificationSink for SinkSet {
    fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.deliver(notification) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// In-memory notification feed, queryable by recipient, level, verb and time.
#[derive(Debug, Clone, Default)]
pub struct NotificationLog {
    records: Vec<Notification>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications, oldest first.
    pub fn all(&self) -> &[Notification] {
        &self.records
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn first(&self) -> Option<&Notification> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&Notification> {
        self.records.last()
    }

    pub fn for_recipient<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a Notification> + 'a {
        self.records.iter().filter(move |n| &n.recipient == user)
    }

    pub fn with_level(&self, level: NotificationLevel) -> impl Iterator<Item = &Notification> {
        self.records.iter().filter(move |n| n.level == level)
    }

    pub fn with_verb<'a>(&'a self, verb: &'a str) -> impl Iterator<Item = &'a Notification> + 'a {
        self.records.iter().filter(move |n| n.verb == verb)
    }

    pub fn since(&self, time: DateTime<Utc>) -> impl Iterator<Item = &Notification> {
        self.records.iter().filter(move |n| n.timestamp >= time)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl NotificationSink for NotificationLog {
    fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError> {
        let pos = self
            .records
            .partition_point(|n| (n.timestamp, n.id) <= (notification.timestamp, notification.id));
        self.records.insert(pos, notification.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Outcome of one dispatch call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct Dispatcher<I, N> {
    types: NotificationTypes,
    site_name: String,
    identity: I,
    sink: N,
    next_id: u64,
}

impl<I: Identity, N: NotificationSink> Dispatcher<I, N> {
    pub fn new(types: NotificationTypes, site_name: impl Into<String>, identity: I, sink: N) -> Self {
        Self {
            types,
            site_name: site_name.into(),
            identity,
            sink,
            next_id: 1,
        }
    }

    pub fn types(&self) -> &NotificationTypes {
        &self.types
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }

    pub fn identity_mut(&mut self) -> &mut I {
        &mut self.identity
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut N {
        &mut self.sink
    }

    /// Builds the template data for a notification about `metric`.
    pub fn message_data(&self, metric: &Metric, type_key: &str, info: &str) -> Result<MessageData, DispatchError> {
        let notification_type = self
            .types
            .get(type_key)
            .ok_or_else(|| DispatchError::UnknownType(type_key.to_string()))?;
        let actor = metric.to_string();
        let target = metric.target().map(|t| t.label.clone()).unwrap_or_default();
        let subject = if target.is_empty() { actor.clone() } else { target.clone() };
        Ok(MessageData {
            site: self.site_name.clone(),
            level: notification_type.level.to_string(),
            verb: notification_type.verb.clone(),
            metric: capitalize_first(&actor),
            actor,
            info: info.to_string(),
            target,
            subject,
        })
    }

    /// Sends a `type_key` notification about `metric` to every resolved
    /// recipient.
    ///
    /// Fails before delivering anything if the type is unknown or its
    /// templates cannot be rendered. Sink failures only show up in the
    /// returned summary.
    pub fn dispatch(
        &mut self,
        metric: &Metric,
        threshold: &Threshold,
        type_key: &str,
        info: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary, DispatchError> {
        let data = self.message_data(metric, type_key, info)?;
        // message_data already checked the key
        let Some(notification_type) = self.types.get(type_key) else {
            return Err(DispatchError::UnknownType(type_key.to_string()));
        };
        let render_err = |source| DispatchError::Render {
            key: type_key.to_string(),
            source,
        };
        let message = render(&notification_type.message, &data).map_err(render_err)?;
        let email_subject = render(&notification_type.email_subject, &data).map_err(render_err)?;
        let level = notification_type.level;
        let verb = notification_type.verb.clone();

        let recipients = resolve_recipients(&self.identity, metric.target());
        let mut summary = DispatchSummary {
            recipients: recipients.len(),
            ..DispatchSummary::default()
        };

        for recipient in recipients {
            let notification = Notification {
                id: self.next_id,
                recipient,
                actor: metric.id,
                actor_label: data.actor.clone(),
                action_object: *threshold,
                target: metric.target().cloned(),
                notification_type: type_key.to_string(),
                level,
                verb: verb.clone(),
                message: message.trim_end().to_string(),
                email_subject: email_subject.clone(),
                timestamp: now,
                data: data.clone(),
            };
            self.next_id += 1;

            match self.sink.deliver(&notification) {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        component = %Component::Notify,
                        metric = %metric.id,
                        recipient = %notification.recipient,
                        error = %e,
                        "notification delivery failed"
                    );
                }
            }
        }

        logging::log_dispatch_summary(&data.actor, type_key, summary.recipients, summary.delivered, summary.failed);
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
