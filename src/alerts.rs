//! Alert routing
//!
//! Maps a finding's severity to a notification priority and decides which
//! channels receive it. INFO findings never route. WARN and CRITICAL
//! always reach the detailed channel; the abbreviated push channel is
//! optional and size-capped. Channel failures are logged and swallowed -
//! notification failure must never fail the monitoring run behind it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

use crate::storage::DetectedChangeRow;
use crate::{Analysis, Severity};

/// Changes listed in full on the detailed channel before truncation.
const MAX_DETAILED_CHANGES: usize = 10;

/// Hard cap on the abbreviated channel's message body, in characters.
pub const MAX_PUSH_MESSAGE_LEN: usize = 480;

/// A notification send failed. Callers log it; nothing propagates.
#[derive(Debug)]
pub struct NotificationError(pub String);

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotificationError {}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError(err.to_string())
    }
}

/// Priority of an abbreviated (push) notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPriority {
    /// CRITICAL findings.
    Highest,
    /// WARN findings.
    Elevated,
}

impl PushPriority {
    /// Numeric level understood by the push gateway (ntfy-style scale).
    pub fn level(&self) -> u8 {
        match self {
            PushPriority::Highest => 5,
            PushPriority::Elevated => 4,
        }
    }
}

/// Detailed channel collaborator (an email gateway in the reference
/// deployment): receives the full structured context.
#[async_trait]
pub trait DetailedNotifier: Send + Sync {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &Value,
    ) -> Result<(), NotificationError>;
}

/// Abbreviated channel collaborator: short, priority-tagged pushes.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn send(
        &self,
        title: &str,
        message: &str,
        priority: PushPriority,
    ) -> Result<(), NotificationError>;
}

/// Detailed channel over a JSON webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl DetailedNotifier for WebhookNotifier {
    #[instrument(skip(self, body))]
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &Value,
    ) -> Result<(), NotificationError> {
        let payload = json!({
            "recipients": recipients,
            "subject": subject,
            "body": body,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotificationError(format!(
                "webhook responded with status {}",
                response.status()
            )));
        }

        info!("detailed notification sent");
        Ok(())
    }
}

/// Abbreviated channel over an ntfy-style push gateway.
pub struct PushGateway {
    client: Client,
    url: String,
}

impl PushGateway {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl PushNotifier for PushGateway {
    #[instrument(skip(self, message))]
    async fn send(
        &self,
        title: &str,
        message: &str,
        priority: PushPriority,
    ) -> Result<(), NotificationError> {
        let payload = json!({
            "title": title,
            "message": message,
            "priority": priority.level(),
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotificationError(format!(
                "push gateway responded with status {}",
                response.status()
            )));
        }

        info!("push notification sent");
        Ok(())
    }
}

/// What the router actually delivered, so the caller can flip the run's
/// `alert_sent` flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingOutcome {
    pub detailed_sent: bool,
    pub push_sent: bool,
}

pub struct AlertRouter {
    detailed: Option<Arc<dyn DetailedNotifier>>,
    push: Option<Arc<dyn PushNotifier>>,
    recipients: Vec<String>,
}

impl AlertRouter {
    pub fn new(
        detailed: Option<Arc<dyn DetailedNotifier>>,
        push: Option<Arc<dyn PushNotifier>>,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            detailed,
            push,
            recipients,
        }
    }

    /// Route one finding. INFO is dropped here, regardless of caller.
    #[instrument(skip(self, analysis, changes), fields(host, severity = %analysis.severity))]
    pub async fn route(
        &self,
        host: &str,
        analysis: &Analysis,
        changes: &[DetectedChangeRow],
    ) -> RoutingOutcome {
        if analysis.severity == Severity::Info {
            return RoutingOutcome::default();
        }

        let mut outcome = RoutingOutcome::default();

        let subject = format!("[{}] {} monitoring alert", analysis.severity, host);

        match &self.detailed {
            Some(detailed) => {
                let body = build_detailed_body(host, analysis, changes);
                match detailed.send(&self.recipients, &subject, &body).await {
                    Ok(()) => outcome.detailed_sent = true,
                    Err(e) => error!("detailed alert for {host} failed: {e}"),
                }
            }
            None => debug!("no detailed channel configured, dropping alert for {host}"),
        }

        if let Some(push) = &self.push {
            let priority = match analysis.severity {
                Severity::Critical => PushPriority::Highest,
                _ => PushPriority::Elevated,
            };
            let message = build_push_message(analysis, changes);
            match push.send(&subject, &message, priority).await {
                Ok(()) => outcome.push_sent = true,
                Err(e) => error!("push alert for {host} failed: {e}"),
            }
        }

        outcome
    }
}

fn build_detailed_body(host: &str, analysis: &Analysis, changes: &[DetectedChangeRow]) -> Value {
    let mut listed: Vec<String> = changes
        .iter()
        .take(MAX_DETAILED_CHANGES)
        .map(|c| format!("[{}] {}", c.change_type, c.description))
        .collect();

    if changes.len() > MAX_DETAILED_CHANGES {
        listed.push(format!(
            "... and {} more",
            changes.len() - MAX_DETAILED_CHANGES
        ));
    }

    json!({
        "host": host,
        "severity": analysis.severity.to_string(),
        "health_score": analysis.health_score,
        "changes_detected": changes.len(),
        "summary": analysis.summary,
        "recommendations": analysis.recommendations,
        "changes": listed,
    })
}

/// Compose the abbreviated body: summary plus change count, truncated to
/// the channel cap with a trailing ellipsis, then the pointer to the
/// detailed channel.
pub fn build_push_message(analysis: &Analysis, changes: &[DetectedChangeRow]) -> String {
    let body = format!(
        "health {}/100, {} change(s). {}",
        analysis.health_score,
        changes.len(),
        analysis.summary
    );

    let mut message = truncate_with_ellipsis(&body, MAX_PUSH_MESSAGE_LEN);
    message.push_str("\nSee the detailed alert for full context.");
    message
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
