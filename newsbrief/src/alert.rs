//! Operator alerts. Sending an alert is fire-and-forget: a failing alerter is
//! logged and never fails the run.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::digest::escape_html;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub details: Vec<(String, String)>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            details: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.push((key.to_string(), value.to_string()));
        self
    }

    pub fn delivery_failure(recipient: &str, error: &str, report_date: NaiveDate) -> Self {
        Alert::new(
            "Digest delivery failed",
            format!("Sending the {} digest to {} failed.", report_date, recipient),
            Severity::Error,
        )
        .detail("recipient", recipient)
        .detail("error", error)
        .detail("report_date", report_date)
    }

    /// Warning for a failed keyword or stage; critical when credentials are missing.
    pub fn collection_failure(error: &str, keyword: Option<&str>, missing_credentials: bool) -> Self {
        let severity = if missing_credentials {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let mut alert = Alert::new("News collection failed", "Collecting articles failed.", severity)
            .detail("error", error);
        if let Some(keyword) = keyword {
            alert = alert.detail("keyword", keyword);
        }
        alert
    }

    pub fn run_summary(report_date: NaiveDate, collected: usize, analyzed: usize, sent: usize, failed: usize) -> Self {
        let attempted = sent + failed;
        let severity = match failed {
            0 => Severity::Info,
            _ if failed == attempted => Severity::Critical,
            _ => Severity::Warning,
        };
        Alert::new(
            format!("Daily run {}", report_date),
            format!("{} sent, {} failed out of {} recipients.", sent, failed, attempted),
            severity,
        )
        .detail("collected", collected)
        .detail("analyzed", analyzed)
        .detail("sent", sent)
        .detail("failed", failed)
    }
}

#[async_trait::async_trait]
pub trait Alerter: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log at a level matching their severity.
#[derive(Debug, Default, Clone)]
pub struct LogAlerter;

#[async_trait::async_trait]
impl Alerter for LogAlerter {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let details = alert
            .details
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        match alert.severity {
            Severity::Info => info!(title = %alert.title, %details, "{}", alert.message),
            Severity::Warning => warn!(title = %alert.title, %details, "{}", alert.message),
            Severity::Error | Severity::Critical => {
                error!(severity = %alert.severity, title = %alert.title, %details, "{}", alert.message)
            }
        }
        Ok(())
    }
}

/// Mails alerts at or above `min_severity` to the administrator, and logs every alert.
pub struct EmailAlerter {
    transport: Arc<dyn Transport>,
    admin_email: String,
    subject_prefix: String,
    min_severity: Severity,
}

impl EmailAlerter {
    pub fn new(transport: Arc<dyn Transport>, admin_email: impl Into<String>, subject_prefix: impl Into<String>) -> Self {
        Self {
            transport,
            admin_email: admin_email.into(),
            subject_prefix: subject_prefix.into(),
            min_severity: Severity::Info,
        }
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    fn body(alert: &Alert) -> String {
        let rows: String = alert
            .details
            .iter()
            .map(|(k, v)| format!("<tr><th>{}</th><td>{}</td></tr>", escape_html(k), escape_html(v)))
            .collect();
        format!(
            "<html><body><h2>[{}] {}</h2><p>{}</p><table>{}</table><p><small>{}</small></p></body></html>",
            alert.severity,
            escape_html(&alert.title),
            escape_html(&alert.message),
            rows,
            alert.timestamp.to_rfc3339()
        )
    }
}

#[async_trait::async_trait]
impl Alerter for EmailAlerter {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        LogAlerter.notify(alert).await?;
        if alert.severity < self.min_severity {
            return Ok(());
        }
        let subject = format!("[{}][{}] {}", self.subject_prefix, alert.severity, alert.title);
        let outcome = self
            .transport
            .send(&self.admin_email, &subject, &Self::body(alert))
            .await;
        if !outcome.success {
            anyhow::bail!(
                "alert mail to {} failed: {}",
                self.admin_email,
                outcome.error.unwrap_or_default()
            );
        }
        Ok(())
    }
}

/// Deliver an alert, logging instead of propagating any alerter failure.
pub async fn dispatch(alerter: &dyn Alerter, alert: Alert) {
    if let Err(e) = alerter.notify(&alert).await {
        error!(%e, title = %alert.title, "failed to deliver alert");
    }
}
