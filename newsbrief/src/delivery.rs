use anyhow::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::alert::{dispatch, Alert, Alerter};
use crate::digest::{Digest, DigestRenderer, HtmlDigestRenderer};
use crate::model::Recipient;
use crate::storage;
use crate::transport::{SendOutcome, Transport};

/// Counts for one delivery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub article_count: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Active recipients that already had a successful send for the date.
    pub skipped: usize,
}

/// Sends one digest per eligible recipient per reporting date.
///
/// Every attempt is written to `send_records` whatever its outcome; a
/// successful record is what keeps later runs from sending again.
pub struct DeliveryCoordinator {
    pool: SqlitePool,
    transport: Arc<dyn Transport>,
    renderer: Arc<dyn DigestRenderer>,
    alerter: Arc<dyn Alerter>,
    top_n: usize,
    subject_prefix: String,
    send_timeout: Duration,
}

impl DeliveryCoordinator {
    pub fn new(pool: SqlitePool, transport: Arc<dyn Transport>, alerter: Arc<dyn Alerter>) -> Self {
        Self {
            pool,
            transport,
            renderer: Arc::new(HtmlDigestRenderer),
            alerter,
            top_n: 5,
            subject_prefix: "NewsBrief".to_string(),
            send_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(
        pool: SqlitePool,
        config: &common::DeliveryConfig,
        transport: Arc<dyn Transport>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self::new(pool, transport, alerter)
            .with_top_n(config.top_n())
            .with_subject_prefix(config.subject_prefix())
            .with_send_timeout(Duration::from_secs(config.send_timeout_seconds()))
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DigestRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Build the digest for `report_date` and send it to every eligible recipient.
    ///
    /// Store errors abort the pass. A failed render or send only affects its
    /// own recipient: it is recorded, alerted, and the loop moves on.
    pub async fn deliver(&self, report_date: NaiveDate) -> Result<DeliveryReport> {
        let articles = storage::articles_for_day(&self.pool, report_date).await?;
        if articles.is_empty() {
            info!(%report_date, "no analyzed articles for date, nothing to deliver");
            return Ok(DeliveryReport::default());
        }

        let digest = Digest::build(report_date, articles, self.top_n);
        let subject = digest.subject(&self.subject_prefix);
        let recipients = storage::active_recipients(&self.pool).await?;

        let mut report = DeliveryReport {
            article_count: digest.len(),
            ..Default::default()
        };

        for recipient in &recipients {
            if storage::already_sent(&self.pool, recipient.id, report_date).await? {
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            let outcome = self.send_to(&digest, &subject, recipient).await;

            storage::record_send(
                &self.pool,
                recipient.id,
                report_date,
                &subject,
                digest.len(),
                outcome.success,
                outcome.error.as_deref(),
            )
            .await?;

            if outcome.success {
                report.succeeded += 1;
            } else {
                report.failed += 1;
                let reason = outcome.error.unwrap_or_default();
                error!(email = %recipient.email, %reason, "digest delivery failed");
                dispatch(
                    self.alerter.as_ref(),
                    Alert::delivery_failure(&recipient.email, &reason, report_date),
                )
                .await;
            }
        }

        if report.succeeded > 0 {
            storage::mark_articles_sent(&self.pool, &digest.article_ids()).await?;
        }

        info!(
            %report_date,
            articles = report.article_count,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "delivery finished"
        );
        Ok(report)
    }

    async fn send_to(&self, digest: &Digest, subject: &str, recipient: &Recipient) -> SendOutcome {
        let body = match self.renderer.render(digest, recipient) {
            Ok(body) => body,
            Err(e) => return SendOutcome::failed(format!("render failed: {:#}", e)),
        };
        match tokio::time::timeout(
            self.send_timeout,
            self.transport.send(&recipient.email, subject, &body),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::failed(format!("send timed out after {:?}", self.send_timeout)),
        }
    }
}
