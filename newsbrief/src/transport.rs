use anyhow::{Context, Result};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport as LettreSmtp, Transport as _};
use std::time::Duration;
use tracing::{info, warn};

/// Result of one send attempt. Transports report failures here rather than
/// returning errors so that callers can always record the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> SendOutcome;
}

#[derive(Debug, Clone)]
struct SmtpSettings {
    host: String,
    port: u16,
    username: String,
    password: String,
    from: Mailbox,
    timeout: Duration,
}

/// SMTP delivery through lettre. Port 465 uses implicit TLS, anything else STARTTLS.
pub struct SmtpTransport {
    settings: Option<SmtpSettings>,
}

impl SmtpTransport {
    pub fn from_config(config: &common::DeliveryConfig) -> Self {
        match Self::settings(config) {
            Ok(settings) => Self {
                settings: Some(settings),
            },
            Err(e) => {
                warn!(%e, "SMTP transport not configured, sends will be recorded as failed");
                Self { settings: None }
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.settings.is_some()
    }

    fn settings(config: &common::DeliveryConfig) -> Result<SmtpSettings> {
        let host = config.smtp_host.clone().context("delivery.smtp_host is not set")?;
        let username = config.username.clone().unwrap_or_default();
        let password = common::secret_from_env(config.password_env.as_deref()).unwrap_or_default();
        let address = config
            .from_address
            .clone()
            .or_else(|| (!username.is_empty()).then(|| username.clone()))
            .context("delivery.from_address is not set")?;
        let from = Mailbox::new(
            config.sender_name.clone(),
            address
                .parse::<lettre::Address>()
                .with_context(|| format!("invalid from address: {}", address))?,
        );

        Ok(SmtpSettings {
            host,
            port: config.smtp_port.unwrap_or(587),
            username,
            password,
            from,
            timeout: Duration::from_secs(config.send_timeout_seconds()),
        })
    }
}

fn send_blocking(settings: &SmtpSettings, to: &str, subject: &str, html_body: &str) -> Result<()> {
    let builder = if settings.port == 465 {
        LettreSmtp::relay(&settings.host)
    } else {
        LettreSmtp::starttls_relay(&settings.host)
    }
    .with_context(|| format!("SMTP relay error for {}", settings.host))?;

    let mut builder = builder.port(settings.port).timeout(Some(settings.timeout));
    if !settings.username.is_empty() {
        builder = builder.credentials(Credentials::new(
            settings.username.clone(),
            settings.password.clone(),
        ));
    }
    let transport = builder.build();

    let email = Message::builder()
        .from(settings.from.clone())
        .to(to.parse::<Mailbox>().with_context(|| format!("invalid recipient address: {}", to))?)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html_body.to_string())
        .context("failed to build email")?;

    transport.send(&email).context("SMTP send failed")?;
    Ok(())
}

#[async_trait::async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> SendOutcome {
        let settings = match &self.settings {
            Some(s) => s.clone(),
            None => return SendOutcome::failed("SMTP transport is not configured"),
        };
        let (to, subject, body) = (to.to_string(), subject.to_string(), html_body.to_string());

        let result = tokio::task::spawn_blocking(move || {
            send_blocking(&settings, &to, &subject, &body).map(|_| to)
        })
        .await;

        match result {
            Ok(Ok(to)) => {
                info!(%to, "email sent");
                SendOutcome::ok()
            }
            Ok(Err(e)) => SendOutcome::failed(format!("{:#}", e)),
            Err(e) => SendOutcome::failed(format!("send task failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_transport_reports_failure() {
        let transport = SmtpTransport::from_config(&common::DeliveryConfig::default());
        assert!(!transport.is_configured());
        let outcome = transport.send("a@example.com", "s", "<p>b</p>").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not configured"));
    }

    #[test]
    fn from_address_falls_back_to_username() {
        let config = common::DeliveryConfig {
            smtp_host: Some("smtp.example.com".into()),
            username: Some("bot@example.com".into()),
            sender_name: Some("News Bot".into()),
            ..Default::default()
        };
        let transport = SmtpTransport::from_config(&config);
        let settings = transport.settings.unwrap();
        assert_eq!(settings.from.email.to_string(), "bot@example.com");
        assert_eq!(settings.port, 587);
    }
}
