//! Notification delivery for flagged devices

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::models::{DeliveryReport, RecipientDelivery};

/// Outbound mail transport
///
/// `connect` is called once per send and opens the session every
/// `deliver` of that send goes through.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Establish (or verify) the session with the server
    async fn connect(&self) -> Result<()>;

    /// Deliver one message to one recipient
    async fn deliver(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}

/// SMTP relay with STARTTLS
///
/// Backed by a single-connection pool: the session opened by `connect` is
/// kept and reused by each delivery.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| Error::config(format!("invalid from_address: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| Error::config(format!("invalid smtp_host: {e}")))?
            .port(config.smtp_port)
            .timeout(Some(config.send_timeout))
            .pool_config(PoolConfig::new().min_idle(0).max_size(1));

        if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn connect(&self) -> Result<()> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Notification("SMTP server refused the connection".into())),
            Err(e) => Err(Error::Notification(e.to_string())),
        }
    }

    async fn deliver(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| Error::Notification(format!("invalid recipient {recipient}: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| Error::Notification(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::Notification(e.to_string()))?;
        Ok(())
    }
}

/// Transport used when mail is disabled; every message is logged and accepted
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl MailTransport for LogMailer {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn deliver(&self, recipient: &str, subject: &str, _body: &str) -> Result<()> {
        info!(recipient, subject, "Mail delivery disabled, notification logged");
        Ok(())
    }
}

/// Sends one notification to a recipient list, tolerating per-recipient failures
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    default_recipients: Vec<String>,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        default_recipients: Vec<String>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            default_recipients,
            send_timeout,
        }
    }

    /// Build from configuration: SMTP when enabled, logging otherwise
    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        let transport: Arc<dyn MailTransport> = if config.enabled {
            Arc::new(SmtpMailer::new(config)?)
        } else {
            Arc::new(LogMailer)
        };

        Ok(Self::new(
            transport,
            config.default_recipients.clone(),
            config.send_timeout,
        ))
    }

    /// Deliver `title` as subject and body; empty `recipients` uses the defaults
    ///
    /// Never fails: transport problems are reported in the returned report.
    /// Not idempotent, so callers should not retry it.
    pub async fn send(&self, title: &str, recipients: &[String]) -> DeliveryReport {
        let recipients = if recipients.is_empty() {
            self.default_recipients.clone()
        } else {
            recipients.to_vec()
        };
        let total = recipients.len();

        if let Err(e) = self.bounded("smtp connect", self.transport.connect()).await {
            warn!(error = %e, recipients = total, "Could not open mail session");
            let message = e.to_string();
            return DeliveryReport {
                success: false,
                total_recipients: total,
                emails_sent: 0,
                emails_failed: total,
                recipients: recipients
                    .into_iter()
                    .map(|recipient| RecipientDelivery {
                        recipient,
                        delivered: false,
                        error: Some(message.clone()),
                    })
                    .collect(),
                error: Some(message),
            };
        }

        let mut deliveries = Vec::with_capacity(total);
        for recipient in recipients {
            let outcome = self
                .bounded("smtp send", self.transport.deliver(&recipient, title, title))
                .await;

            match outcome {
                Ok(()) => {
                    debug!(recipient = %recipient, "Notification sent");
                    deliveries.push(RecipientDelivery {
                        recipient,
                        delivered: true,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "Notification failed");
                    deliveries.push(RecipientDelivery {
                        recipient,
                        delivered: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let sent = deliveries.iter().filter(|d| d.delivered).count();
        info!(title, sent, failed = total - sent, "Notification dispatched");

        DeliveryReport {
            success: sent > 0,
            total_recipients: total,
            emails_sent: sent,
            emails_failed: total - sent,
            recipients: deliveries,
            error: None,
        }
    }

    async fn bounded<F>(&self, operation: &str, fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        tokio::time::timeout(self.send_timeout, fut)
            .await
            .map_err(|_| Error::timeout(operation))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedMailer;

    fn dispatcher(mailer: Arc<ScriptedMailer>) -> NotificationDispatcher {
        NotificationDispatcher::new(
            mailer,
            vec!["fallback@example.com".to_string()],
            Duration::from_secs(5),
        )
    }

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_delivering() {
        let mailer = Arc::new(ScriptedMailer::default().failing_for("b@example.com"));
        let report = dispatcher(mailer.clone())
            .send("Alert", &addresses(&["a@example.com", "b@example.com", "c@example.com"]))
            .await;

        assert!(report.success);
        assert_eq!(report.total_recipients, 3);
        assert_eq!(report.emails_sent, 2);
        assert_eq!(report.emails_failed, 1);
        assert!(!report.recipients[1].delivered);
        assert_eq!(mailer.delivered_to(), addresses(&["a@example.com", "c@example.com"]));
    }

    #[tokio::test]
    async fn test_one_session_per_notification() {
        let mailer = Arc::new(ScriptedMailer::default().failing_for("b@example.com"));
        let dispatcher = dispatcher(mailer.clone());

        dispatcher
            .send("Alert", &addresses(&["a@example.com", "b@example.com", "c@example.com"]))
            .await;
        assert_eq!(mailer.sessions(), 1);

        dispatcher.send("Alert", &addresses(&["a@example.com"])).await;
        assert_eq!(mailer.sessions(), 2);
    }

    #[tokio::test]
    async fn test_smtp_mailer_builds_without_connecting() {
        let config = NotificationConfig {
            smtp_host: "smtp.invalid".to_string(),
            ..Default::default()
        };
        assert!(SmtpMailer::new(&config).is_ok());

        let bad_sender = NotificationConfig {
            from_address: "not an address".to_string(),
            ..Default::default()
        };
        assert!(matches!(SmtpMailer::new(&bad_sender), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_connection_failure_fails_everyone() {
        let mailer = Arc::new(ScriptedMailer::default().unreachable());
        let report = dispatcher(mailer.clone())
            .send("Alert", &addresses(&["a@example.com", "b@example.com"]))
            .await;

        assert!(!report.success);
        assert_eq!(report.emails_sent, 0);
        assert_eq!(report.emails_failed, 2);
        assert!(report.error.is_some());
        assert!(mailer.delivered_to().is_empty());
    }

    #[tokio::test]
    async fn test_empty_recipients_use_default() {
        let mailer = Arc::new(ScriptedMailer::default());
        let report = dispatcher(mailer.clone()).send("Alert", &[]).await;

        assert_eq!(report.total_recipients, 1);
        assert_eq!(mailer.delivered_to(), addresses(&["fallback@example.com"]));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let mailer = Arc::new(ScriptedMailer::default().with_delay(Duration::from_secs(30)));
        let dispatcher = NotificationDispatcher::new(mailer, vec![], Duration::from_millis(20));
        let report = dispatcher.send("Alert", &addresses(&["a@example.com"])).await;

        assert_eq!(report.emails_failed, 1);
        assert!(report.error.as_deref().is_some_and(|e| e.contains("Timed out")));
    }

    #[tokio::test]
    async fn test_disabled_mail_counts_as_sent() {
        let config = NotificationConfig {
            enabled: false,
            ..Default::default()
        };
        let report = NotificationDispatcher::from_config(&config)
            .unwrap()
            .send("Alert", &addresses(&["a@example.com"]))
            .await;

        assert_eq!(report.emails_sent, 1);
    }
}
