use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::{debug, info};
use secrecy::ExposeSecret;

use crate::config::{NotificationConfig, SmtpSecurity};
use crate::error::ConfigError;
use crate::notify::error::NotificationError;
use crate::notify::message::OutboundMessage;
use crate::notify::Notifier;
use crate::sanitize::redact_email;

pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
    to: Vec<Mailbox>,
    host: String,
}

impl SmtpNotifier {
    pub fn from_config(config: &NotificationConfig) -> Result<Self, ConfigError> {
        let smtp = &config.smtp;
        let invalid = |field: &str, reason: String| ConfigError::InvalidValue {
            field: field.to_string(),
            reason,
        };

        let builder = match smtp.security {
            SmtpSecurity::StartTls => SmtpTransport::starttls_relay(&smtp.host)
                .map_err(|e| invalid("notification.smtp.host", e.to_string()))?,
            SmtpSecurity::Tls => SmtpTransport::relay(&smtp.host)
                .map_err(|e| invalid("notification.smtp.host", e.to_string()))?,
            SmtpSecurity::None => SmtpTransport::builder_dangerous(&smtp.host),
        };
        let mut builder = builder
            .port(smtp.port)
            .timeout(Some(Duration::from_secs(smtp.timeout_secs)));

        if !smtp.username.is_empty() {
            let password = smtp
                .password
                .resolve()
                .map_err(|source| ConfigError::Secret {
                    field: "notification.smtp.password".to_string(),
                    source,
                })?;
            builder = builder.credentials(Credentials::new(
                smtp.username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| invalid("notification.from", e.to_string()))?;
        let to = config
            .to
            .iter()
            .map(|addr| addr.parse::<Mailbox>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("notification.to", e.to_string()))?;

        info!(
            "SMTP notifier configured for {}:{} ({} recipient(s))",
            smtp.host,
            smtp.port,
            to.len()
        );

        Ok(Self {
            transport: builder.build(),
            from,
            to,
            host: smtp.host.clone(),
        })
    }

    fn build(&self, message: &OutboundMessage) -> Result<Message, NotificationError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(message.subject.clone());
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        Ok(builder
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())?)
    }
}

impl Notifier for SmtpNotifier {
    fn deliver(&self, message: &OutboundMessage) -> Result<(), NotificationError> {
        let email = self.build(message)?;
        let response = self.transport.send(&email)?;
        debug!(
            "SMTP accepted message for {}: {}",
            self.to
                .iter()
                .map(|m| redact_email(&m.email.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            response.code()
        );
        Ok(())
    }

    fn self_test(&self) -> Result<(), NotificationError> {
        debug!("Testing SMTP connection to {}", self.host);
        if self.transport.test_connection()? {
            Ok(())
        } else {
            Err(NotificationError::SelfTestRejected)
        }
    }
}
