//! SMTP delivery (spec.md §4.6): OTP codes and post-verification
//! confirmation mail with the assembled card document attached.
//!
//! Configuration is validated eagerly at construction — a missing host,
//! user, or credential means `Mailer::new` builds a mailer with no
//! transport, and every `send_*` call returns `Unconfigured` immediately
//! instead of attempting (and hanging on) a connection.

use lettre::message::{header::ContentType, Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from_name: String,
    pub timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mailer not configured: {0}")]
    Unconfigured(String),
    /// Timeout, connection refused, TLS error — safe to retry.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Recipient refused, authentication failed — retrying won't help.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl MailError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MailError::Transport(_))
    }
}

pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
    timeout: Duration,
    config_problem: Option<String>,
}

impl Mailer {
    pub fn new(settings: &SmtpSettings) -> Self {
        if settings.host.trim().is_empty() {
            return Self::unconfigured("SMTP_HOST is not set");
        }
        if settings.user.trim().is_empty() {
            return Self::unconfigured("SMTP_USER is not set");
        }
        if settings.pass.trim().is_empty() {
            return Self::unconfigured("SMTP_PASS is not set");
        }

        let from = match format!("{} <{}>", settings.from_name, settings.user).parse() {
            Ok(mailbox) => mailbox,
            Err(e) => return Self::unconfigured(&format!("invalid from address: {e}")),
        };

        let transport = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host) {
            Ok(builder) => builder
                .port(settings.port)
                .credentials(Credentials::new(settings.user.clone(), settings.pass.clone()))
                .timeout(Some(Duration::from_secs(settings.timeout_secs)))
                .build(),
            Err(e) => return Self::unconfigured(&format!("invalid SMTP host: {e}")),
        };

        Self {
            transport: Some(transport),
            from,
            timeout: Duration::from_secs(settings.timeout_secs),
            config_problem: None,
        }
    }

    /// `Some(reason)` if this mailer has no transport, so callers can decide
    /// how to handle a send up front instead of awaiting one just to learn
    /// it was never going to leave the process.
    pub fn configuration_error(&self) -> Option<&str> {
        self.config_problem.as_deref()
    }

    fn unconfigured(reason: &str) -> Self {
        Self {
            transport: None,
            from: "unconfigured@localhost".parse().expect("valid placeholder mailbox"),
            timeout: Duration::from_secs(20),
            config_problem: Some(reason.to_string()),
        }
    }

    pub async fn send_otp(&self, to_email: &str, code: &str, ttl_minutes: i64) -> Result<(), MailError> {
        let Some(transport) = &self.transport else {
            return Err(MailError::Unconfigured(
                self.config_problem.clone().unwrap_or_default(),
            ));
        };

        let to: Mailbox = to_email
            .parse()
            .map_err(|e| MailError::Rejected(format!("invalid recipient address: {e}")))?;

        let text = format!(
            "Your verification code is {code}.\nIt expires in {ttl_minutes} minutes.\nIf you did not request this, ignore this email."
        );
        let html = format!(
            "<p>Your verification code is <strong>{code}</strong>.</p><p>It expires in {ttl_minutes} minutes.</p>"
        );

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Your registration verification code")
            .multipart(MultiPart::alternative().singlepart(text_part(text)).singlepart(html_part(html)))
            .map_err(|e| MailError::Rejected(e.to_string()))?;

        self.deliver(transport, message).await
    }

    pub async fn send_confirmation(
        &self,
        to_email: &str,
        team_id: &str,
        team_code: &str,
        member_names: &[String],
        attachment_path: &Path,
    ) -> Result<(), MailError> {
        let Some(transport) = &self.transport else {
            return Err(MailError::Unconfigured(
                self.config_problem.clone().unwrap_or_default(),
            ));
        };

        let to: Mailbox = to_email
            .parse()
            .map_err(|e| MailError::Rejected(format!("invalid recipient address: {e}")))?;

        let roster = member_names.join(", ");
        let text = format!(
            "You're registered!\n\nTeam ID: {team_id}\nTeam code: {team_code}\nMembers: {roster}\n\nYour ID cards are attached. Bring the card with your QR code to check in at the venue."
        );
        let html = format!(
            "<p>You're registered!</p><p><strong>Team ID:</strong> {team_id}<br><strong>Team code:</strong> {team_code}<br><strong>Members:</strong> {roster}</p><p>Your ID cards are attached. Bring the card with your QR code to check in at the venue.</p>"
        );

        let attachment_bytes = tokio::fs::read(attachment_path)
            .await
            .map_err(|e| MailError::Transport(format!("failed to read attachment: {e}")))?;
        let attachment = Attachment::new(format!("{team_id}-id-cards.pdf"))
            .body(attachment_bytes, ContentType::parse("application/pdf").expect("valid mime"));

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Your hackathon registration is confirmed")
            .multipart(
                MultiPart::mixed().multipart(
                    MultiPart::alternative()
                        .singlepart(text_part(text))
                        .singlepart(html_part(html)),
                ).singlepart(attachment),
            )
            .map_err(|e| MailError::Rejected(e.to_string()))?;

        self.deliver(transport, message).await
    }

    async fn deliver(
        &self,
        transport: &AsyncSmtpTransport<Tokio1Executor>,
        message: Message,
    ) -> Result<(), MailError> {
        match tokio::time::timeout(self.timeout, transport.send(message)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.is_permanent() || e.is_client() => {
                Err(MailError::Rejected(e.to_string()))
            }
            Ok(Err(e)) => Err(MailError::Transport(e.to_string())),
            Err(_elapsed) => Err(MailError::Transport("smtp send timed out".into())),
        }
    }
}

fn text_part(body: String) -> SinglePart {
    SinglePart::builder().header(ContentType::TEXT_PLAIN).body(body)
}

fn html_part(body: String) -> SinglePart {
    SinglePart::builder().header(ContentType::TEXT_HTML).body(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_host_is_unconfigured() {
        let settings = SmtpSettings {
            host: String::new(),
            port: 587,
            user: "user@example.com".into(),
            pass: "secret".into(),
            from_name: "Hackathon".into(),
            timeout_secs: 20,
        };
        let mailer = Mailer::new(&settings);
        let err = mailer.send_otp("a@x.io", "123456", 5).await.unwrap_err();
        assert!(matches!(err, MailError::Unconfigured(_)));
    }

    #[tokio::test]
    async fn missing_credentials_is_unconfigured() {
        let settings = SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            user: String::new(),
            pass: String::new(),
            from_name: "Hackathon".into(),
            timeout_secs: 20,
        };
        let mailer = Mailer::new(&settings);
        let err = mailer
            .send_confirmation("a@x.io", "HACK-001", "TEAM-AB12CD", &[], Path::new("/nonexistent"))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Unconfigured(_)));
    }
}
