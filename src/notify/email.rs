//! Outbound mail. `Mailer` is the seam the engine depends on; the SMTP
//! transport is the production implementation, the log mailer carries
//! deployments with no SMTP configured, and the in-memory mailer backs
//! tests.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::error::MailError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| MailError::Config(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            ))
            .build();
        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        let mut builder = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| MailError::InvalidAddress(self.from_address.clone()))?,
            )
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML);
        for addr in &email.to {
            builder = builder.to(addr
                .parse()
                .map_err(|_| MailError::InvalidAddress(addr.clone()))?);
        }
        let message = builder
            .body(email.html_body)
            .map_err(|e| MailError::Config(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Used when no SMTP transport is configured: logs the message instead
/// of delivering it, so the engine still records dispatches.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        info!(
            to = email.to.join(", "),
            subject = %email.subject,
            "smtp not configured, logging instead of sending"
        );
        Ok(())
    }
}

/// Captures sent mail for assertions.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    /// When set, every send fails with a transport error.
    pub fail_sends: std::sync::atomic::AtomicBool,
}

impl MemoryMailer {
    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        if self.fail_sends.load(std::sync::atomic::Ordering::SeqCst) {
            warn!("memory mailer configured to fail");
            return Err(MailError::Transport("simulated failure".to_string()));
        }
        self.sent.lock().await.push(email);
        Ok(())
    }
}
