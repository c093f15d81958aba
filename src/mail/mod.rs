//! Outbound mail through the single active SMTP transport.
//!
//! The port picks the encryption mode: 587 upgrades a plain session with
//! STARTTLS, 465 wraps the socket in TLS before the first SMTP byte. Anything
//! else is refused before a socket is opened. The active configuration is read
//! from the store on every send, never cached.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{Instrument, debug, info_span};
use utoipa::ToSchema;

use crate::store::TransportStore;

mod message;
pub(crate) mod smtp;

pub use message::Message;

/// SMTP submission port using STARTTLS.
pub const PORT_SUBMISSION: u16 = 587;
/// SMTP submission port using implicit TLS.
pub const PORT_SUBMISSIONS: u16 = 465;

/// Connection parameters for one SMTP relay. Built once per send and never mutated.
#[derive(Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_email: String,
}

impl TransportConfig {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: SecretString,
        from_email: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password,
            from_email: from_email.into(),
        }
    }

    /// Encryption mode implied by the configured port.
    ///
    /// # Errors
    /// Returns [`MailError::UnsupportedPort`] for anything other than 587 or 465.
    pub fn security(&self) -> Result<Security, MailError> {
        Security::from_port(self.port)
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("from_email", &self.from_email)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Plain TCP, upgraded after EHLO when the server offers it.
    StartTls,
    /// TLS handshake before any SMTP dialogue.
    ImplicitTls,
}

impl Security {
    /// # Errors
    /// Returns [`MailError::UnsupportedPort`] for ports without a known convention.
    pub fn from_port(port: u16) -> Result<Self, MailError> {
        match port {
            PORT_SUBMISSION => Ok(Self::StartTls),
            PORT_SUBMISSIONS => Ok(Self::ImplicitTls),
            other => Err(MailError::UnsupportedPort(other)),
        }
    }
}

/// Step of the SMTP dialogue that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connect,
    TlsHandshake,
    Greeting,
    Hello,
    StartTls,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    Reset,
    Quit,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::TlsHandshake => "tls_handshake",
            Self::Greeting => "greeting",
            Self::Hello => "hello",
            Self::StartTls => "starttls",
            Self::Auth => "auth",
            Self::MailFrom => "mail_from",
            Self::RcptTo => "rcpt_to",
            Self::Data => "data",
            Self::Reset => "reset",
            Self::Quit => "quit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("no active mail transport is configured")]
    NoActiveTransport,
    #[error("unsupported SMTP port {0}, expected 587 (STARTTLS) or 465 (implicit TLS)")]
    UnsupportedPort(u16),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("SMTP {stage} failed: {detail}")]
    Stage { stage: Stage, detail: String },
    #[error("SMTP {stage} timed out")]
    Timeout { stage: Stage },
    #[error("failed to load the mail transport")]
    Store(#[source] anyhow::Error),
}

impl MailError {
    pub(crate) fn at(stage: Stage, detail: impl fmt::Display) -> Self {
        Self::Stage {
            stage,
            detail: detail.to_string(),
        }
    }

    /// Dialogue stage for stage-scoped failures.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } | Self::Timeout { stage } => Some(*stage),
            _ => None,
        }
    }
}

/// Tuning knobs shared by every SMTP dialogue.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    hello_name: String,
    timeout: Duration,
    require_starttls: bool,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtpSettings {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hello_name: "localhost".to_string(),
            timeout: Duration::from_secs(15),
            require_starttls: false,
        }
    }

    #[must_use]
    pub fn with_hello_name(mut self, name: impl Into<String>) -> Self {
        self.hello_name = name.into();
        self
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds);
        self
    }

    /// Refuse to continue on port 587 when STARTTLS is not advertised.
    #[must_use]
    pub fn with_require_starttls(mut self, require: bool) -> Self {
        self.require_starttls = require;
        self
    }

    #[must_use]
    pub fn hello_name(&self) -> &str {
        &self.hello_name
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn require_starttls(&self) -> bool {
        self.require_starttls
    }
}

#[async_trait]
pub trait MailSender: Send + Sync {
    /// Deliver a plain-text message to a single recipient.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Sends through whichever transport is active at the time of the call.
#[derive(Clone)]
pub struct SmtpMailer {
    transports: Arc<dyn TransportStore>,
    settings: SmtpSettings,
}

impl SmtpMailer {
    #[must_use]
    pub fn new(transports: Arc<dyn TransportStore>, settings: SmtpSettings) -> Self {
        Self {
            transports,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    /// Run the dialogue against `config` up to the sender acceptance, without
    /// submitting a message.
    ///
    /// # Errors
    /// Same failure modes as a real delivery.
    pub async fn test_connection(&self, config: &TransportConfig) -> Result<(), MailError> {
        let span = info_span!("smtp.probe", smtp.host = %config.host, smtp.port = config.port);
        smtp::probe(config, &self.settings).instrument(span).await
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let config = self
            .transports
            .active_transport()
            .await
            .map_err(MailError::Store)?
            .map(|stored| stored.config)
            .ok_or(MailError::NoActiveTransport)?;

        let message = Message::new(&config.from_email, to, subject, body)?;

        debug!(host = %config.host, port = config.port, "Sending mail");

        let span = info_span!("smtp.send", smtp.host = %config.host, smtp.port = config.port);
        smtp::deliver(&config, &message, &self.settings)
            .instrument(span)
            .await
    }
}
