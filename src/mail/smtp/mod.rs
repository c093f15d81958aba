//! SMTP client dialogue used for delivery and connectivity probes.

use base64::{Engine, engine::general_purpose::STANDARD};
use secrecy::ExposeSecret;
use std::{future::Future, time::Duration};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{MailError, Message, Security, SmtpSettings, Stage, TransportConfig};

mod reply;
mod stream;

use reply::{AuthMechanism, Extensions, Reply, parse_line};
use stream::SmtpStream;

/// Where to connect and how to secure the session.
#[derive(Debug, Clone, Copy)]
struct Endpoint<'a> {
    host: &'a str,
    port: u16,
    security: Security,
}

impl<'a> Endpoint<'a> {
    /// Unknown ports are refused here, before touching the network.
    fn of(config: &'a TransportConfig) -> Result<Self, MailError> {
        Ok(Self {
            host: &config.host,
            port: config.port,
            security: config.security()?,
        })
    }
}

/// Deliver `message` through `config`.
pub(crate) async fn deliver(
    config: &TransportConfig,
    message: &Message,
    settings: &SmtpSettings,
) -> Result<(), MailError> {
    deliver_to(Endpoint::of(config)?, config, message, settings).await
}

async fn deliver_to(
    endpoint: Endpoint<'_>,
    config: &TransportConfig,
    message: &Message,
    settings: &SmtpSettings,
) -> Result<(), MailError> {
    let mut session = Session::open(endpoint, config, settings).await?;

    session
        .expect(
            Stage::MailFrom,
            &format!("MAIL FROM:<{}>", message.sender()),
            &[250],
        )
        .await?;
    session
        .expect(
            Stage::RcptTo,
            &format!("RCPT TO:<{}>", message.recipient()),
            &[250, 251],
        )
        .await?;
    session.expect(Stage::Data, "DATA", &[354]).await?;
    session.send_data(&message.to_data()).await?;

    session.quit().await;
    Ok(())
}

/// Connect, negotiate encryption, authenticate and have the sender accepted,
/// then reset and leave without submitting anything.
pub(crate) async fn probe(config: &TransportConfig, settings: &SmtpSettings) -> Result<(), MailError> {
    probe_at(Endpoint::of(config)?, config, settings).await
}

async fn probe_at(
    endpoint: Endpoint<'_>,
    config: &TransportConfig,
    settings: &SmtpSettings,
) -> Result<(), MailError> {
    let mut session = Session::open(endpoint, config, settings).await?;

    session
        .expect(
            Stage::MailFrom,
            &format!("MAIL FROM:<{}>", config.from_email.trim()),
            &[250],
        )
        .await?;

    if let Err(err) = session.command(Stage::Reset, "RSET").await {
        debug!("RSET after probe failed: {err}");
    }
    session.quit().await;
    Ok(())
}

struct Session {
    stream: SmtpStream,
    op_timeout: Duration,
}

impl Session {
    async fn open(
        endpoint: Endpoint<'_>,
        config: &TransportConfig,
        settings: &SmtpSettings,
    ) -> Result<Self, MailError> {
        let security = endpoint.security;
        let op_timeout = settings.timeout();

        let stream = bounded(
            Stage::Connect,
            op_timeout,
            stream::connect(endpoint.host, endpoint.port),
        )
        .await?;

        let stream = match security {
            Security::ImplicitTls => {
                bounded(
                    Stage::TlsHandshake,
                    op_timeout,
                    stream.upgrade_to_tls(endpoint.host),
                )
                .await?
            }
            Security::StartTls => stream,
        };

        let mut session = Self { stream, op_timeout };

        let greeting = session.read_reply(Stage::Greeting).await?;
        if greeting.code != 220 {
            return Err(MailError::at(Stage::Greeting, greeting.summary()));
        }

        let mut extensions = session.ehlo(settings.hello_name()).await?;

        if security == Security::StartTls {
            if extensions.starttls {
                session.expect(Stage::StartTls, "STARTTLS", &[220]).await?;
                session = session.upgrade(endpoint.host).await?;
                extensions = session.ehlo(settings.hello_name()).await?;
            } else if settings.require_starttls() {
                return Err(MailError::at(
                    Stage::StartTls,
                    "server does not advertise STARTTLS",
                ));
            } else {
                warn!(
                    host = endpoint.host,
                    "SMTP server does not advertise STARTTLS, continuing without encryption"
                );
            }
        }

        debug!(tls = session.stream.is_tls(), "SMTP session negotiated");

        if !session.stream.is_tls() && !is_localhost(endpoint.host) {
            return Err(MailError::at(
                Stage::Auth,
                "refusing to authenticate over an unencrypted connection",
            ));
        }

        session.authenticate(config, &extensions).await?;
        Ok(session)
    }

    async fn upgrade(self, host: &str) -> Result<Self, MailError> {
        let stream = bounded(
            Stage::TlsHandshake,
            self.op_timeout,
            self.stream.upgrade_to_tls(host),
        )
        .await?;
        Ok(Self {
            stream,
            op_timeout: self.op_timeout,
        })
    }

    async fn ehlo(&mut self, hello_name: &str) -> Result<Extensions, MailError> {
        let reply = self
            .expect(Stage::Hello, &format!("EHLO {hello_name}"), &[250])
            .await?;
        Ok(Extensions::from_ehlo(&reply))
    }

    async fn authenticate(
        &mut self,
        config: &TransportConfig,
        extensions: &Extensions,
    ) -> Result<(), MailError> {
        let username = config.username.as_str();
        let password = config.password.expose_secret();

        let use_login = extensions.supports_auth(&AuthMechanism::Login)
            && !extensions.supports_auth(&AuthMechanism::Plain);

        if use_login {
            self.expect(Stage::Auth, "AUTH LOGIN", &[334]).await?;
            self.expect_secret(&STANDARD.encode(username), &[334]).await?;
            self.expect_secret(&STANDARD.encode(password), &[235]).await?;
        } else {
            let credentials = STANDARD.encode(format!("\0{username}\0{password}"));
            self.expect_secret(&format!("AUTH PLAIN {credentials}"), &[235])
                .await?;
        }

        debug!("SMTP authentication accepted");
        Ok(())
    }

    /// Like [`Self::expect`] but keeps the sent line out of logs.
    async fn expect_secret(&mut self, line: &str, accepted: &[u16]) -> Result<Reply, MailError> {
        self.write_line(Stage::Auth, line).await?;
        let reply = self.read_reply(Stage::Auth).await?;
        if accepted.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(MailError::at(Stage::Auth, reply.summary()))
        }
    }

    async fn expect(
        &mut self,
        stage: Stage,
        line: &str,
        accepted: &[u16],
    ) -> Result<Reply, MailError> {
        let reply = self.command(stage, line).await?;
        if accepted.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(MailError::at(stage, reply.summary()))
        }
    }

    async fn command(&mut self, stage: Stage, line: &str) -> Result<Reply, MailError> {
        debug!(smtp.command = line, "SMTP >");
        self.write_line(stage, line).await?;
        self.read_reply(stage).await
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), MailError> {
        bounded(Stage::Data, self.op_timeout, self.stream.write_all(data)).await?;
        let reply = self.read_reply(Stage::Data).await?;
        if reply.code == 250 {
            Ok(())
        } else {
            Err(MailError::at(Stage::Data, reply.summary()))
        }
    }

    async fn write_line(&mut self, stage: Stage, line: &str) -> Result<(), MailError> {
        let payload = format!("{line}\r\n");
        bounded(stage, self.op_timeout, self.stream.write_all(payload.as_bytes())).await
    }

    async fn read_reply(&mut self, stage: Stage) -> Result<Reply, MailError> {
        let mut lines = Vec::new();
        loop {
            let line = bounded(stage, self.op_timeout, self.stream.read_line()).await?;
            let (code, last, text) = parse_line(&line)
                .ok_or_else(|| MailError::at(stage, format!("malformed reply line: {line}")))?;
            lines.push(text.to_string());
            if last {
                let reply = Reply { code, lines };
                debug!(smtp.reply = reply.code, positive = reply.is_positive(), "SMTP <");
                return Ok(reply);
            }
        }
    }

    /// Best effort; the message is already accepted at this point.
    async fn quit(mut self) {
        if let Err(err) = self.command(Stage::Quit, "QUIT").await {
            debug!("QUIT failed: {err}");
        }
    }
}

/// Credentials may cross an unencrypted socket only to these hosts.
fn is_localhost(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

async fn bounded<T, F>(stage: Stage, limit: Duration, future: F) -> Result<T, MailError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(limit, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(MailError::at(stage, err)),
        Err(_) => Err(MailError::Timeout { stage }),
    }
}
