pub mod health;
pub mod reset;
pub mod setup;
pub mod smtp;

pub use self::smtp::SmtpAdmin;

#[cfg(test)]
pub(crate) mod tests {
    use crate::mail::{MailError, MailSender, Stage};
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::{http::HeaderValue, response::Response};
    use base64::{Engine, engine::general_purpose::STANDARD};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        bodies: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingMailer {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn last_body(&self) -> String {
            self.bodies
                .lock()
                .ok()
                .and_then(|bodies| bodies.last().cloned())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl MailSender for RecordingMailer {
        async fn send(&self, _to: &str, _subject: &str, body: &str) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::at(Stage::Connect, "connection refused"));
            }
            if let Ok(mut bodies) = self.bodies.lock() {
                bodies.push(body.to_string());
            }
            Ok(())
        }
    }

    pub(crate) async fn read_json(response: Response) -> Result<serde_json::Value> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[allow(clippy::unwrap_used)]
    pub(crate) fn basic_auth(user: &str, pass: &str) -> HeaderValue {
        let encoded = STANDARD.encode(format!("{user}:{pass}"));
        format!("Basic {encoded}").parse().unwrap()
    }
}
