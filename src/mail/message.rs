use super::MailError;

/// Minimal plain-text message: `From`, `To` and `Subject` headers, a blank line, the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    from: String,
    to: String,
    subject: String,
    body: String,
}

impl Message {
    /// # Errors
    /// Returns [`MailError::InvalidMessage`] when a header value is empty where
    /// an address is required, or carries CR/LF.
    pub fn new(from: &str, to: &str, subject: &str, body: &str) -> Result<Self, MailError> {
        for (name, value) in [("From", from), ("To", to), ("Subject", subject)] {
            if value.contains(['\r', '\n']) {
                return Err(MailError::InvalidMessage(format!(
                    "{name} header contains a line break"
                )));
            }
        }
        for (name, value) in [("From", from), ("To", to)] {
            if value.trim().is_empty() {
                return Err(MailError::InvalidMessage(format!("{name} address is empty")));
            }
        }

        Ok(Self {
            from: from.trim().to_string(),
            to: to.trim().to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        })
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.from
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.to
    }

    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}",
            self.from, self.to, self.subject, self.body
        )
    }

    /// Payload for the DATA command: CRLF line endings, leading dots doubled,
    /// terminated by `.` on its own line.
    #[must_use]
    pub fn to_data(&self) -> Vec<u8> {
        let rendered = self.render();
        let mut data = String::with_capacity(rendered.len() + 8);
        for line in rendered.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.starts_with('.') {
                data.push('.');
            }
            data.push_str(line);
            data.push_str("\r\n");
        }
        data.push_str(".\r\n");
        data.into_bytes()
    }
}
