//! Reply and EHLO capability parsing.

/// A complete, possibly multi-line, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub(crate) code: u16,
    pub(crate) lines: Vec<String>,
}

impl Reply {
    pub(crate) fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }

    /// `"<code> <joined text>"`, suitable for error detail.
    pub(crate) fn summary(&self) -> String {
        format!("{} {}", self.code, self.lines.join(" ").trim())
    }
}

/// Split a reply line into its code, whether it ends the reply, and its text.
///
/// `250-PIPELINING` continues a reply; `250 OK` (or a bare `250`) ends it.
pub(crate) fn parse_line(line: &str) -> Option<(u16, bool, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code = line[..3].parse().ok()?;
    match bytes.get(3) {
        None => Some((code, true, "")),
        Some(b' ') => Some((code, true, &line[4..])),
        Some(b'-') => Some((code, false, &line[4..])),
        Some(_) => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthMechanism {
    Plain,
    Login,
    Other(String),
}

/// Capabilities advertised in an EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Extensions {
    pub(crate) starttls: bool,
    pub(crate) auth: Vec<AuthMechanism>,
}

impl Extensions {
    /// The first line is the server greeting; every following line names one
    /// extension and its parameters.
    pub(crate) fn from_ehlo(reply: &Reply) -> Self {
        let mut extensions = Self::default();
        for line in reply.lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            match keyword.to_ascii_uppercase().as_str() {
                "STARTTLS" => extensions.starttls = true,
                "AUTH" => {
                    extensions.auth = words
                        .map(|word| match word.to_ascii_uppercase().as_str() {
                            "PLAIN" => AuthMechanism::Plain,
                            "LOGIN" => AuthMechanism::Login,
                            other => AuthMechanism::Other(other.to_string()),
                        })
                        .collect();
                }
                _ => {}
            }
        }
        extensions
    }

    pub(crate) fn supports_auth(&self, mechanism: &AuthMechanism) -> bool {
        self.auth.contains(mechanism)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_variants() {
        assert_eq!(parse_line("250-PIPELINING"), Some((250, false, "PIPELINING")));
        assert_eq!(parse_line("250 OK"), Some((250, true, "OK")));
        assert_eq!(parse_line("354"), Some((354, true, "")));
        assert_eq!(parse_line("25"), None);
        assert_eq!(parse_line("abc def"), None);
        assert_eq!(parse_line("250xOK"), None);
    }

    #[test]
    fn ehlo_capabilities() {
        let reply = Reply {
            code: 250,
            lines: vec![
                "mx.example.com greets you".to_string(),
                "PIPELINING".to_string(),
                "STARTTLS".to_string(),
                "AUTH LOGIN plain XOAUTH2".to_string(),
            ],
        };
        let extensions = Extensions::from_ehlo(&reply);
        assert!(extensions.starttls);
        assert!(extensions.supports_auth(&AuthMechanism::Plain));
        assert!(extensions.supports_auth(&AuthMechanism::Login));
        assert!(extensions.supports_auth(&AuthMechanism::Other("XOAUTH2".to_string())));
    }

    #[test]
    fn ehlo_without_extensions() {
        let reply = Reply {
            code: 250,
            lines: vec!["mx.example.com".to_string()],
        };
        assert_eq!(Extensions::from_ehlo(&reply), Extensions::default());
    }

    #[test]
    fn summary_joins_lines() {
        let reply = Reply {
            code: 535,
            lines: vec!["5.7.8 Authentication".to_string(), "failed".to_string()],
        };
        assert_eq!(reply.summary(), "535 5.7.8 Authentication failed");
        assert!(!reply.is_positive());
    }
}
