//! Password reset codes.
//!
//! A code is an 8-digit string tied to one account and valid for a short
//! window (five minutes by default). [`ResetWorkflow`] drives the three steps:
//! issue and mail a code, verify it against the caller's email, and consume it
//! while overwriting the password. Expiry is checked on every read; nothing
//! purges stale rows in the background.

use once_cell::sync::Lazy;
use regex::Regex;

pub mod code;
pub mod ledger;
pub mod password;
pub mod workflow;

pub use ledger::{Clock, IssuedCode, Ledger, SystemClock};
pub use password::PasswordStorage;
pub use workflow::{ResetError, ResetWorkflow};

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Normalize an email for lookup and comparison.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}
