//! # Passreset
//!
//! `passreset` issues short-lived numeric codes that let a user prove they
//! control the email address on their account, then overwrites the account
//! password once the code is presented back.
//!
//! ## Reset codes
//!
//! Codes are 8 decimal digits drawn from the OS random source and compared as
//! strings, so leading zeros matter. A code is valid while `now < expiration`
//! (five minutes by default). Verifying does not consume it; a successful
//! reset deletes it. Expired rows are never purged, only ignored.
//!
//! ## Mail transport
//!
//! Exactly one SMTP configuration is active at a time. It is read on every
//! send, so operators can swap relays without a restart. Port 587 means
//! STARTTLS and port 465 means implicit TLS; any other port is refused.
//! Failures report the dialogue stage that broke, never the credentials.
//!
//! ## Operators
//!
//! `/admin/*` routes take HTTP Basic credentials supplied on the command line
//! or through `PASSRESET_OPERATOR_USER` / `PASSRESET_OPERATOR_PASSWORD`.

pub mod api;
pub mod cli;
pub mod mail;
pub mod reset;
pub mod setup;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
