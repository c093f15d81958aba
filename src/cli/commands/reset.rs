use crate::reset::PasswordStorage;
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_CODE_TTL_SECONDS: &str = "code-ttl-seconds";
pub const ARG_PASSWORD_STORAGE: &str = "password-storage";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub code_ttl_seconds: i64,
    pub password_storage: PasswordStorage,
}

impl Options {
    /// Parse reset-code arguments from matches.
    ///
    /// # Errors
    /// Returns an error if an argument is missing after defaults are applied.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let code_ttl_seconds = matches
            .get_one::<i64>(ARG_CODE_TTL_SECONDS)
            .copied()
            .context("missing required argument: --code-ttl-seconds")?;
        let password_storage = matches
            .get_one::<PasswordStorage>(ARG_PASSWORD_STORAGE)
            .copied()
            .unwrap_or_default();

        Ok(Self {
            code_ttl_seconds,
            password_storage,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CODE_TTL_SECONDS)
                .long(ARG_CODE_TTL_SECONDS)
                .help("How long a reset code stays valid, in seconds")
                .env("PASSRESET_CODE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..=86_400)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_STORAGE)
                .long(ARG_PASSWORD_STORAGE)
                .help("How new passwords are stored: argon2 or plaintext")
                .long_help(
                    "How new passwords are stored. `argon2` writes a PHC string; `plaintext` keeps the legacy format of account stores that never hashed.",
                )
                .env("PASSRESET_PASSWORD_STORAGE")
                .default_value("argon2")
                .value_parser(|value: &str| value.parse::<PasswordStorage>()),
        )
}
