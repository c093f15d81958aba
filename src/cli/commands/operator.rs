use crate::setup::OperatorCredentials;
use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_OPERATOR_USER: &str = "operator-user";
pub const ARG_OPERATOR_PASSWORD: &str = "operator-password";

/// Read the operator credentials used for `/admin` routes and setup login.
///
/// # Errors
/// Returns an error if either value is missing or blank.
pub fn credentials(matches: &ArgMatches) -> Result<OperatorCredentials> {
    let read_required = |id: &str| -> Result<String> {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
    };

    Ok(OperatorCredentials::new(
        read_required(ARG_OPERATOR_USER)?,
        SecretString::from(read_required(ARG_OPERATOR_PASSWORD)?),
    ))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OPERATOR_USER)
                .long(ARG_OPERATOR_USER)
                .help("Operator username for /admin routes and setup login")
                .env("PASSRESET_OPERATOR_USER")
                .required(true),
        )
        .arg(
            Arg::new(ARG_OPERATOR_PASSWORD)
                .long(ARG_OPERATOR_PASSWORD)
                .help("Operator password")
                .env("PASSRESET_OPERATOR_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("passreset"))
    }

    #[test]
    fn reads_credentials() -> Result<()> {
        let matches = command().get_matches_from([
            "passreset",
            "--operator-user",
            "ops",
            "--operator-password",
            "s3cret",
        ]);
        let creds = credentials(&matches)?;
        assert_eq!(creds.username, "ops");
        assert_eq!(creds.password.expose_secret(), "s3cret");
        Ok(())
    }

    #[test]
    fn blank_password_is_rejected() {
        temp_env::with_vars(
            [
                ("PASSRESET_OPERATOR_USER", Some("ops")),
                ("PASSRESET_OPERATOR_PASSWORD", Some("  ")),
            ],
            || {
                let matches = command().get_matches_from(["passreset"]);
                assert!(credentials(&matches).is_err());
            },
        );
    }

    #[test]
    fn both_values_are_required() {
        temp_env::with_vars_unset(
            ["PASSRESET_OPERATOR_USER", "PASSRESET_OPERATOR_PASSWORD"],
            || {
                assert!(
                    command()
                        .try_get_matches_from(["passreset", "--operator-user", "ops"])
                        .is_err()
                );
            },
        );
    }
}
