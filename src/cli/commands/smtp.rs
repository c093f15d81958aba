use crate::mail::SmtpSettings;
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_SMTP_TIMEOUT_SECONDS: &str = "smtp-timeout-seconds";
pub const ARG_SMTP_HELLO_NAME: &str = "smtp-hello-name";
pub const ARG_SMTP_REQUIRE_STARTTLS: &str = "smtp-require-starttls";

/// Build the SMTP dialogue settings; missing values fall back to the defaults.
#[must_use]
pub fn settings(matches: &ArgMatches) -> SmtpSettings {
    let mut settings = SmtpSettings::new();

    if let Some(seconds) = matches.get_one::<u64>(ARG_SMTP_TIMEOUT_SECONDS) {
        settings = settings.with_timeout_seconds(*seconds);
    }
    if let Some(name) = matches
        .get_one::<String>(ARG_SMTP_HELLO_NAME)
        .filter(|name| !name.trim().is_empty())
    {
        settings = settings.with_hello_name(name.trim());
    }

    settings.with_require_starttls(matches.get_flag(ARG_SMTP_REQUIRE_STARTTLS))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_TIMEOUT_SECONDS)
                .long(ARG_SMTP_TIMEOUT_SECONDS)
                .help("Bound on connecting and on each SMTP reply, in seconds")
                .env("PASSRESET_SMTP_TIMEOUT_SECONDS")
                .default_value("15")
                .value_parser(clap::value_parser!(u64).range(1..=300)),
        )
        .arg(
            Arg::new(ARG_SMTP_HELLO_NAME)
                .long(ARG_SMTP_HELLO_NAME)
                .help("Name announced in EHLO")
                .env("PASSRESET_SMTP_HELLO_NAME")
                .default_value("localhost"),
        )
        .arg(
            Arg::new(ARG_SMTP_REQUIRE_STARTTLS)
                .long(ARG_SMTP_REQUIRE_STARTTLS)
                .help("Fail on port 587 when the server does not offer STARTTLS")
                .env("PASSRESET_SMTP_REQUIRE_STARTTLS")
                .action(ArgAction::SetTrue),
        )
}
