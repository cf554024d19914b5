use crate::config::DEFAULT_CONFIG_PATH;
use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    value_parser, Arg, ArgAction, ColorChoice, Command,
};
use std::path::PathBuf;

pub const ARG_CONFIG: &str = "config";
pub const ARG_VERBOSITY: &str = "verbosity";

/// Accepts a level name or its index: error=0 .. trace=4.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> std::result::Result<u8, String> {
        match level.to_lowercase().as_str() {
            "error" | "0" => Ok(0),
            "warn" | "1" => Ok(1),
            "info" | "2" => Ok(2),
            "debug" | "3" => Ok(3),
            "trace" | "4" | "5" => Ok(4),
            _ => Err(format!("invalid log level: {level}")),
        }
    })
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    Command::new("custodian")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(ARG_CONFIG)
                .short('c')
                .long("config")
                .help("Path to the YAML configuration file")
                .default_value(DEFAULT_CONFIG_PATH)
                .env("CUSTODIAN_CONFIG")
                .global(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("CUSTODIAN_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .subcommand(
            Command::new("serve")
                .about("Keep every outbound token renewed until SIGINT or SIGTERM"),
        )
        .subcommand(
            Command::new("token")
                .about("Print the access token of an outbound identity")
                .arg(
                    Arg::new("id")
                        .help("Identity id from auth.client.oauth")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("issue")
                .about("Issue a locally signed JWT")
                .arg(
                    Arg::new("claims")
                        .long("claims")
                        .help("Claims as a JSON object, example: '{\"sub\":\"svc\"}'")
                        .default_value("{}"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a token and print its claims")
                .arg(
                    Arg::new("token")
                        .help("Raw JWT, without the Bearer prefix")
                        .env("CUSTODIAN_TOKEN")
                        .hide_env_values(true)
                        .required(true),
                )
                .arg(
                    Arg::new("inbound")
                        .long("inbound")
                        .help("Verify against the issuer's JWKS instead of the local signing key")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("role")
                        .long("role")
                        .help("Require one of these roles in the token's roles claim")
                        .requires("inbound")
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("secrets")
                .about("List the keys stored at a Vault path")
                .arg(
                    Arg::new("path")
                        .help("Secret path, example: secret/data/billing")
                        .required(true),
                ),
        )
}
