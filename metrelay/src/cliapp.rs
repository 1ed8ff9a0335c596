//! This module implements the definition of the command line app.

use std::path::PathBuf;

use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command, value_parser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Metrelay forwards Prometheus remote write requests to Azure Event Hubs.";

/// Settings that can be overridden on the command line of `run`.
///
/// Tuples of the long flag, environment variable and help text.
pub const OVERRIDES: &[(&str, &str, &str)] = &[
    ("host", "METRELAY_HOST", "The host the server binds to."),
    ("port", "METRELAY_PORT", "The port the server binds to."),
    (
        "write-path",
        "METRELAY_WRITE_PATH",
        "The path of the remote write endpoint.",
    ),
    (
        "filter-mode",
        "METRELAY_FILTER_MODE",
        "Filter mode, either allow or deny.",
    ),
    (
        "filter-names",
        "METRELAY_FILTER_NAMES",
        "Comma-separated metric names for the filter.",
    ),
    (
        "namespace",
        "METRELAY_NAMESPACE",
        "The event hub namespace, either a name or a fully qualified host.",
    ),
    ("hub", "METRELAY_HUB", "The name of the event hub."),
    (
        "key-name",
        "METRELAY_KEY_NAME",
        "The name of the shared access policy.",
    ),
    (
        "key-value",
        "METRELAY_KEY_VALUE",
        "The key of the shared access policy.",
    ),
    (
        "connection-string",
        "METRELAY_CONNECTION_STRING",
        "The connection string of the event hub namespace or hub.",
    ),
    (
        "tenant-id",
        "METRELAY_TENANT_ID",
        "The directory tenant of the service principal.",
    ),
    (
        "client-id",
        "METRELAY_CLIENT_ID",
        "The application id of the service principal.",
    ),
    (
        "client-secret",
        "METRELAY_CLIENT_SECRET",
        "The secret of the service principal.",
    ),
    (
        "cert-path",
        "METRELAY_CERT_PATH",
        "Path to a PEM bundle with the service principal certificate and key.",
    ),
    (
        "cert-password",
        "METRELAY_CERT_PASSWORD",
        "The password of the private key in the certificate bundle.",
    ),
    (
        "batch",
        "METRELAY_BATCH",
        "Send all samples of a request in one call, true or false.",
    ),
    (
        "partition-key-label",
        "METRELAY_PARTITION_KEY_LABEL",
        "Name of the label whose value becomes the partition key.",
    ),
    (
        "serializer",
        "METRELAY_SERIALIZER",
        "The payload serializer, json or avro-json.",
    ),
    ("log-level", "METRELAY_LOG_LEVEL", "The log level."),
    (
        "statsd",
        "METRELAY_STATSD",
        "Address of a StatsD server for internal metrics.",
    ),
    (
        "shutdown-timeout",
        "METRELAY_SHUTDOWN_TIMEOUT",
        "Seconds to wait for in-flight requests on shutdown.",
    ),
];

fn override_arg(name: &'static str, env: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .env(env)
        .help(help)
        .value_parser(ValueParser::string())
}

pub fn make_app() -> Command {
    let run = Command::new("run")
        .about("Run metrelay")
        .after_help(
            "This runs metrelay in the foreground until it's shut down. It connects to the \
             configured event hub first and then binds to the configured port and network \
             interface.",
        )
        .args(
            OVERRIDES
                .iter()
                .map(|&(name, env, help)| override_arg(name, env, help)),
        );

    Command::new("metrelay")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .env("METRELAY_CONFIG")
                .value_parser(value_parser!(PathBuf))
                .help("The path to the config folder."),
        )
        .subcommand(run)
        .subcommand(
            Command::new("config")
                .about("Manage the metrelay config")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the effective config with secrets redacted")
                        .arg(
                            Arg::new("format")
                                .short('f')
                                .long("format")
                                .value_parser(["yaml", "debug"])
                                .default_value("yaml")
                                .action(ArgAction::Set)
                                .help("The output format"),
                        ),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_definition() {
        make_app().debug_assert();
    }

    #[test]
    fn test_long_flags() {
        let matches = make_app()
            .try_get_matches_from([
                "metrelay",
                "run",
                "--filter-names",
                "up,down",
                "--write-path",
                "/receive",
            ])
            .unwrap();

        let run = matches.subcommand_matches("run").unwrap();
        assert_eq!(
            run.get_one::<String>("filter-names").map(String::as_str),
            Some("up,down")
        );
        assert_eq!(
            run.get_one::<String>("write-path").map(String::as_str),
            Some("/receive")
        );
    }

    #[test]
    fn test_subcommand_required() {
        assert!(make_app().try_get_matches_from(["metrelay"]).is_err());
    }
}
