use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use metrelay_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup;

/// Default config folder, relative to the working directory.
const DEFAULT_CONFIG_DIR: &str = ".metrelay";

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let matches = make_app().get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .map_or(Path::new(DEFAULT_CONFIG_DIR), PathBuf::as_path);

    let mut config = Config::from_path(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    if let Some(matches) = matches.subcommand_matches("run") {
        config.apply_override(extract_config_args(matches))?;
        metrelay_log::init(config.logging());
        run(config)
    } else if let Some(matches) = matches.subcommand_matches("config") {
        manage_config(&config, matches)
    } else {
        unreachable!();
    }
}

/// Extracts config overrides from the arguments of `run`.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let get = |name: &str| matches.get_one::<String>(name).cloned();

    OverridableConfig {
        host: get("host"),
        port: get("port"),
        write_path: get("write-path"),
        filter_mode: get("filter-mode"),
        filter_names: get("filter-names"),
        namespace: get("namespace"),
        hub: get("hub"),
        key_name: get("key-name"),
        key_value: get("key-value"),
        connection_string: get("connection-string"),
        tenant_id: get("tenant-id"),
        client_id: get("client-id"),
        client_secret: get("client-secret"),
        cert_path: get("cert-path"),
        cert_password: get("cert-password"),
        batch: get("batch"),
        partition_key_label: get("partition-key-label"),
        serializer: get("serializer"),
        log_level: get("log-level"),
        statsd: get("statsd"),
        shutdown_timeout: get("shutdown-timeout"),
    }
}

pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    if let Some(matches) = matches.subcommand_matches("show") {
        let output = match matches.get_one::<String>("format").map(String::as_str) {
            Some("debug") => format!("{config:#?}"),
            _ => config.to_yaml_string()?,
        };

        #[allow(clippy::print_stdout)]
        {
            print!("{output}");
        }
        Ok(())
    } else {
        unreachable!();
    }
}

pub fn run(config: Config) -> Result<()> {
    setup::dump_spawn_infos(&config);
    let metrics = setup::init_metrics(&config);
    metrelay_server::run(config, metrics)?;
    Ok(())
}
