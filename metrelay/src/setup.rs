use metrelay_config::Config;
use metrelay_log::LogError;
use metrelay_statsd::{MetricsClient, MetricsClientConfig};

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        metrelay_log::info!("launching metrelay without config folder");
    } else {
        metrelay_log::info!(
            "launching metrelay from config folder {}",
            config.path().display()
        );
    }

    metrelay_log::info!("  version: {}", env!("CARGO_PKG_VERSION"));
    metrelay_log::info!("  listen address: {}", config.listen_addr());
    metrelay_log::info!("  write path: {}", config.write_path());
    metrelay_log::info!("  log level: {}", config.logging().level);

    let sink = config.sink();
    let mode = if sink.batch { "batch" } else { "single" };
    metrelay_log::info!("  delivery: {mode}, serializer {}", sink.serializer);
}

/// Initialize the metric system.
///
/// Without a configured StatsD server, all metrics are discarded. The same happens if the
/// client cannot be set up, after logging the error.
pub fn init_metrics(config: &Config) -> MetricsClient {
    let Some(host) = config.statsd_addr() else {
        return MetricsClient::noop();
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    let result = MetricsClient::from_config(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags,
        aggregate: config.metrics_aggregate(),
    });

    match result {
        Ok(client) => client,
        Err(error) => {
            metrelay_log::error!(
                "failed to set up metrics for {host}, metrics are disabled: {}",
                LogError(&error)
            );
            MetricsClient::noop()
        }
    }
}
