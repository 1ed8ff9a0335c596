//! Metrelay accepts samples from Prometheus through the remote write protocol and forwards them to
//! an Azure Event Hub.
//!
//! ```text
//! ┌────────────┐  remote write  ┌──────────┐  HTTPS  ┌───────────┐
//! │ Prometheus ├───────────────►│ metrelay ├────────►│ Event Hub │
//! └────────────┘                └──────────┘         └───────────┘
//! ```
//!
//! # Workspace Crates
//!
//! Metrelay is split into the following workspace crates:
//!
//!  - `metrelay`: Main entry point and command line interface.
//!  - [`metrelay-codec`]: Payload encodings of data points.
//!  - [`metrelay-config`]: Static configuration for the CLI and server.
//!  - [`metrelay-eventhub`]: Credentials, transport and dispatching to event hubs.
//!  - [`metrelay-filter`]: Allow and deny lists for metric names.
//!  - [`metrelay-log`]: Logging facade and subscriber setup.
//!  - [`metrelay-protocol`]: Data points and the remote write decoder.
//!  - [`metrelay-server`]: Endpoints, pipeline and throughput monitoring.
//!  - [`metrelay-statsd`]: Internal metrics sent to a StatsD server.
//!
//! [`metrelay-codec`]: ../metrelay_codec/index.html
//! [`metrelay-config`]: ../metrelay_config/index.html
//! [`metrelay-eventhub`]: ../metrelay_eventhub/index.html
//! [`metrelay-filter`]: ../metrelay_filter/index.html
//! [`metrelay-log`]: ../metrelay_log/index.html
//! [`metrelay-protocol`]: ../metrelay_protocol/index.html
//! [`metrelay-server`]: ../metrelay_server/index.html
//! [`metrelay-statsd`]: ../metrelay_statsd/index.html

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            metrelay_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
