//! Implements sample filtering.
//!
//! Data points may be filtered by metric name against a configured list:
//!
//! * `none` passes every point
//! * `allow` passes only points whose name is in the list
//! * `deny` passes only points whose name is not in the list
//!
//! Names match exactly, ignoring ASCII case. Misconfiguration never fails startup, it degrades the
//! filter to `none` with a warning.
#![warn(missing_docs)]

mod common;
mod config;

pub use crate::common::*;
pub use crate::config::*;

use std::collections::HashSet;

use metrelay_protocol::DataPoint;

/// A compiled sample filter.
#[derive(Clone, Debug)]
pub struct SampleFilter {
    mode: FilterMode,
    names: HashSet<String>,
}

impl SampleFilter {
    /// Builds a filter from configuration, degrading invalid settings to [`FilterMode::None`].
    pub fn new(config: &FilterConfig) -> Self {
        let mode = match config.mode.parse::<FilterMode>() {
            Ok(mode) => mode,
            Err(_) => {
                metrelay_log::warn!(
                    mode = config.mode.as_str(),
                    "invalid filter mode, filtering disabled"
                );
                FilterMode::None
            }
        };

        let names: HashSet<String> = config
            .names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_ascii_lowercase())
            .collect();

        let mode = if mode != FilterMode::None && names.is_empty() {
            metrelay_log::warn!(
                mode = mode.as_str(),
                "filter mode requires a list of names, filtering disabled"
            );
            FilterMode::None
        } else {
            mode
        };

        if mode != FilterMode::None {
            metrelay_log::info!(mode = mode.as_str(), names = names.len(), "sample filter enabled");
        }

        Self { mode, names }
    }

    /// A filter that passes everything.
    pub fn disabled() -> Self {
        Self {
            mode: FilterMode::None,
            names: HashSet::new(),
        }
    }

    /// The effective mode after validation.
    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Checks whether a data point should be filtered.
    ///
    /// If the point should be dropped, the `Err` contains the reason.
    pub fn should_filter(&self, point: &DataPoint) -> Result<(), FilterStatKey> {
        self.check_name(point.name())
    }

    fn check_name(&self, name: &str) -> Result<(), FilterStatKey> {
        match self.mode {
            FilterMode::None => Ok(()),
            FilterMode::Allow if self.contains(name) => Ok(()),
            FilterMode::Allow => Err(FilterStatKey::NotAllowed),
            FilterMode::Deny if self.contains(name) => Err(FilterStatKey::Denied),
            FilterMode::Deny => Ok(()),
        }
    }

    fn contains(&self, name: &str) -> bool {
        // Avoid allocating when the name is already lowercase.
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.names.contains(&name.to_ascii_lowercase())
        } else {
            self.names.contains(name)
        }
    }
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self::disabled()
    }
}
