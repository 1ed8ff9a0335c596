use serde::{Deserialize, Serialize};

/// Configuration of the sample filter.
///
/// `mode` is kept as a free string so that unknown values degrade to `none` instead of failing to
/// parse the configuration file.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// One of `none`, `allow` or `deny`, case-insensitive.
    pub mode: String,
    /// Metric names the mode applies to.
    pub names: Vec<String>,
}

impl FilterConfig {
    /// Returns `true` if no filtering is configured.
    pub fn is_empty(&self) -> bool {
        self.mode.is_empty() && self.names.is_empty()
    }
}
