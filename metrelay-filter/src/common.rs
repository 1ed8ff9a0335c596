use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// How the configured name list is applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Pass every point.
    None,
    /// Pass only listed names.
    Allow,
    /// Drop listed names.
    Deny,
}

impl FilterMode {
    /// Returns the configuration string of this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterMode::None => "none",
            FilterMode::Allow => "allow",
            FilterMode::Deny => "deny",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`FilterMode`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown filter mode")]
pub struct ParseFilterModeError;

impl FromStr for FilterMode {
    type Err = ParseFilterModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(FilterMode::None),
            "allow" => Ok(FilterMode::Allow),
            "deny" => Ok(FilterMode::Deny),
            _ => Err(ParseFilterModeError),
        }
    }
}

/// Identifies why a filter dropped a data point.
///
/// The identifier is used as a metric tag in kebab-case (e.g. "not-allowed").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Hash)]
pub enum FilterStatKey {
    /// The name is missing from the allow list.
    NotAllowed,
    /// The name is on the deny list.
    Denied,
}

impl FilterStatKey {
    /// Returns the string identifier of the filter stat key.
    pub fn name(self) -> &'static str {
        match self {
            FilterStatKey::NotAllowed => "not-allowed",
            FilterStatKey::Denied => "denied",
        }
    }
}

impl fmt::Display for FilterStatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!("Deny".parse(), Ok(FilterMode::Deny));
        assert_eq!(" allow ".parse(), Ok(FilterMode::Allow));
        assert_eq!("".parse(), Ok(FilterMode::None));
        assert_eq!("1".parse::<FilterMode>(), Err(ParseFilterModeError));
        assert_eq!(ParseFilterModeError.to_string(), "unknown filter mode");
    }
}
