use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ingestion data formats understood by the downstream data explorer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Comma separated values.
    Csv,
    /// JSON objects.
    Json,
    /// Avro container files.
    Avro,
    /// No format.
    #[default]
    None,
}

impl DataFormat {
    /// Returns the identifier sent with each message. Empty for [`DataFormat::None`].
    pub fn as_str(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
            DataFormat::Avro => "avro",
            DataFormat::None => "",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`DataFormat`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown data format {0:?}")]
pub struct ParseDataFormatError(String);

impl FromStr for DataFormat {
    type Err = ParseDataFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "json" => Ok(DataFormat::Json),
            "avro" => Ok(DataFormat::Avro),
            other => Err(ParseDataFormatError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("JSON".parse(), Ok(DataFormat::Json));
        assert_eq!("avro".parse(), Ok(DataFormat::Avro));
        assert!("parquet".parse::<DataFormat>().is_err());
        assert_eq!(DataFormat::None.to_string(), "");
    }
}
