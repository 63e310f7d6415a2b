use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::LoaderError;

/// Which Webin server a call goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Live,
}

impl Environment {
    pub fn is_dev(self) -> bool {
        matches!(self, Environment::Dev)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Dev => write!(f, "dev"),
            Environment::Live => write!(f, "live"),
        }
    }
}

impl FromStr for Environment {
    type Err = LoaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "test" => Ok(Environment::Dev),
            "live" | "prod" => Ok(Environment::Live),
            _ => Err(LoaderError::InvalidEnvironment(value.to_string())),
        }
    }
}

/// Protocol key of a registrable object. Selects the multipart field name,
/// the checkpoint file and the receipt element that carries the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Study,
    Sample,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Study => "study",
            ObjectKind::Sample => "sample",
        }
    }

    pub fn field_name(self) -> &'static str {
        match self {
            ObjectKind::Study => "STUDY",
            ObjectKind::Sample => "SAMPLE",
        }
    }

    pub fn element_tag(self) -> &'static str {
        self.field_name()
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HoldDate(NaiveDate);

impl HoldDate {
    pub fn today() -> Self {
        Self(chrono::Local::now().date_naive())
    }
}

impl fmt::Display for HoldDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for HoldDate {
    type Err = LoaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| LoaderError::InvalidHoldDate(value.to_string()))
    }
}

/// Severity tag shared by receipt messages and webin-cli report lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Info,
    Warning,
    Error,
    /// A report line that did not look like a log line.
    Unknown,
    /// The tool left no report behind.
    NoReport,
    Other(String),
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Unknown => "UNKNOWN",
            Severity::NoReport => "NOREPORT",
            Severity::Other(value) => value.as_str(),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for Severity {
    fn from(value: &str) -> Self {
        match value.trim() {
            "INFO" => Severity::Info,
            "WARNING" | "WARN" => Severity::Warning,
            "ERROR" => Severity::Error,
            "UNKNOWN" => Severity::Unknown,
            "NOREPORT" => Severity::NoReport,
            other => Severity::Other(other.to_string()),
        }
    }
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        Severity::from(value.as_str())
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_environment() {
        assert_eq!("live".parse::<Environment>().unwrap(), Environment::Live);
        assert_eq!(" Dev ".parse::<Environment>().unwrap(), Environment::Dev);
        let err = "staging".parse::<Environment>().unwrap_err();
        assert_matches!(err, LoaderError::InvalidEnvironment(_));
    }

    #[test]
    fn parse_hold_date() {
        let date: HoldDate = "2025-12-31".parse().unwrap();
        assert_eq!(date.to_string(), "2025-12-31");
        let err = "31.12.2025".parse::<HoldDate>().unwrap_err();
        assert_matches!(err, LoaderError::InvalidHoldDate(_));
    }

    #[test]
    fn severity_keeps_unrecognised_tags() {
        assert_eq!(Severity::from("ERROR "), Severity::Error);
        assert_eq!(Severity::from("FATAL"), Severity::Other("FATAL".to_string()));
        assert_eq!(String::from(Severity::NoReport), "NOREPORT");
    }

    #[test]
    fn object_kind_protocol_keys() {
        assert_eq!(ObjectKind::Sample.field_name(), "SAMPLE");
        assert_eq!(ObjectKind::Study.as_str(), "study");
        assert_eq!(ObjectKind::Study.element_tag(), "STUDY");
    }
}
