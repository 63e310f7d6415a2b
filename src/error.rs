use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::ObjectKind;

#[derive(Debug, Error, Diagnostic)]
pub enum LoaderError {
    #[error("invalid environment: {0} (expected dev or live)")]
    InvalidEnvironment(String),

    #[error("invalid hold date: {0} (expected YYYY-MM-DD)")]
    InvalidHoldDate(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse study input: {0}")]
    ConfigParse(String),

    #[error("invalid Webin credentials: {0}")]
    InvalidCredentials(String),

    #[error("registration request failed: {0}")]
    RegistrationHttp(String),

    #[error("registration endpoint returned status {status}: {message}")]
    RegistrationStatus { status: u16, message: String },

    #[error("malformed registration receipt: {0}")]
    MalformedReceipt(String),

    #[error("{kind} registration was rejected: {}", .messages.join("; "))]
    RegistrationRejected {
        kind: ObjectKind,
        messages: Vec<String>,
    },

    #[error("registered {kind} {alias} has no accession")]
    MissingAccession { kind: ObjectKind, alias: String },

    #[error("{0} does not have an assembly")]
    MissingArtifact(String),

    #[error("assembly directory {0} is claimed by more than one artifact")]
    DuplicateArtifact(String),

    #[error("worker pool failure: {0}")]
    WorkerPool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl LoaderError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LoaderError::InvalidEnvironment(_)
                | LoaderError::InvalidHoldDate(_)
                | LoaderError::ConfigRead(_)
                | LoaderError::ConfigParse(_)
                | LoaderError::InvalidCredentials(_)
                | LoaderError::MissingAccession { .. }
                | LoaderError::MissingArtifact(_)
                | LoaderError::DuplicateArtifact(_)
        )
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            LoaderError::RegistrationHttp(_)
                | LoaderError::RegistrationStatus { .. }
                | LoaderError::MalformedReceipt(_)
                | LoaderError::RegistrationRejected { .. }
        )
    }
}
