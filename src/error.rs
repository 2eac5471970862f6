use std::fmt;
use std::path::PathBuf;

use crate::engine::EngineError;

/// One failed target of a multi-container operation
#[derive(Debug)]
pub struct TargetFailure {
    pub target: String,
    pub error: EngineError,
}

/// Errors collected across every target of a multi-container operation
#[derive(Debug, Default)]
pub struct MultiError {
    pub failures: Vec<TargetFailure>,
}

impl MultiError {
    pub fn push(&mut self, target: impl Into<String>, error: EngineError) {
        self.failures.push(TargetFailure {
            target: target.into(),
            error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.target, failure.error))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Errors surfaced by canon operations
#[derive(Debug, thiserror::Error)]
pub enum CanonError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No profile named {0}")]
    UnknownProfile(String),
    #[error("Current directory {cwd} is not within the current profile's path {root}")]
    OutsideProfileRoot { cwd: PathBuf, root: PathBuf },
    #[error("More than one container exists for profile {0}, please terminate all containers and retry")]
    AmbiguousPersistent(String),
    #[error("Existing container settings for {0} don't match current settings, please terminate all containers and retry")]
    SettingsDrift(String),
    #[error("Container {id} has a missing or malformed '{label}' label, please terminate it and retry")]
    MalformedLabel { id: String, label: String },
    #[error("Multiple matching containers found, please retry with '--all' option")]
    AmbiguousTarget,
    #[error("Invalid {what} '{value}': {reason}")]
    InvalidName {
        what: &'static str,
        value: String,
        reason: String,
    },
    #[error("Container output closed before it reported ready")]
    NotReady,
    #[error("Interactive session cancelled")]
    Cancelled,
    #[error("Another canon process is holding {0}")]
    Locked(PathBuf),
    #[error("Could not determine the home directory")]
    NoHomeDir,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Failed on {count} container(s): {0}", count = .0.failures.len())]
    Multiple(MultiError),
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T, E = CanonError> = std::result::Result<T, E>;
