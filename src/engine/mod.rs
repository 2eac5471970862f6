//! Container engine abstraction
//!
//! Everything canon needs from the local container runtime goes through the
//! [`ContainerEngine`] trait. The production implementation talks to Docker via
//! bollard ([`DockerEngine`]); tests substitute an in-memory engine.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use tokio::io::AsyncWrite;

pub mod docker;

pub use docker::DockerEngine;

/// Errors reported by the container engine, classified by what callers can do about them
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("No such image: {0}")]
    ImageNotFound(String),
    #[error("Image platform mismatch: {0}")]
    PlatformMismatch(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not running: {0}")]
    NotRunning(String),
    #[error("Already in requested state: {0}")]
    NotModified(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Docker API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Docker error: {0}")]
    Other(String),
}

impl EngineError {
    /// Classify a server-side failure from its status code and message
    pub fn from_response(status: u16, message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("no such image") || lower.contains("pull access denied") {
            EngineError::ImageNotFound(message.to_string())
        } else if lower.contains("does not match the specified platform") {
            EngineError::PlatformMismatch(message.to_string())
        } else if lower.contains("cannot resize a stopped container")
            || lower.contains("is not running")
        {
            EngineError::NotRunning(message.to_string())
        } else if status == 404 || lower.contains("no such container") || lower.contains("no such exec") {
            EngineError::NotFound(message.to_string())
        } else if status == 304 {
            EngineError::NotModified(message.to_string())
        } else if status == 409 {
            if lower.contains("already in progress") {
                EngineError::NotFound(message.to_string())
            } else {
                EngineError::Conflict(message.to_string())
            }
        } else {
            EngineError::Api {
                status,
                message: message.to_string(),
            }
        }
    }

    /// The image is absent locally or present for the wrong platform; a pull can fix it
    pub fn is_missing_image(&self) -> bool {
        matches!(
            self,
            EngineError::ImageNotFound(_) | EngineError::PlatformMismatch(_)
        )
    }

    /// The target already went away (or is on its way out)
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_) | EngineError::NotRunning(_) | EngineError::NotModified(_)
        )
    }
}

/// A bind mount from the host into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to create a managed container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `os/arch`, e.g. `linux/arm64`
    pub platform: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub auto_remove: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreatedContainer {
    pub id: String,
    pub warnings: Vec<String>,
}

/// Parameters of an exec session inside a running container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    /// `user:group`
    pub user: String,
    pub working_dir: String,
    pub env: Vec<String>,
    pub tty: bool,
}

/// Label filter used when listing containers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerFilter {
    /// Each entry is either `key` (presence) or `key=value`
    pub labels: Vec<String>,
    /// Include stopped containers
    pub all: bool,
}

impl ContainerFilter {
    pub fn with_label(mut self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.labels.push(format!("{}={}", key, value)),
            None => self.labels.push(key.to_string()),
        }
        self
    }

    pub fn include_stopped(mut self) -> Self {
        self.all = true;
        self
    }

    /// Whether a label set satisfies every entry of this filter
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.labels.iter().all(|entry| match entry.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(entry),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    /// Engine state string: `created`, `running`, `exited`, ...
    pub state: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerDetails {
    pub id: String,
    /// Resolved image ID the container was created from
    pub image_id: String,
    /// Image reference from the container config
    pub image_ref: String,
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// One progress message from an image pull
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullProgress {
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
}

/// Rows and columns of a terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

/// De-multiplexed output of an attached container or exec session
pub type OutputStream = BoxStream<'static, Result<Bytes, EngineError>>;

/// Bidirectional stream of an attached session
pub struct SessionStream {
    pub output: OutputStream,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

impl std::fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStream")
            .field("output", &"<stream>")
            .field("input", &"<writer>")
            .finish()
    }
}

/// Operations canon performs against the local container runtime
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<CreatedContainer, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError>;

    /// Block until the container has been removed
    async fn wait_removed(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;

    /// Attach to the container's stdout/stderr without stdin
    async fn attach_output(&self, id: &str) -> Result<OutputStream, EngineError>;

    /// Attach stdin, stdout and stderr of the container's primary process
    async fn attach_session(&self, id: &str) -> Result<SessionStream, EngineError>;

    async fn resize_container(&self, id: &str, size: TerminalSize) -> Result<(), EngineError>;

    /// Returns the exec ID
    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String, EngineError>;

    /// Start an exec session and attach to it
    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<SessionStream, EngineError>;

    async fn resize_exec(&self, exec_id: &str, size: TerminalSize) -> Result<(), EngineError>;

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, EngineError>;

    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>, EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError>;

    /// Returns the image ID a reference currently resolves to
    async fn inspect_image(&self, reference: &str) -> Result<String, EngineError>;

    fn pull_image(&self, image: &str, platform: &str) -> BoxStream<'static, Result<PullProgress, EngineError>>;
}
