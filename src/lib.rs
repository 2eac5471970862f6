pub mod bridge;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod labels;
pub mod orchestrator;
pub mod registry;
pub mod update;

use std::sync::Arc;

pub use config::{Config, Overrides, Profile};
pub use engine::{ContainerEngine, DockerEngine, EngineError};
pub use error::{CanonError, Result};
pub use orchestrator::{HostContext, Orchestrator};
pub use update::{ImageDef, ImageProvider, Updater};

/// Receives user-facing progress lines
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// A [`LineSink`] printing to stdout
pub fn stdout_lines() -> LineSink {
    Arc::new(|line| println!("{}", line))
}
