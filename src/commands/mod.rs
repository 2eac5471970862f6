// Command handlers module
// One handler per CLI subcommand, sharing a CommandContext

use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::ContainerEngine;
use crate::orchestrator::HostContext;
use crate::update::Updater;
use crate::LineSink;

pub mod config;
pub mod list;
pub mod session;
pub mod stop;
pub mod update;

pub use config::*;
pub use list::*;
pub use session::*;
pub use stop::*;
pub use update::*;

/// What every handler needs from the invocation
#[derive(Clone)]
pub struct CommandContext {
    pub engine: Arc<dyn ContainerEngine>,
    pub host: HostContext,
    pub cwd: PathBuf,
    pub out: LineSink,
}

impl CommandContext {
    pub fn new(engine: Arc<dyn ContainerEngine>, host: HostContext, cwd: PathBuf, out: LineSink) -> Self {
        Self {
            engine,
            host,
            cwd,
            out,
        }
    }

    pub fn updater(&self) -> Updater {
        Updater::new(
            self.engine.clone(),
            Updater::default_cache_dir(&self.host.home),
            self.out.clone(),
        )
    }
}
