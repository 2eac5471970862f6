use std::sync::OnceLock;

use async_trait::async_trait;

use crate::engine::{ContainerEngine, EngineError, ExecSpec, SessionStream, TerminalSize};

/// How a session reaches the remote process
///
/// Calls arrive in order: `open`, then `start`, with `resize` at any time after
/// `open` and `exit_code` once the session has finished.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, engine: &dyn ContainerEngine) -> Result<SessionStream, EngineError>;

    async fn start(&self, engine: &dyn ContainerEngine) -> Result<(), EngineError>;

    async fn resize(&self, engine: &dyn ContainerEngine, size: TerminalSize) -> Result<(), EngineError>;

    async fn exit_code(&self, engine: &dyn ContainerEngine) -> Result<Option<i64>, EngineError>;
}

/// A new process in a running container
#[derive(Debug)]
pub struct ExecTransport {
    container_id: String,
    spec: ExecSpec,
    exec_id: OnceLock<String>,
}

impl ExecTransport {
    pub fn new(container_id: impl Into<String>, spec: ExecSpec) -> Self {
        Self {
            container_id: container_id.into(),
            spec,
            exec_id: OnceLock::new(),
        }
    }

    fn exec_id(&self) -> Result<&str, EngineError> {
        self.exec_id
            .get()
            .map(String::as_str)
            .ok_or_else(|| EngineError::NotFound("exec session not created yet".to_string()))
    }
}

#[async_trait]
impl Transport for ExecTransport {
    async fn open(&self, engine: &dyn ContainerEngine) -> Result<SessionStream, EngineError> {
        let exec_id = engine.create_exec(&self.container_id, &self.spec).await?;
        log::debug!("Created exec {} in {}", exec_id, self.container_id);
        let exec_id = self.exec_id.get_or_init(|| exec_id);
        engine.start_exec(exec_id, self.spec.tty).await
    }

    async fn start(&self, _engine: &dyn ContainerEngine) -> Result<(), EngineError> {
        // the engine runs the command as soon as the exec is attached
        Ok(())
    }

    async fn resize(&self, engine: &dyn ContainerEngine, size: TerminalSize) -> Result<(), EngineError> {
        engine.resize_exec(self.exec_id()?, size).await
    }

    async fn exit_code(&self, engine: &dyn ContainerEngine) -> Result<Option<i64>, EngineError> {
        engine.exec_exit_code(self.exec_id()?).await
    }
}

/// The primary process of a created container
#[derive(Debug)]
pub struct AttachTransport {
    container_id: String,
}

impl AttachTransport {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
        }
    }
}

#[async_trait]
impl Transport for AttachTransport {
    async fn open(&self, engine: &dyn ContainerEngine) -> Result<SessionStream, EngineError> {
        engine.attach_session(&self.container_id).await
    }

    async fn start(&self, engine: &dyn ContainerEngine) -> Result<(), EngineError> {
        match engine.start_container(&self.container_id).await {
            Err(EngineError::NotModified(_)) => {
                log::debug!("Container {} was already running", self.container_id);
                Ok(())
            }
            other => other,
        }
    }

    async fn resize(&self, engine: &dyn ContainerEngine, size: TerminalSize) -> Result<(), EngineError> {
        engine.resize_container(&self.container_id, size).await
    }

    async fn exit_code(&self, engine: &dyn ContainerEngine) -> Result<Option<i64>, EngineError> {
        Ok(engine.inspect_container(&self.container_id).await?.exit_code)
    }
}
