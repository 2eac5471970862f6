use std::io;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use super::terminal::HostTerminal;
use super::transport::Transport;
use crate::engine::{ContainerEngine, EngineError};

/// Host terminal size change notifications
pub type ResizeEvents = BoxStream<'static, ()>;

/// SIGWINCH as a stream
pub fn window_change_events() -> io::Result<ResizeEvents> {
    use tokio::signal::unix::{signal, SignalKind};

    let signal = signal(SignalKind::window_change())?;
    Ok(futures_util::stream::unfold(signal, |mut signal| async move {
        signal.recv().await.map(|_| ((), signal))
    })
    .boxed())
}

/// Resize the remote pty to the host terminal once
///
/// Failures because the remote side is not running (yet, or anymore) are ignored.
pub async fn sync_size(
    engine: &dyn ContainerEngine,
    terminal: &dyn HostTerminal,
    transport: &dyn Transport,
) -> Result<(), EngineError> {
    let size = match terminal.size() {
        Ok(size) => size,
        Err(e) => {
            log::debug!("No host terminal size: {}", e);
            return Ok(());
        }
    };

    match transport.resize(engine, size).await {
        Err(e) if e.is_gone() => {
            log::debug!("Ignoring resize failure: {}", e);
            Ok(())
        }
        other => other,
    }
}

/// Re-issues resizes for every host resize event until dropped
pub struct ResizeTask {
    handle: JoinHandle<()>,
}

impl ResizeTask {
    pub fn spawn(
        engine: Arc<dyn ContainerEngine>,
        terminal: Arc<dyn HostTerminal>,
        transport: Arc<dyn Transport>,
        mut events: ResizeEvents,
    ) -> Self {
        let handle = tokio::spawn(async move {
            while events.next().await.is_some() {
                if let Err(e) = sync_size(engine.as_ref(), terminal.as_ref(), transport.as_ref()).await {
                    log::debug!("Resize failed: {}", e);
                }
            }
        });
        Self { handle }
    }
}

impl Drop for ResizeTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
