//! Interactive sessions between the host terminal and a container
//!
//! A [`Bridge`] opens a [`Transport`], puts the host terminal into raw mode
//! and copies bytes both ways until the remote side is done:
//!
//! - output ending first finishes the session;
//! - stdin ending first waits for the remaining output, unless cancelled;
//! - the terminal mode is restored however the session ends.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::engine::{ContainerEngine, ExecSpec, OutputStream, SessionStream};
use crate::error::{CanonError, Result};

pub mod resize;
pub mod terminal;
pub mod transport;

pub use resize::{sync_size, window_change_events, ResizeEvents, ResizeTask};
pub use terminal::{CrosstermTerminal, HostTerminal, RawModeGuard};
pub use transport::{AttachTransport, ExecTransport, Transport};

pub struct Bridge {
    engine: Arc<dyn ContainerEngine>,
    terminal: Arc<dyn HostTerminal>,
}

impl Bridge {
    pub fn new(engine: Arc<dyn ContainerEngine>, terminal: Arc<dyn HostTerminal>) -> Self {
        Self { engine, terminal }
    }

    /// Run one session to completion and report the remote exit code, if known
    pub async fn run<I, O, C>(
        &self,
        transport: Arc<dyn Transport>,
        stdin: I,
        stdout: O,
        resize_events: ResizeEvents,
        cancel: C,
    ) -> Result<Option<i64>>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
        C: Future<Output = ()>,
    {
        let SessionStream { output, input } = transport.open(self.engine.as_ref()).await?;

        sync_size(self.engine.as_ref(), self.terminal.as_ref(), transport.as_ref()).await?;
        let _resizer = ResizeTask::spawn(
            self.engine.clone(),
            self.terminal.clone(),
            transport.clone(),
            resize_events,
        );

        let _raw_mode = RawModeGuard::new(self.terminal.clone())?;

        let (out_tx, out_rx) = oneshot::channel();
        let (in_tx, in_rx) = oneshot::channel();
        let outbound = tokio::spawn(async move {
            let _ = out_tx.send(copy_output(output, stdout).await);
        });
        let inbound = tokio::spawn(async move {
            let _ = in_tx.send(copy_input(stdin, input).await);
        });
        let _copies = AbortOnDrop(vec![outbound.abort_handle(), inbound.abort_handle()]);

        transport.start(self.engine.as_ref()).await?;

        wait_for_completion(out_rx, in_rx, cancel).await?;

        match transport.exit_code(self.engine.as_ref()).await {
            Ok(code) => Ok(code),
            Err(e) => {
                log::debug!("Exit code unavailable: {}", e);
                Ok(None)
            }
        }
    }
}

/// Run a command in a ready container on the real terminal
pub async fn run_interactive<C>(
    engine: Arc<dyn ContainerEngine>,
    container_id: &str,
    exec: ExecSpec,
    cancel: C,
) -> Result<Option<i64>>
where
    C: Future<Output = ()>,
{
    let transport = Arc::new(ExecTransport::new(container_id, exec));
    let bridge = Bridge::new(engine, Arc::new(CrosstermTerminal));
    bridge
        .run(
            transport,
            tokio::io::stdin(),
            tokio::io::stdout(),
            window_change_events()?,
            cancel,
        )
        .await
}

struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

async fn copy_output<O>(mut output: OutputStream, mut stdout: O) -> Result<()>
where
    O: AsyncWrite + Unpin,
{
    while let Some(chunk) = output.next().await {
        stdout.write_all(&chunk?).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn copy_input<I>(mut stdin: I, mut remote: Pin<Box<dyn AsyncWrite + Send>>) -> Result<()>
where
    I: AsyncRead + Unpin,
{
    tokio::io::copy(&mut stdin, &mut remote).await?;
    if let Err(e) = remote.shutdown().await {
        log::debug!("Closing remote stdin failed: {}", e);
    }
    Ok(())
}

fn copy_outcome(outcome: std::result::Result<Result<()>, oneshot::error::RecvError>) -> Result<()> {
    outcome.unwrap_or_else(|_| {
        Err(CanonError::Io(std::io::Error::other(
            "copy task ended without reporting",
        )))
    })
}

async fn wait_for_completion<C>(
    mut out_rx: oneshot::Receiver<Result<()>>,
    in_rx: oneshot::Receiver<Result<()>>,
    cancel: C,
) -> Result<()>
where
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);

    tokio::select! {
        outcome = &mut out_rx => copy_outcome(outcome),
        outcome = in_rx => {
            copy_outcome(outcome)?;
            log::debug!("Input closed, draining output");
            tokio::select! {
                outcome = &mut out_rx => copy_outcome(outcome),
                _ = &mut cancel => Err(CanonError::Cancelled),
            }
        }
    }
}
