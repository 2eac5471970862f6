use std::future::Future;
use std::sync::Arc;

use super::CommandContext;
use crate::bridge::run_interactive;
use crate::config::Profile;
use crate::engine::{ContainerEngine, ExecSpec};
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::registry::check_image_drift;

#[cfg(target_os = "macos")]
const DOCKER_DESKTOP_SSH_SOCKET: &str = "/run/host-services/ssh-auth.sock";

/// The SSH agent socket as seen by the container engine
pub fn ssh_socket() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        Some(DOCKER_DESKTOP_SSH_SOCKET.to_string())
    }
    #[cfg(not(target_os = "macos"))]
    {
        std::env::var("SSH_AUTH_SOCK").ok().filter(|s| !s.is_empty())
    }
}

/// Resolves on SIGTERM or SIGHUP
pub async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(mut term), Ok(mut hup)) => {
            tokio::select! {
                _ = term.recv() => log::debug!("Received SIGTERM"),
                _ = hup.recv() => log::debug!("Received SIGHUP"),
            }
        }
        _ => {
            log::debug!("Could not install termination handlers");
            std::future::pending::<()>().await
        }
    }
}

/// Handle `canon shell`, `canon run` and bare commands on the host terminal
///
/// Returns the exit code of the remote command.
pub async fn handle_session<C>(
    ctx: &CommandContext,
    profile: &Profile,
    argv: Vec<String>,
    ssh_socket: Option<String>,
    cancel: C,
) -> Result<i32>
where
    C: Future<Output = ()>,
{
    run_session(ctx, profile, argv, ssh_socket, |engine, container_id, exec| async move {
        run_interactive(engine, &container_id, exec, cancel).await
    })
    .await
}

/// Acquire a container, hand it to `session` and release it again
///
/// One-shot containers are released whether or not the session succeeded.
pub async fn run_session<S, F>(
    ctx: &CommandContext,
    profile: &Profile,
    argv: Vec<String>,
    ssh_socket: Option<String>,
    session: S,
) -> Result<i32>
where
    S: FnOnce(Arc<dyn ContainerEngine>, String, ExecSpec) -> F,
    F: Future<Output = Result<Option<i64>>>,
{
    let updater = Arc::new(ctx.updater());
    if let Err(e) = updater.auto_check(profile).await {
        eprintln!("WARNING: image update check failed: {}", e);
    }

    let orchestrator = Orchestrator::new(ctx.engine.clone(), updater, ctx.host.clone(), ctx.out.clone());
    let prepared = orchestrator
        .prepare_session(profile, &ctx.cwd, ssh_socket.as_deref(), argv)
        .await?;
    let container_id = prepared.container.id.clone();

    if prepared.container.reused {
        match check_image_drift(ctx.engine.as_ref(), &container_id).await {
            Ok(true) => eprintln!(
                "WARNING: the image for {} has been updated since this container was created, terminate it to use the new image",
                profile.key()
            ),
            Ok(false) => {}
            Err(e) => log::debug!("Image drift check failed: {}", e),
        }
    }

    let outcome = session(ctx.engine.clone(), container_id.clone(), prepared.exec).await;
    let released = orchestrator
        .release_container(&container_id, profile.persistent)
        .await;

    let exit_code = match (outcome, released) {
        (Ok(code), released) => {
            released?;
            code
        }
        (Err(e), Err(release_error)) => {
            log::debug!("Releasing {} after a failed session: {}", container_id, release_error);
            return Err(e);
        }
        (Err(e), Ok(())) => return Err(e),
    };
    Ok(exit_code.map(|code| i32::try_from(code).unwrap_or(1)).unwrap_or(0))
}
