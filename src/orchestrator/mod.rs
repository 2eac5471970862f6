//! Container lifecycle for a session
//!
//! [`Orchestrator::acquire_container`] reuses or creates the container a
//! profile runs in and waits until its setup script reports ready;
//! [`Orchestrator::release_container`] tears one-shot containers down again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Profile;
use crate::engine::{ContainerEngine, ContainerFilter, ContainerSpec, ExecSpec};
use crate::error::{CanonError, Result};
use crate::labels::{ManagedLabels, LABEL_PROFILE, LABEL_TYPE};
use crate::update::{ImageDef, ImageProvider};
use crate::LineSink;

pub mod mounts;
pub mod readiness;
pub mod setup;

pub use mounts::{container_workdir, plan_mounts, MountPlan, CANON_MOUNT_POINT};
pub use readiness::wait_for_ready;
pub use setup::{render_setup_script, READY_MARKER};

pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Facts about the invoking user that shape every container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    pub home: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

impl HostContext {
    pub fn current() -> Result<Self> {
        let home = dirs::home_dir().ok_or(CanonError::NoHomeDir)?;
        let (uid, gid) = setup::host_ids();
        Ok(Self { home, uid, gid })
    }
}

/// A container ready for exec sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredContainer {
    pub id: String,
    /// An existing persistent container was reused
    pub reused: bool,
}

/// Everything the interactive bridge needs to run a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSession {
    pub container: AcquiredContainer,
    pub exec: ExecSpec,
}

pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    images: Arc<dyn ImageProvider>,
    host: HostContext,
    echo: LineSink,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        images: Arc<dyn ImageProvider>,
        host: HostContext,
        echo: LineSink,
    ) -> Self {
        Self {
            engine,
            images,
            host,
            echo,
        }
    }

    /// Resolve the working directory, then acquire a container and describe the exec
    ///
    /// The working directory check runs first so a bad cwd never creates a container.
    pub async fn prepare_session(
        &self,
        profile: &Profile,
        cwd: &Path,
        ssh_socket: Option<&str>,
        command: Vec<String>,
    ) -> Result<PreparedSession> {
        let working_dir = container_workdir(&profile.path, cwd)?;
        let container = self.acquire_container(profile, ssh_socket).await?;

        let mut env = Vec::new();
        if profile.ssh {
            if let Some(socket) = ssh_socket.filter(|s| !s.is_empty()) {
                env.push(format!("SSH_AUTH_SOCK={}", socket));
            }
        }

        Ok(PreparedSession {
            container,
            exec: ExecSpec {
                cmd: command,
                user: profile.exec_user(),
                working_dir,
                env,
                tty: true,
            },
        })
    }

    /// Return a ready container for the profile
    pub async fn acquire_container(
        &self,
        profile: &Profile,
        ssh_socket: Option<&str>,
    ) -> Result<AcquiredContainer> {
        if profile.persistent {
            if let Some(id) = self.reuse_persistent(profile).await? {
                return Ok(AcquiredContainer { id, reused: true });
            }
        }

        let id = self.create_container(profile, ssh_socket).await?;
        Ok(AcquiredContainer { id, reused: false })
    }

    /// Stop a one-shot container and wait until the engine has removed it
    pub async fn release_container(&self, id: &str, persistent: bool) -> Result<()> {
        if persistent {
            return Ok(());
        }

        match self.engine.stop_container(id, STOP_TIMEOUT).await {
            Err(e) if e.is_gone() => {
                log::debug!("Container {} already stopped: {}", id, e);
            }
            other => other?,
        }

        match self.engine.wait_removed(id).await {
            Err(e) if e.is_gone() => {
                log::debug!("Container {} already removed: {}", id, e);
                Ok(())
            }
            other => Ok(other?),
        }
    }

    async fn reuse_persistent(&self, profile: &Profile) -> Result<Option<String>> {
        let key = profile.key();
        let filter = ContainerFilter::default()
            .with_label(LABEL_TYPE, Some("persistent"))
            .with_label(LABEL_PROFILE, Some(&key))
            .include_stopped();

        let mut matches = self.engine.list_containers(&filter).await?;
        if matches.len() > 1 {
            return Err(CanonError::AmbiguousPersistent(key));
        }
        let Some(existing) = matches.pop() else {
            log::debug!("No persistent container for {}", key);
            return Ok(None);
        };

        let labels = ManagedLabels::from_map(&existing.id, &existing.labels)?;
        let stored = labels.stored_profile(&existing.id)?;
        if stored != *profile {
            log::debug!("Stored profile for {} differs from the current one", key);
            return Err(CanonError::SettingsDrift(key));
        }

        if existing.state != "running" {
            log::info!("Starting stopped persistent container {}", existing.id);
            let mut output = self.engine.attach_output(&existing.id).await?;
            self.engine.start_container(&existing.id).await?;
            wait_for_ready(&mut output, |line| (self.echo)(line)).await?;
        } else {
            log::info!("Reusing persistent container {}", existing.id);
        }

        Ok(Some(existing.id))
    }

    fn container_spec(&self, profile: &Profile, ssh_socket: Option<&str>) -> Result<ContainerSpec> {
        let MountPlan { mounts, env } = plan_mounts(profile, &self.host.home, ssh_socket)?;
        let script = render_setup_script(&profile.user, &profile.group, self.host.uid, self.host.gid)?;

        Ok(ContainerSpec {
            name: container_name(profile),
            image: profile.image.clone(),
            platform: profile.platform(),
            cmd: vec!["bash".to_string(), "-c".to_string(), script],
            env,
            labels: ManagedLabels::for_profile(profile)?.to_map(),
            mounts,
            auto_remove: !profile.persistent,
        })
    }

    async fn create_container(&self, profile: &Profile, ssh_socket: Option<&str>) -> Result<String> {
        let spec = self.container_spec(profile, ssh_socket)?;

        let created = match self.engine.create_container(&spec).await {
            Ok(created) => created,
            Err(e) if e.is_missing_image() => {
                log::info!("Image {} unavailable for {}: {}", spec.image, spec.platform, e);
                self.images
                    .ensure_image(&ImageDef::new(&spec.image, &spec.platform))
                    .await?;
                self.engine.create_container(&spec).await?
            }
            Err(e) => return Err(e.into()),
        };

        for warning in &created.warnings {
            log::warn!("Warning during container creation: {}", warning);
        }
        (self.echo)(&format!("Started new container: {}", spec.name));

        if let Err(e) = self.start_and_wait(&created.id).await {
            if !profile.persistent {
                if let Err(cleanup) = self.engine.remove_container(&created.id, true).await {
                    log::debug!("Cleanup of {} failed: {}", created.id, cleanup);
                }
            }
            return Err(e);
        }

        Ok(created.id)
    }

    async fn start_and_wait(&self, id: &str) -> Result<()> {
        let mut output = self.engine.attach_output(id).await?;
        self.engine.start_container(id).await?;
        wait_for_ready(&mut output, |line| (self.echo)(line)).await
    }
}

/// `canon-<profile>-<arch>` for persistent containers, `canon-<profile>-<random>` otherwise
pub fn container_name(profile: &Profile) -> String {
    let name: String = profile
        .name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if profile.persistent {
        format!("canon-{}-{}", name, profile.arch)
    } else {
        format!("canon-{}-{:x}", name, rand::random::<u32>())
    }
}
