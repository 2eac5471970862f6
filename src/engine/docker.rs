//! bollard-backed implementation of [`ContainerEngine`]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::container::{AttachContainerResults, LogOutput};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig, Mount, MountTypeEnum};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptionsBuilder, CreateImageOptionsBuilder,
    InspectContainerOptions, ListContainersOptionsBuilder, RemoveContainerOptionsBuilder,
    ResizeContainerTTYOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
    WaitContainerOptionsBuilder,
};
use bollard::Docker;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use super::{
    ContainerDetails, ContainerEngine, ContainerFilter, ContainerSpec, ContainerSummary,
    CreatedContainer, EngineError, ExecSpec, OutputStream, PullProgress, SessionStream,
    TerminalSize,
};

impl From<bollard::errors::Error> for EngineError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => EngineError::from_response(status_code, &message),
            other => EngineError::Other(other.to_string()),
        }
    }
}

/// Flatten bollard's de-multiplexed frames back into raw bytes
fn frames_to_bytes(
    frames: impl futures_util::Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send + 'static,
) -> OutputStream {
    frames
        .map(|frame| match frame {
            Ok(output) => Ok(output.into_bytes()),
            Err(e) => Err(EngineError::Stream(e.to_string())),
        })
        .boxed()
}

fn create_mounts(spec: &ContainerSpec) -> Vec<Mount> {
    spec.mounts
        .iter()
        .map(|m| Mount {
            target: Some(m.target.clone()),
            source: Some(m.source.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect()
}

/// Docker daemon client
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        log::debug!("Connected to Docker daemon");
        Ok(Self::new(docker))
    }

    /// Like [`DockerEngine::connect`], but falls back to the per-user Docker
    /// Desktop socket when neither `DOCKER_HOST` nor the system socket exists
    pub fn connect_with_fallback(home: &Path) -> Result<Self, EngineError> {
        let docker_host = std::env::var_os("DOCKER_HOST");
        match user_socket_fallback(docker_host.is_some(), Path::new(SYSTEM_SOCKET), home) {
            Some(socket) => {
                log::debug!("Using Docker socket {}", socket.display());
                let docker = Docker::connect_with_socket(
                    &socket.to_string_lossy(),
                    CLIENT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )?;
                Ok(Self::new(docker))
            }
            None => Self::connect(),
        }
    }
}

const SYSTEM_SOCKET: &str = "/var/run/docker.sock";
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// `~/.docker/run/docker.sock`, when nothing else is configured and it exists
fn user_socket_fallback(docker_host_set: bool, system_socket: &Path, home: &Path) -> Option<PathBuf> {
    if docker_host_set || system_socket.exists() {
        return None;
    }
    let socket = home.join(".docker").join("run").join("docker.sock");
    socket.exists().then_some(socket)
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<CreatedContainer, EngineError> {
        let options = CreateContainerOptionsBuilder::new()
            .name(&spec.name)
            .platform(&spec.platform)
            .build();

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            entrypoint: Some(Vec::new()),
            cmd: Some(spec.cmd.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                auto_remove: Some(spec.auto_remove),
                mounts: Some(create_mounts(spec)),
                ..Default::default()
            }),
            ..Default::default()
        };

        log::debug!("Creating container {} from {} ({})", spec.name, spec.image, spec.platform);
        let response = self.docker.create_container(Some(options), config).await?;
        Ok(CreatedContainer {
            id: response.id,
            warnings: response.warnings,
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError> {
        let options = StopContainerOptionsBuilder::new()
            .t(timeout.as_secs().try_into().unwrap_or(10))
            .build();
        self.docker.stop_container(id, Some(options)).await?;
        Ok(())
    }

    async fn wait_removed(&self, id: &str) -> Result<(), EngineError> {
        let options = WaitContainerOptionsBuilder::new().condition("removed").build();
        let mut stream = self.docker.wait_container(id, Some(options));
        while let Some(result) = stream.next().await {
            match result {
                Ok(response) => {
                    if let Some(message) = response.error.and_then(|e| e.message) {
                        if !message.is_empty() {
                            return Err(EngineError::Other(format!(
                                "Error waiting for container removal: {}",
                                message
                            )));
                        }
                    }
                }
                // A non-zero exit status still means the container is on its way out
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    log::debug!("Container {} exited with status {}", id, code);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let options = RemoveContainerOptionsBuilder::new().force(force).build();
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn attach_output(&self, id: &str) -> Result<OutputStream, EngineError> {
        let options = AttachContainerOptionsBuilder::new()
            .stream(true)
            .stdout(true)
            .stderr(true)
            .build();
        let AttachContainerResults { output, .. } =
            self.docker.attach_container(id, Some(options)).await?;
        Ok(frames_to_bytes(output))
    }

    async fn attach_session(&self, id: &str) -> Result<SessionStream, EngineError> {
        let options = AttachContainerOptionsBuilder::new()
            .stream(true)
            .stdin(true)
            .stdout(true)
            .stderr(true)
            .build();
        let AttachContainerResults { output, input } =
            self.docker.attach_container(id, Some(options)).await?;
        Ok(SessionStream {
            output: frames_to_bytes(output),
            input,
        })
    }

    async fn resize_container(&self, id: &str, size: TerminalSize) -> Result<(), EngineError> {
        let options = ResizeContainerTTYOptionsBuilder::new()
            .h(i32::from(size.rows))
            .w(i32::from(size.cols))
            .build();
        self.docker.resize_container_tty(id, options).await?;
        Ok(())
    }

    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String, EngineError> {
        let exec_config = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            user: Some(spec.user.clone()),
            working_dir: Some(spec.working_dir.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(spec.tty),
            ..Default::default()
        };

        log::debug!(
            "Creating exec in container {} as {} in {}: {:?}",
            container_id,
            spec.user,
            spec.working_dir,
            spec.cmd
        );
        let exec = self.docker.create_exec(container_id, exec_config).await?;
        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<SessionStream, EngineError> {
        let start_config = StartExecOptions {
            detach: false,
            tty,
            ..Default::default()
        };

        match self.docker.start_exec(exec_id, Some(start_config)).await? {
            StartExecResults::Attached { output, input } => Ok(SessionStream {
                output: frames_to_bytes(output),
                input,
            }),
            StartExecResults::Detached => {
                Err(EngineError::Other("Unexpected detached execution".to_string()))
            }
        }
    }

    async fn resize_exec(&self, exec_id: &str, size: TerminalSize) -> Result<(), EngineError> {
        let options = ResizeExecOptions {
            height: size.rows,
            width: size.cols,
        };
        self.docker.resize_exec(exec_id, options).await?;
        Ok(())
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, EngineError> {
        let inspect = self.docker.inspect_exec(exec_id).await?;
        Ok(inspect.exit_code)
    }

    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if !filter.labels.is_empty() {
            filters.insert("label".to_string(), filter.labels.clone());
        }
        let options = ListContainersOptionsBuilder::new()
            .all(filter.all)
            .filters(&filters)
            .build();

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                state: c.state.map(|s| s.to_string()).unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let state = info.state.unwrap_or_default();
        Ok(ContainerDetails {
            id: info.id.unwrap_or_else(|| id.to_string()),
            image_id: info.image.unwrap_or_default(),
            image_ref: info.config.and_then(|c| c.image).unwrap_or_default(),
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn inspect_image(&self, reference: &str) -> Result<String, EngineError> {
        let image = self.docker.inspect_image(reference).await?;
        Ok(image.id.unwrap_or_default())
    }

    fn pull_image(&self, image: &str, platform: &str) -> BoxStream<'static, Result<PullProgress, EngineError>> {
        let options = CreateImageOptionsBuilder::new()
            .from_image(image)
            .platform(platform)
            .build();

        self.docker
            .create_image(Some(options), None, None)
            .map(|result| {
                result
                    .map(|info| PullProgress {
                        id: info.id,
                        status: info.status,
                        progress: info.progress,
                    })
                    .map_err(EngineError::from)
            })
            .boxed()
    }
}
