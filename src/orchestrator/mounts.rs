//! Host paths shared with the container

use std::path::{Component, Path};

use crate::config::Profile;
use crate::engine::MountSpec;
use crate::error::{CanonError, Result};

/// Where the profile's root path appears inside the container
pub const CANON_MOUNT_POINT: &str = "/host";

/// Mounts and environment derived from the profile and host state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPlan {
    pub mounts: Vec<MountSpec>,
    pub env: Vec<String>,
}

/// Container-side working directory for a host directory under the profile root
pub fn container_workdir(root: &Path, cwd: &Path) -> Result<String> {
    let relative = cwd
        .strip_prefix(root)
        .map_err(|_| CanonError::OutsideProfileRoot {
            cwd: cwd.to_path_buf(),
            root: root.to_path_buf(),
        })?;

    let mut workdir = CANON_MOUNT_POINT.to_string();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            workdir.push('/');
            workdir.push_str(&part.to_string_lossy());
        }
    }
    Ok(workdir)
}

/// Build the mount set for a profile
///
/// `home` is the invoking user's home directory and `ssh_socket` the agent socket
/// to forward, if any.
pub fn plan_mounts(profile: &Profile, home: &Path, ssh_socket: Option<&str>) -> Result<MountPlan> {
    let mut plan = MountPlan::default();
    let container_home = format!("/home/{}", profile.user);

    if profile.ssh {
        if let Some(socket) = ssh_socket.filter(|s| !s.is_empty()) {
            plan.mounts.push(MountSpec {
                source: socket.to_string(),
                target: socket.to_string(),
                read_only: false,
            });
        }

        let ssh_dir = home.join(".ssh");
        if ssh_dir.exists() {
            plan.mounts.push(MountSpec {
                source: ssh_dir.to_string_lossy().into_owned(),
                target: format!("{}/.ssh", container_home),
                read_only: true,
            });
            plan.env.push("CANON_SSH=true".to_string());
        }
    }

    if profile.netrc {
        let netrc = home.join(".netrc");
        if netrc.exists() {
            plan.mounts.push(MountSpec {
                source: netrc.to_string_lossy().into_owned(),
                target: format!("{}/.netrc", container_home),
                read_only: true,
            });
        }
    }

    if profile.path == Path::new("/") {
        if cfg!(target_os = "macos") {
            return Err(CanonError::Config(
                "no profile found that contains the current directory, and the root fs (/) cannot be directly mounted on MacOS"
                    .to_string(),
            ));
        }
        eprintln!(
            "WARNING: profile path is root (/) so mounting entire host system to {}",
            CANON_MOUNT_POINT
        );
    }

    plan.mounts.push(MountSpec {
        source: profile.path.to_string_lossy().into_owned(),
        target: CANON_MOUNT_POINT.to_string(),
        read_only: false,
    });

    Ok(plan)
}
