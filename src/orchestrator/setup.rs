//! The script run as PID 1 of every managed container

use crate::error::{CanonError, Result};

const SETUP_SCRIPT: &str = include_str!("canon_setup.sh");

/// Printed by the setup script once the container is usable
pub const READY_MARKER: &str = "CANON_READY";

/// Check a user or group name before it is spliced into the setup script
pub fn validate_identity_name(what: &'static str, name: &str) -> Result<()> {
    let invalid = |reason: &str| CanonError::InvalidName {
        what,
        value: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("cannot be empty"));
    }

    if name.starts_with('-') {
        return Err(invalid("cannot start with a hyphen"));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(invalid(
            "only alphanumeric characters, hyphens, underscores, and periods are allowed",
        ));
    }

    // useradd limit
    if name.len() > 32 {
        return Err(invalid("maximum length is 32 characters"));
    }

    Ok(())
}

/// Fill in the host identity the container user is remapped to
pub fn render_setup_script(user: &str, group: &str, uid: u32, gid: u32) -> Result<String> {
    validate_identity_name("user", user)?;
    validate_identity_name("group", group)?;

    Ok(SETUP_SCRIPT
        .replace("__CANON_USER__", user)
        .replace("__CANON_GROUP__", group)
        .replace("__CANON_UID__", &uid.to_string())
        .replace("__CANON_GID__", &gid.to_string()))
}

/// Real uid and gid of the invoking user
pub fn host_ids() -> (u32, u32) {
    // SAFETY: getuid and getgid cannot fail and touch no memory
    unsafe { (libc::getuid(), libc::getgid()) }
}
