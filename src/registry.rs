//! Label-based queries over canon-managed containers

use std::time::Duration;

use crate::engine::{ContainerEngine, ContainerFilter, ContainerSummary};
use crate::error::{CanonError, MultiError, Result};
use crate::labels::{ContainerKind, LABEL_PROFILE, LABEL_TYPE};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// One row of `canon list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub state: String,
    /// `<name>/<arch>`
    pub profile: String,
    pub image: String,
}

impl ManagedContainer {
    fn from_summary(summary: ContainerSummary) -> Self {
        let kind = summary
            .labels
            .get(LABEL_TYPE)
            .and_then(|t| t.parse::<ContainerKind>().ok());
        Self {
            state: display_state(&summary.state, kind),
            profile: summary.labels.get(LABEL_PROFILE).cloned().unwrap_or_default(),
            image: summary.image,
            id: summary.id,
        }
    }
}

/// `oneshot` for running one-shot containers, `stopped` for exited ones,
/// otherwise the engine's own state
pub fn display_state(state: &str, kind: Option<ContainerKind>) -> String {
    match (state, kind) {
        ("running", Some(ContainerKind::OneShot)) => "oneshot".to_string(),
        ("exited", _) => "stopped".to_string(),
        (other, _) => other.to_string(),
    }
}

/// Every container carrying the profile label, running or not
pub async fn list_managed(engine: &dyn ContainerEngine) -> Result<Vec<ManagedContainer>> {
    let filter = ContainerFilter::default()
        .with_label(LABEL_PROFILE, None)
        .include_stopped();
    let containers = engine.list_containers(&filter).await?;
    Ok(containers.into_iter().map(ManagedContainer::from_summary).collect())
}

/// Stop the profile's container (every managed container with `all`),
/// force-removing it afterwards when `remove` is set
///
/// Returns the containers acted on. Several matches without `all` is an
/// error and nothing is touched. Per-container failures are collected and
/// reported together once every target has been tried.
pub async fn stop_or_terminate(
    engine: &dyn ContainerEngine,
    profile_key: &str,
    all: bool,
    remove: bool,
) -> Result<Vec<ManagedContainer>> {
    let filter = if all {
        ContainerFilter::default().with_label(LABEL_PROFILE, None)
    } else {
        ContainerFilter::default().with_label(LABEL_PROFILE, Some(profile_key))
    }
    .include_stopped();

    let targets: Vec<ManagedContainer> = engine
        .list_containers(&filter)
        .await?
        .into_iter()
        .map(ManagedContainer::from_summary)
        .collect();

    if targets.len() > 1 && !all {
        return Err(CanonError::AmbiguousTarget);
    }

    let mut errors = MultiError::default();
    for target in &targets {
        log::info!(
            "{} {} ({})",
            if remove { "Terminating" } else { "Stopping" },
            target.profile,
            target.id
        );

        // terminate still force-removes a container that refused to stop
        match engine.stop_container(&target.id, STOP_TIMEOUT).await {
            Err(e) if e.is_gone() => log::debug!("{} already stopped: {}", target.id, e),
            Err(e) => errors.push(&target.id, e),
            Ok(()) => {}
        }

        if remove {
            match engine.remove_container(&target.id, true).await {
                Err(e) if e.is_gone() => log::debug!("{} already removed: {}", target.id, e),
                Err(e) => errors.push(&target.id, e),
                Ok(()) => {}
            }
        }
    }

    if errors.is_empty() {
        Ok(targets)
    } else {
        Err(CanonError::Multiple(errors))
    }
}

/// Whether the image a container runs differs from what its image reference
/// resolves to now
pub async fn check_image_drift(engine: &dyn ContainerEngine, container_id: &str) -> Result<bool> {
    let details = engine.inspect_container(container_id).await?;
    let current = engine.inspect_image(&details.image_ref).await?;
    log::debug!(
        "Container {} runs {}, {} resolves to {}",
        container_id,
        details.image_id,
        details.image_ref,
        current
    );
    Ok(details.image_id != current)
}
