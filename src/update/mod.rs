//! Image freshness tracking and pulls
//!
//! canon remembers when each `(image, platform)` pair was last pulled in a
//! YAML file under `~/.cache/canon`. Reads and writes of that file happen
//! under [`UpdateLock`], so concurrent canon processes never pull into the
//! same bookkeeping at once.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::Profile;
use crate::engine::{ContainerEngine, PullProgress};
use crate::error::{CanonError, Result};
use crate::LineSink;

mod lock;

pub use lock::UpdateLock;

pub const CHECK_DATA_FILE: &str = "update-data.yaml";
pub const LOCK_FILE: &str = "update.lock";

/// An image reference pinned to a platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageDef {
    pub image: String,
    pub platform: String,
}

impl ImageDef {
    pub fn new(image: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            platform: platform.into(),
        }
    }
}

impl fmt::Display for ImageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.image, self.platform)
    }
}

impl FromStr for ImageDef {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.split('|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(image), Some(platform), None) => Ok(ImageDef::new(image, platform)),
            _ => Err(format!("{} did not split into image and platform", s)),
        }
    }
}

impl Serialize for ImageDef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageDef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Last pull time of every known image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckData(pub BTreeMap<ImageDef, DateTime<Utc>>);

impl CheckData {
    /// Read the check data file; a missing or empty file is empty data
    pub fn read(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn last_update(&self, image: &ImageDef) -> Option<DateTime<Utc>> {
        self.0.get(image).copied()
    }

    pub fn record(&mut self, image: ImageDef, at: DateTime<Utc>) {
        self.0.insert(image, at);
    }
}

/// Images a profile can run from
///
/// Dual-arch profiles name both platforms; otherwise the single image for the
/// profile's own architecture.
pub fn candidate_images(profile: &Profile) -> Vec<ImageDef> {
    if !profile.image_amd64.is_empty() && !profile.image_arm64.is_empty() {
        vec![
            ImageDef::new(&profile.image_amd64, "linux/amd64"),
            ImageDef::new(&profile.image_arm64, "linux/arm64"),
        ]
    } else if !profile.image.is_empty() {
        vec![ImageDef::new(&profile.image, profile.platform())]
    } else {
        Vec::new()
    }
}

/// Candidates never pulled, pulled longer than `update_interval` ago, or
/// pulled before the profile's `minimum_date`
pub fn stale_images(profile: &Profile, data: &CheckData, now: DateTime<Utc>) -> Vec<ImageDef> {
    let interval = chrono::Duration::from_std(profile.update_interval).unwrap_or(chrono::Duration::MAX);

    candidate_images(profile)
        .into_iter()
        .filter(|image| match data.last_update(image) {
            None => true,
            Some(last) => {
                let expired = last.checked_add_signed(interval).is_some_and(|due| now > due);
                let too_old = profile.minimum_date.is_some_and(|min| min > last);
                expired || too_old
            }
        })
        .collect()
}

/// Format one pull progress message, `<id>: <status> <progress>`
pub fn render_progress(progress: &PullProgress) -> Option<String> {
    let status = progress.status.as_deref()?;
    let mut line = String::new();
    if let Some(id) = &progress.id {
        line.push_str(id);
        line.push_str(": ");
    }
    line.push_str(status);
    if let Some(detail) = progress.progress.as_deref().filter(|p| !p.is_empty()) {
        line.push(' ');
        line.push_str(detail);
    }
    Some(line)
}

/// Makes an image available locally before a container is created from it
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn ensure_image(&self, image: &ImageDef) -> Result<()>;
}

/// Pulls images and keeps the check data current
pub struct Updater {
    engine: Arc<dyn ContainerEngine>,
    cache_dir: PathBuf,
    progress: LineSink,
}

impl Updater {
    pub fn new(engine: Arc<dyn ContainerEngine>, cache_dir: PathBuf, progress: LineSink) -> Self {
        Self {
            engine,
            cache_dir,
            progress,
        }
    }

    /// `~/.cache/canon`
    pub fn default_cache_dir(home: &Path) -> PathBuf {
        home.join(".cache").join("canon")
    }

    fn lock_path(&self) -> PathBuf {
        self.cache_dir.join(LOCK_FILE)
    }

    fn data_path(&self) -> PathBuf {
        self.cache_dir.join(CHECK_DATA_FILE)
    }

    pub fn read_check_data(&self) -> Result<CheckData> {
        let _lock = UpdateLock::acquire(&self.lock_path())?;
        CheckData::read(&self.data_path())
    }

    /// Pull every image and record the pull time
    pub async fn update(&self, images: &[ImageDef]) -> Result<()> {
        let _lock = UpdateLock::acquire(&self.lock_path())?;
        let mut data = CheckData::read(&self.data_path())?;

        for image in images {
            self.pull(image).await?;
            data.record(image.clone(), Utc::now());
        }

        data.write(&self.data_path())
    }

    /// Pull what the given profiles need
    ///
    /// With `force` every candidate image is pulled, otherwise only stale ones.
    /// Returns the images that were queued.
    pub async fn check_update(&self, profiles: &[Profile], force: bool) -> Result<Vec<ImageDef>> {
        let data = self.read_check_data()?;
        let now = Utc::now();

        let mut queue: Vec<ImageDef> = Vec::new();
        for profile in profiles {
            let images = if force {
                candidate_images(profile)
            } else {
                stale_images(profile, &data, now)
            };
            for image in images {
                if !queue.contains(&image) {
                    queue.push(image);
                }
            }
        }

        for image in &queue {
            (self.progress)(&format!("queuing update: {}", image));
        }
        if !queue.is_empty() {
            self.update(&queue).await?;
        }
        Ok(queue)
    }

    /// Automatic check before a session
    pub async fn auto_check(&self, profile: &Profile) -> Result<Vec<ImageDef>> {
        if profile.persistent && !profile.update_persistent {
            log::debug!("Skipping update check for persistent profile {}", profile.key());
            return Ok(Vec::new());
        }
        self.check_update(std::slice::from_ref(profile), false).await
    }

    async fn pull(&self, image: &ImageDef) -> Result<()> {
        log::info!("Pulling {} for {}", image.image, image.platform);
        let mut stream = self.engine.pull_image(&image.image, &image.platform);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(CanonError::Engine)?;
            if let Some(line) = render_progress(&progress) {
                (self.progress)(&line);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ImageProvider for Updater {
    async fn ensure_image(&self, image: &ImageDef) -> Result<()> {
        self.update(std::slice::from_ref(image)).await
    }
}
