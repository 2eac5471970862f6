use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE_AMD64: &str = "ghcr.io/viamrobotics/canon:amd64";
pub const DEFAULT_IMAGE_ARM64: &str = "ghcr.io/viamrobotics/canon:arm64";
pub const DEFAULT_PROFILE_NAME: &str = "default";

/// Resolved configuration for one development environment
///
/// A profile is built once per invocation by [`crate::config::Config::resolve`]
/// and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub image: String,
    pub image_amd64: String,
    pub image_arm64: String,
    pub arch: String,
    pub minimum_date: Option<DateTime<Utc>>,
    pub persistent: bool,
    pub ssh: bool,
    pub netrc: bool,
    pub user: String,
    pub group: String,
    pub path: PathBuf,
    #[serde(with = "humantime_duration")]
    pub update_interval: Duration,
    pub update_persistent: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROFILE_NAME.to_string(),
            image: String::new(),
            image_amd64: DEFAULT_IMAGE_AMD64.to_string(),
            image_arm64: DEFAULT_IMAGE_ARM64.to_string(),
            arch: host_arch().to_string(),
            minimum_date: None,
            persistent: false,
            ssh: true,
            netrc: true,
            user: "testbot".to_string(),
            group: "testbot".to_string(),
            path: PathBuf::from("/"),
            update_interval: Duration::from_secs(24 * 60 * 60),
            update_persistent: true,
        }
    }
}

impl Profile {
    /// `<name>/<arch>`, the value of the `profile` container label
    pub fn key(&self) -> String {
        format!("{}/{}", self.name, self.arch)
    }

    /// Engine platform string for the profile's architecture
    pub fn platform(&self) -> String {
        format!("linux/{}", self.arch)
    }

    /// `user:group` for exec sessions
    pub fn exec_user(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }

    /// Use the architecture-specific image when one is configured
    pub fn swap_arch_image(&mut self) {
        match self.arch.as_str() {
            "amd64" if !self.image_amd64.is_empty() => self.image = self.image_amd64.clone(),
            "arm64" if !self.image_arm64.is_empty() => self.image = self.image_arm64.clone(),
            _ => {}
        }
    }

    /// Snapshot used as the `profile-data` label
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_yaml(data: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(data)
    }
}

/// Docker's architecture naming for the machine canon runs on
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_and_platform() {
        let profile = Profile {
            name: "dev".to_string(),
            arch: "arm64".to_string(),
            ..Default::default()
        };
        assert_eq!(profile.key(), "dev/arm64");
        assert_eq!(profile.platform(), "linux/arm64");
        assert_eq!(profile.exec_user(), "testbot:testbot");
    }

    #[test]
    fn test_swap_arch_image() {
        let mut profile = Profile {
            arch: "amd64".to_string(),
            ..Default::default()
        };
        profile.swap_arch_image();
        assert_eq!(profile.image, DEFAULT_IMAGE_AMD64);

        profile.arch = "arm64".to_string();
        profile.swap_arch_image();
        assert_eq!(profile.image, DEFAULT_IMAGE_ARM64);

        let mut single = Profile {
            image: "custom:latest".to_string(),
            image_amd64: String::new(),
            image_arm64: String::new(),
            arch: "amd64".to_string(),
            ..Default::default()
        };
        single.swap_arch_image();
        assert_eq!(single.image, "custom:latest");
    }

    #[test]
    fn test_yaml_snapshot_is_stable() {
        let profile = Profile {
            name: "dev".to_string(),
            minimum_date: Some("2024-03-01T00:00:00Z".parse().unwrap()),
            update_interval: Duration::from_secs(7 * 24 * 60 * 60),
            ..Default::default()
        };
        let yaml = profile.to_yaml().unwrap();
        assert!(yaml.contains("update_interval: 7days"));

        let parsed = Profile::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, profile);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed = Profile::from_yaml("persistent: true\nupdate_interval: 12h\n").unwrap();
        assert!(parsed.persistent);
        assert_eq!(parsed.update_interval, Duration::from_secs(12 * 60 * 60));
        assert_eq!(parsed.user, "testbot");
    }
}
