//! Label schema for canon-managed containers
//!
//! Every managed container carries three labels under the `com.viam.canon.`
//! namespace: `type` (`one-shot` or `persistent`), `profile` (`<name>/<arch>`)
//! and `profile-data` (YAML snapshot of the profile it was created from).
//! Labels are validated when read back; a missing or malformed label is an error.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::Profile;
use crate::error::{CanonError, Result};

pub const LABEL_TYPE: &str = "com.viam.canon.type";
pub const LABEL_PROFILE: &str = "com.viam.canon.profile";
pub const LABEL_PROFILE_DATA: &str = "com.viam.canon.profile-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    OneShot,
    Persistent,
}

impl ContainerKind {
    pub fn for_profile(profile: &Profile) -> Self {
        if profile.persistent {
            ContainerKind::Persistent
        } else {
            ContainerKind::OneShot
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::OneShot => "one-shot",
            ContainerKind::Persistent => "persistent",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "one-shot" => Ok(ContainerKind::OneShot),
            "persistent" => Ok(ContainerKind::Persistent),
            _ => Err(()),
        }
    }
}

/// Typed view of a managed container's labels
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedLabels {
    pub kind: ContainerKind,
    pub profile: String,
    pub profile_data: String,
}

impl ManagedLabels {
    pub fn for_profile(profile: &Profile) -> Result<Self> {
        Ok(Self {
            kind: ContainerKind::for_profile(profile),
            profile: profile.key(),
            profile_data: profile.to_yaml()?,
        })
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(LABEL_TYPE.to_string(), self.kind.to_string());
        labels.insert(LABEL_PROFILE.to_string(), self.profile.clone());
        labels.insert(LABEL_PROFILE_DATA.to_string(), self.profile_data.clone());
        labels
    }

    /// Parse the labels of container `id`, failing on anything missing or unknown
    pub fn from_map(id: &str, labels: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            labels
                .get(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| CanonError::MalformedLabel {
                    id: id.to_string(),
                    label: key.to_string(),
                })
        };

        let kind = get(LABEL_TYPE)?
            .parse::<ContainerKind>()
            .map_err(|_| CanonError::MalformedLabel {
                id: id.to_string(),
                label: LABEL_TYPE.to_string(),
            })?;
        let profile = get(LABEL_PROFILE)?;
        if !profile.contains('/') {
            return Err(CanonError::MalformedLabel {
                id: id.to_string(),
                label: LABEL_PROFILE.to_string(),
            });
        }
        let profile_data = get(LABEL_PROFILE_DATA)?;

        Ok(Self {
            kind,
            profile: profile.clone(),
            profile_data: profile_data.clone(),
        })
    }

    /// Deserialize the stored profile snapshot; only ever used for comparison
    pub fn stored_profile(&self, id: &str) -> Result<Profile> {
        Profile::from_yaml(&self.profile_data).map_err(|e| {
            log::debug!("Unreadable profile-data label on {}: {}", id, e);
            CanonError::MalformedLabel {
                id: id.to_string(),
                label: LABEL_PROFILE_DATA.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile {
            name: "dev".to_string(),
            arch: "amd64".to_string(),
            persistent: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_labels_for_profile() {
        let labels = ManagedLabels::for_profile(&profile()).unwrap().to_map();
        assert_eq!(labels.get(LABEL_TYPE), Some(&"persistent".to_string()));
        assert_eq!(labels.get(LABEL_PROFILE), Some(&"dev/amd64".to_string()));
        assert!(labels.get(LABEL_PROFILE_DATA).unwrap().contains("name: dev"));
    }

    #[test]
    fn test_parse_back_matches_profile() {
        let map = ManagedLabels::for_profile(&profile()).unwrap().to_map();
        let parsed = ManagedLabels::from_map("abc", &map).unwrap();
        assert_eq!(parsed.kind, ContainerKind::Persistent);
        assert_eq!(parsed.stored_profile("abc").unwrap(), profile());
    }

    #[test]
    fn test_missing_label_fails_closed() {
        let mut map = ManagedLabels::for_profile(&profile()).unwrap().to_map();
        map.remove(LABEL_PROFILE_DATA);
        let err = ManagedLabels::from_map("abc", &map).unwrap_err();
        assert!(matches!(err, CanonError::MalformedLabel { label, .. } if label == LABEL_PROFILE_DATA));
    }

    #[test]
    fn test_unknown_type_fails_closed() {
        let mut map = ManagedLabels::for_profile(&profile()).unwrap().to_map();
        map.insert(LABEL_TYPE.to_string(), "forever".to_string());
        assert!(ManagedLabels::from_map("abc", &map).is_err());
    }

    #[test]
    fn test_garbage_profile_data() {
        let mut map = ManagedLabels::for_profile(&profile()).unwrap().to_map();
        map.insert(LABEL_PROFILE_DATA.to_string(), "- not\n- a profile".to_string());
        let labels = ManagedLabels::from_map("abc", &map).unwrap();
        assert!(labels.stored_profile("abc").is_err());
    }
}
