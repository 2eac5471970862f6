//! Layered YAML configuration
//!
//! Configuration comes from up to two files: the nearest `canon.yaml` above the
//! current directory (project config) and the user's `~/.config/canon.yaml` (or
//! an explicitly named file). Both are parsed into YAML mappings and deep-merged,
//! user settings winning. Top-level keys are profile names, plus two special keys:
//! `defaults` (settings applied beneath every profile) and `default_profile`.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::{CanonError, Result};

pub mod profile;

pub use profile::{host_arch, Profile, DEFAULT_PROFILE_NAME};

pub const PROJECT_CONFIG_NAME: &str = "canon.yaml";
const DEFAULTS_KEY: &str = "defaults";
const DEFAULT_PROFILE_KEY: &str = "default_profile";

/// Settings given on the command line, applied over the selected profile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub image: Option<String>,
    pub arch: Option<String>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub ssh: Option<bool>,
    pub netrc: Option<bool>,
}

/// The merged configuration of every layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    merged: Mapping,
}

impl Config {
    /// Load the project config found above `cwd` and the user config
    ///
    /// `explicit` replaces `<home>/.config/canon.yaml`; unlike the default user
    /// config it must exist.
    pub fn load(cwd: &Path, home: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(project_file) = find_project_config(cwd) {
            log::debug!("Merging project config {}", project_file.display());
            config.merge_file(&project_file, true)?;
        }

        match explicit {
            Some(path) => config.merge_file(path, false)?,
            None => {
                let user_file = home.join(".config").join(PROJECT_CONFIG_NAME);
                if user_file.exists() {
                    log::debug!("Merging user config {}", user_file.display());
                    config.merge_file(&user_file, false)?;
                }
            }
        }

        Ok(config)
    }

    /// Build a configuration from a single YAML document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut config = Config::default();
        config.merge_yaml(text, None)?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path, set_path: bool) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CanonError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let base_dir = if set_path { path.parent() } else { None };
        self.merge_yaml(&text, base_dir)
    }

    /// Merge one layer; profiles without a `path` get `base_dir` when given
    fn merge_yaml(&mut self, text: &str, base_dir: Option<&Path>) -> Result<()> {
        let layer: Value = serde_yaml::from_str(text)?;
        let mut layer = match layer {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => {
                return Err(CanonError::Config(
                    "top level of a config file must be a mapping".to_string(),
                ))
            }
        };

        if let Some(dir) = base_dir {
            for (key, section) in layer.iter_mut() {
                if key.as_str() == Some(DEFAULTS_KEY) {
                    continue;
                }
                if let Value::Mapping(section) = section {
                    let path_key = Value::from("path");
                    if !section.contains_key(&path_key) {
                        section.insert(path_key, Value::from(dir.to_string_lossy().into_owned()));
                    }
                }
            }
        }

        let mut merged = Value::Mapping(std::mem::take(&mut self.merged));
        merge_values(&mut merged, Value::Mapping(layer));
        if let Value::Mapping(mapping) = merged {
            self.merged = mapping;
        }
        Ok(())
    }

    fn section(&self, name: &str) -> Option<&Mapping> {
        self.merged.get(name).and_then(Value::as_mapping)
    }

    /// Names of every profile section
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .merged
            .iter()
            .filter(|(_, v)| v.is_mapping())
            .filter_map(|(k, _)| k.as_str())
            .filter(|k| *k != DEFAULTS_KEY)
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// The profile whose `path` is the closest ancestor of `cwd`, else
    /// `default_profile`, else the built-in default
    pub fn default_profile_name(&self, cwd: &Path) -> String {
        let mut best: Option<(usize, String)> = None;
        for name in self.profile_names() {
            let Some(path) = self
                .section(&name)
                .and_then(|s| s.get("path"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let root = Path::new(path);
            if cwd.starts_with(root) {
                let depth = root.components().count();
                if best.as_ref().map_or(true, |(d, _)| depth > *d) {
                    best = Some((depth, name));
                }
            }
        }

        if let Some((_, name)) = best {
            return name;
        }

        self.merged
            .get(DEFAULT_PROFILE_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string())
    }

    /// Build a profile from built-in defaults, the `defaults` section and the named section
    fn build_profile(&self, name: &str, keep_default_images: bool) -> Result<Profile> {
        let section = match self.section(name) {
            Some(section) => section.clone(),
            None if name == DEFAULT_PROFILE_NAME => Mapping::new(),
            None => return Err(CanonError::UnknownProfile(name.to_string())),
        };

        let mut layered = Value::Mapping(self.section(DEFAULTS_KEY).cloned().unwrap_or_default());
        merge_values(&mut layered, Value::Mapping(section));

        let mut base = serde_yaml::to_value(Profile::default())?;
        if let Value::Mapping(base_map) = &mut base {
            let sets = |key: &str| layered.get(key).is_some();
            // An explicit single image replaces the built-in per-arch images
            if !keep_default_images || (sets("image") && !sets("image_amd64") && !sets("image_arm64")) {
                base_map.insert(Value::from("image_amd64"), Value::from(""));
                base_map.insert(Value::from("image_arm64"), Value::from(""));
                base_map.insert(Value::from("image"), Value::from(""));
            }
        }
        merge_values(&mut base, layered);

        let mut profile: Profile = serde_yaml::from_value(base)?;
        profile.name = name.to_string();
        profile.swap_arch_image();
        Ok(profile)
    }

    /// Resolve the active profile for an invocation
    pub fn resolve(&self, cwd: &Path, requested: Option<&str>, overrides: &Overrides) -> Result<Profile> {
        let name = match requested {
            Some(name) => name.to_string(),
            None => self.default_profile_name(cwd),
        };
        log::debug!("Resolving profile {}", name);

        let mut profile = self.build_profile(&name, true)?;

        if let Some(arch) = &overrides.arch {
            profile.arch = arch.clone();
            profile.swap_arch_image();
        }
        if let Some(image) = &overrides.image {
            profile.image = image.clone();
        }
        if let Some(user) = &overrides.user {
            profile.user = user.clone();
        }
        if let Some(group) = &overrides.group {
            profile.group = group.clone();
        }
        if let Some(ssh) = overrides.ssh {
            profile.ssh = ssh;
        }
        if let Some(netrc) = overrides.netrc {
            profile.netrc = netrc;
        }

        if profile.image.is_empty() {
            return Err(CanonError::Config(format!(
                "profile {} has no image for architecture {}",
                profile.name, profile.arch
            )));
        }
        Ok(profile)
    }

    /// Every configured profile, with built-in default images dropped so that
    /// only images the config names are considered
    pub fn profiles(&self) -> Result<Vec<Profile>> {
        self.profile_names()
            .iter()
            .map(|name| self.build_profile(name, false))
            .collect()
    }
}

/// Deep-merge `overlay` into `base`; nested mappings merge key by key
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_mapping() && value.is_mapping() => {
                        merge_values(existing, value);
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Walk up from `cwd` looking for a project `canon.yaml`
pub fn find_project_config(cwd: &Path) -> Option<PathBuf> {
    cwd.ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_NAME))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const USER_CONFIG: &str = r#"
default_profile: work
defaults:
  user: dev
  group: dev
work:
  image: example/work:latest
  persistent: true
  update_interval: 168h
tools:
  image_amd64: example/tools:amd64
  image_arm64: example/tools:arm64
  path: /home/u/tools
"#;

    #[test]
    fn test_merge_values_is_deep() {
        let mut base: Value = serde_yaml::from_str("a:\n  x: 1\n  y: 2\nb: 3\n").unwrap();
        let overlay: Value = serde_yaml::from_str("a:\n  y: 20\n  z: 30\nb: 4\n").unwrap();
        merge_values(&mut base, overlay);

        let expected: Value = serde_yaml::from_str("a:\n  x: 1\n  y: 20\n  z: 30\nb: 4\n").unwrap();
        assert_eq!(base, expected);
    }

    #[test]
    fn test_resolve_default_profile_key() {
        let config = Config::from_yaml(USER_CONFIG).unwrap();
        let profile = config
            .resolve(Path::new("/somewhere/else"), None, &Overrides::default())
            .unwrap();

        assert_eq!(profile.name, "work");
        assert_eq!(profile.image, "example/work:latest");
        assert_eq!(profile.user, "dev");
        assert!(profile.persistent);
        assert_eq!(profile.update_interval, Duration::from_secs(168 * 60 * 60));
    }

    #[test]
    fn test_resolve_by_path() {
        let config = Config::from_yaml(USER_CONFIG).unwrap();
        let overrides = Overrides {
            arch: Some("arm64".to_string()),
            ..Default::default()
        };
        let profile = config
            .resolve(Path::new("/home/u/tools/src"), None, &overrides)
            .unwrap();
        assert_eq!(profile.name, "tools");
        assert_eq!(profile.image, "example/tools:arm64");
    }

    #[test]
    fn test_image_override_wins_over_arch() {
        let config = Config::from_yaml(USER_CONFIG).unwrap();
        let overrides = Overrides {
            arch: Some("amd64".to_string()),
            image: Some("mine:1".to_string()),
            ssh: Some(false),
            ..Default::default()
        };
        let profile = config
            .resolve(Path::new("/"), Some("tools"), &overrides)
            .unwrap();
        assert_eq!(profile.image, "mine:1");
        assert!(!profile.ssh);
    }

    #[test]
    fn test_unknown_profile() {
        let config = Config::from_yaml(USER_CONFIG).unwrap();
        let err = config
            .resolve(Path::new("/"), Some("missing"), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, CanonError::UnknownProfile(name) if name == "missing"));
    }

    #[test]
    fn test_builtin_default_without_config() {
        let config = Config::default();
        let overrides = Overrides {
            arch: Some("amd64".to_string()),
            ..Default::default()
        };
        let profile = config.resolve(Path::new("/tmp"), None, &overrides).unwrap();
        assert_eq!(profile.name, DEFAULT_PROFILE_NAME);
        assert_eq!(profile.image, profile::DEFAULT_IMAGE_AMD64);
        assert_eq!(profile.path, PathBuf::from("/"));
    }

    #[test]
    fn test_profiles_skip_default_images() {
        let config = Config::from_yaml(USER_CONFIG).unwrap();
        let profiles = config.profiles().unwrap();
        assert_eq!(profiles.len(), 2);

        let tools = profiles.iter().find(|p| p.name == "tools").unwrap();
        assert_eq!(tools.image_amd64, "example/tools:amd64");

        let work = profiles.iter().find(|p| p.name == "work").unwrap();
        assert_eq!(work.image, "example/work:latest");
        assert!(work.image_amd64.is_empty());
    }

    #[test]
    fn test_load_layers_project_and_user() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let nested = project.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(home.path().join(".config")).unwrap();

        std::fs::write(
            project.path().join(PROJECT_CONFIG_NAME),
            "proj:\n  image: example/proj:1\n  netrc: false\n",
        )
        .unwrap();
        std::fs::write(
            home.path().join(".config").join(PROJECT_CONFIG_NAME),
            "proj:\n  image: example/proj:2\n",
        )
        .unwrap();

        let config = Config::load(&nested, home.path(), None).unwrap();
        let profile = config.resolve(&nested, None, &Overrides::default()).unwrap();

        assert_eq!(profile.name, "proj");
        assert_eq!(profile.image, "example/proj:2");
        assert!(!profile.netrc);
        assert_eq!(profile.path, project.path());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        let missing = home.path().join("nope.yaml");
        let err = Config::load(home.path(), home.path(), Some(&missing)).unwrap_err();
        assert!(matches!(err, CanonError::Config(_)));
    }
}
