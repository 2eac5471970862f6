
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canon::config::Profile;
use canon::update::{CheckData, ImageDef, ImageProvider, UpdateLock, Updater, LOCK_FILE};
use canon::CanonError;
use chrono::Utc;
use rstest::*;
use tempfile::TempDir;
use test_utils::{capture_lines, test_profile, FakeEngine};

struct Harness {
    engine: Arc<FakeEngine>,
    updater: Updater,
    cache: TempDir,
    lines: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn data_path(&self) -> PathBuf {
        self.cache.path().join("update-data.yaml")
    }
}

#[fixture]
fn harness() -> Harness {
    let engine = FakeEngine::new();
    let cache = tempfile::tempdir().unwrap();
    let (sink, lines) = capture_lines();
    let updater = Updater::new(engine.clone(), cache.path().to_path_buf(), sink);
    Harness {
        engine,
        updater,
        cache,
        lines,
    }
}

fn dual_arch(name: &str) -> Profile {
    Profile {
        name: name.to_string(),
        ..Default::default()
    }
}

#[rstest]
#[tokio::test]
async fn test_forced_update_pulls_every_candidate(harness: Harness) {
    let queued = harness
        .updater
        .check_update(&[dual_arch("default")], true)
        .await
        .unwrap();

    assert_eq!(queued.len(), 2);
    assert_eq!(
        harness.engine.calls_to("pull"),
        vec![
            "pull ghcr.io/viamrobotics/canon:amd64 linux/amd64",
            "pull ghcr.io/viamrobotics/canon:arm64 linux/arm64",
        ]
    );

    let data = CheckData::read(&harness.data_path()).unwrap();
    assert_eq!(data.0.len(), 2);

    let lines = harness.lines.lock().unwrap().clone();
    assert_eq!(lines[0], "queuing update: ghcr.io/viamrobotics/canon:amd64|linux/amd64");
    assert!(lines.contains(&"layer1: Pull complete".to_string()));
}

#[rstest]
#[tokio::test]
async fn test_duplicate_images_are_queued_once(harness: Harness) {
    let queued = harness
        .updater
        .check_update(&[dual_arch("a"), dual_arch("b")], true)
        .await
        .unwrap();

    assert_eq!(queued.len(), 2);
    assert_eq!(harness.engine.calls_to("pull").len(), 2);
}

#[rstest]
#[tokio::test]
async fn test_fresh_images_are_not_pulled(harness: Harness) {
    let profile = test_profile("dev", Path::new("/home/u/proj"), false);
    let mut data = CheckData::default();
    data.record(ImageDef::new(&profile.image, "linux/amd64"), Utc::now());
    data.write(&harness.data_path()).unwrap();

    let queued = harness.updater.auto_check(&profile).await.unwrap();

    assert!(queued.is_empty());
    assert!(harness.engine.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_stale_images_are_pulled(harness: Harness) {
    let mut profile = test_profile("dev", Path::new("/home/u/proj"), false);
    profile.update_interval = Duration::from_secs(60 * 60);
    let mut data = CheckData::default();
    data.record(
        ImageDef::new(&profile.image, "linux/amd64"),
        Utc::now() - chrono::Duration::hours(2),
    );
    data.write(&harness.data_path()).unwrap();

    let queued = harness.updater.auto_check(&profile).await.unwrap();

    assert_eq!(queued, vec![ImageDef::new(&profile.image, "linux/amd64")]);
    let recorded = CheckData::read(&harness.data_path())
        .unwrap()
        .last_update(&queued[0])
        .unwrap();
    assert!(Utc::now() - recorded < chrono::Duration::minutes(1));
}

#[rstest]
#[tokio::test]
async fn test_auto_check_respects_update_persistent(harness: Harness) {
    let mut profile = test_profile("dev", Path::new("/home/u/proj"), true);
    profile.update_persistent = false;

    let queued = harness.updater.auto_check(&profile).await.unwrap();
    assert!(queued.is_empty());
    assert!(harness.engine.calls().is_empty());

    profile.update_persistent = true;
    let queued = harness.updater.auto_check(&profile).await.unwrap();
    assert_eq!(queued.len(), 1);
}

#[rstest]
#[tokio::test]
async fn test_held_lock_is_an_error(harness: Harness) {
    let lock_path = harness.cache.path().join(LOCK_FILE);
    let _held = UpdateLock::acquire(&lock_path).unwrap();

    let err = harness
        .updater
        .ensure_image(&ImageDef::new("debian:12", "linux/amd64"))
        .await
        .unwrap_err();

    assert!(matches!(&err, CanonError::Locked(path) if *path == lock_path));
    assert!(harness.engine.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_ensure_image_records_pull(harness: Harness) {
    let image = ImageDef::new("debian:12", "linux/arm64");

    harness.updater.ensure_image(&image).await.unwrap();

    assert_eq!(harness.engine.calls(), vec!["pull debian:12 linux/arm64"]);
    let data = CheckData::read(&harness.data_path()).unwrap();
    assert!(data.last_update(&image).is_some());
}
