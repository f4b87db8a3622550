use crate::config::StreamingConfig;
use crate::db::models::camera_models::Camera;
use crate::db::repositories::cameras::CameraDirectory;
use crate::error::Error;
use crate::stream::{SessionState, StreamSupervisor};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

struct MockDirectory {
    cameras: HashMap<Uuid, Camera>,
}

impl MockDirectory {
    fn with_camera(camera: Camera) -> Self {
        let mut cameras = HashMap::new();
        cameras.insert(camera.id, camera);
        Self { cameras }
    }
}

#[async_trait]
impl CameraDirectory for MockDirectory {
    async fn camera_by_alias(&self, alias: &str) -> Result<Option<Camera>> {
        Ok(self
            .cameras
            .values()
            .find(|c| c.ingest_alias == alias)
            .cloned())
    }

    async fn camera_by_id(&self, id: &Uuid) -> Result<Option<Camera>> {
        Ok(self.cameras.get(id).cloned())
    }
}

fn camera(source_url: Option<&str>) -> Camera {
    Camera {
        id: Uuid::new_v4(),
        account_id: Uuid::new_v4(),
        name: "front door".to_string(),
        source_url: source_url.map(|s| s.to_string()),
        ingest_alias: "cam-front".to_string(),
        quick_actions: None,
        created_at: Utc::now(),
    }
}

/// Stand-in transcoder: ignores the ffmpeg arguments except the trailing
/// manifest path and keeps emitting segments next to it.
fn write_producing_transcoder(dir: &Path) -> String {
    let path = dir.join("fake-transcoder.sh");
    let script = r#"#!/bin/sh
for last; do :; done
dir=$(dirname "$last")
i=0
while true; do
  echo data > "$dir/seg-$i.ts"
  printf '#EXTM3U\n#EXTINF:2.0,\nseg-%s.ts\n' "$i" > "$last"
  i=$((i+1))
  sleep 0.2
done
"#;
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Stand-in transcoder that dies immediately
fn write_crashing_transcoder(dir: &Path) -> String {
    let path = dir.join("crashing-transcoder.sh");
    std::fs::write(&path, "#!/bin/sh\nexit 1\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn test_config(tmp: &Path, ffmpeg_path: String) -> StreamingConfig {
    StreamingConfig {
        streams_dir: tmp.join("streams"),
        ffmpeg_path,
        segment_seconds: 1,
        retention_segments: 5,
        start_timeout_secs: 3,
        freshness_timeout_secs: 2,
        restart_ceiling: 4,
        idle_grace_secs: 1,
        watchdog_interval_ms: 50,
    }
}

#[tokio::test]
async fn acquire_without_source_is_no_source() {
    let tmp = tempfile::tempdir().unwrap();
    let cam = camera(None);
    let directory = std::sync::Arc::new(MockDirectory::with_camera(cam.clone()));
    let supervisor = StreamSupervisor::new(
        test_config(tmp.path(), "ffmpeg".to_string()),
        directory,
    );

    let err = supervisor.acquire(&cam.id).await.unwrap_err();
    assert!(matches!(
        err.downcast::<Error>().unwrap(),
        Error::NoSource(_)
    ));
    assert!(supervisor.status(&cam.id).await.is_none());
}

#[tokio::test]
async fn acquire_twice_shares_one_session() {
    let tmp = tempfile::tempdir().unwrap();
    let transcoder = write_producing_transcoder(tmp.path());
    let cam = camera(Some("rtsp://cam.local/stream"));
    let directory = std::sync::Arc::new(MockDirectory::with_camera(cam.clone()));
    let supervisor = StreamSupervisor::new(test_config(tmp.path(), transcoder), directory);

    let first = supervisor.acquire(&cam.id).await.unwrap();
    let second = supervisor.acquire(&cam.id).await.unwrap();
    assert_eq!(first.camera_id, second.camera_id);

    let status = supervisor.status(&cam.id).await.unwrap();
    assert_eq!(status.viewers, 2);
    assert_eq!(status.starts, 1);
    assert_eq!(status.state, SessionState::Running);
    assert!(status.manifest_ready);
    assert!(first.manifest.exists());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn session_survives_until_last_release_plus_grace() {
    let tmp = tempfile::tempdir().unwrap();
    let transcoder = write_producing_transcoder(tmp.path());
    let cam = camera(Some("rtsp://cam.local/stream"));
    let directory = std::sync::Arc::new(MockDirectory::with_camera(cam.clone()));
    let supervisor = StreamSupervisor::new(test_config(tmp.path(), transcoder), directory);

    let first = supervisor.acquire(&cam.id).await.unwrap();
    let second = supervisor.acquire(&cam.id).await.unwrap();

    supervisor.release(first).await;

    // One viewer left: well past the grace period the session must live on.
    tokio::time::sleep(Duration::from_millis(1600)).await;
    let status = supervisor.status(&cam.id).await.unwrap();
    assert_eq!(status.viewers, 1);
    assert_ne!(status.state, SessionState::Stopped);

    supervisor.release(second).await;

    // Last viewer gone: after grace + a watchdog tick the session is torn down.
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert!(supervisor.status(&cam.id).await.is_none());
}

#[tokio::test]
async fn reacquire_within_grace_cancels_teardown() {
    let tmp = tempfile::tempdir().unwrap();
    let transcoder = write_producing_transcoder(tmp.path());
    let cam = camera(Some("rtsp://cam.local/stream"));
    let directory = std::sync::Arc::new(MockDirectory::with_camera(cam.clone()));
    let supervisor = StreamSupervisor::new(test_config(tmp.path(), transcoder), directory);

    let first = supervisor.acquire(&cam.id).await.unwrap();
    supervisor.release(first).await;

    // Come back before the grace period runs out.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let again = supervisor.acquire(&cam.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1600)).await;
    let status = supervisor.status(&cam.id).await.unwrap();
    assert_eq!(status.viewers, 1);
    assert_eq!(status.starts, 1);

    supervisor.release(again).await;
    supervisor.shutdown().await;
}

#[tokio::test]
async fn crash_loop_degrades_at_the_ceiling() {
    let tmp = tempfile::tempdir().unwrap();
    let transcoder = write_crashing_transcoder(tmp.path());
    let cam = camera(Some("rtsp://cam.local/stream"));
    let directory = std::sync::Arc::new(MockDirectory::with_camera(cam.clone()));
    let mut config = test_config(tmp.path(), transcoder);
    config.start_timeout_secs = 0;
    config.restart_ceiling = 4;
    let supervisor = StreamSupervisor::new(config, directory);

    let handle = supervisor.acquire(&cam.id).await.unwrap();

    // Wait for the watchdog to burn through the restart budget.
    let mut status = supervisor.status(&cam.id).await.unwrap();
    for _ in 0..100 {
        if status.state == SessionState::Degraded {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = supervisor.status(&cam.id).await.unwrap();
    }

    assert_eq!(status.state, SessionState::Degraded);
    // Initial spawn plus exactly `restart_ceiling` restarts, then no more.
    assert_eq!(status.starts, 5);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = supervisor.status(&cam.id).await.unwrap();
    assert_eq!(status.starts, 5);
    assert_eq!(status.state, SessionState::Degraded);

    supervisor.release(handle).await;
    supervisor.shutdown().await;
}
