use crate::config::MediaConfig;
use anyhow::Result;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Append-only filesystem layout for event attachments and live output.
///
/// Attachments land under `{uploads_dir}/{event_id}/{n}.{ext}` in original
/// attachment order; live transcode output under
/// `{streams_dir}/{camera_id}/manifest.m3u8` plus `seg-{n}.ts`.
#[derive(Clone)]
pub struct MediaStore {
    uploads_dir: PathBuf,
}

impl MediaStore {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            uploads_dir: config.uploads_dir.clone(),
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Store one attachment body for an event. `index` preserves the original
    /// attachment order. Returns the store-relative path recorded on the event.
    pub async fn save_attachment(
        &self,
        event_id: &Uuid,
        index: usize,
        filename: &str,
        data: &[u8],
    ) -> Result<String> {
        let ext = sanitize_extension(filename);
        let relative = format!("{}/{}.{}", event_id, index, ext);

        let dir = self.uploads_dir.join(event_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(format!("{}.{}", index, ext)), data).await?;

        Ok(relative)
    }
}

/// Camera-supplied filenames are untrusted; only a plain lowercase extension
/// survives into the store path.
fn sanitize_extension(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or("");
    let clean: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();

    if clean.is_empty() {
        "bin".to_string()
    } else {
        clean
    }
}

/// Live output directory for one camera
pub fn live_dir(streams_dir: &Path, camera_id: &Uuid) -> PathBuf {
    streams_dir.join(camera_id.to_string())
}

/// Manifest path inside a camera's live directory
pub fn manifest_path(streams_dir: &Path, camera_id: &Uuid) -> PathBuf {
    live_dir(streams_dir, camera_id).join("manifest.m3u8")
}

/// Segment filename pattern handed to the transcoder
pub const SEGMENT_PATTERN: &str = "seg-%d.ts";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(sanitize_extension("snapshot.JPG"), "jpg");
        assert_eq!(sanitize_extension("clip.mp4"), "mp4");
        assert_eq!(sanitize_extension("../../etc/passwd"), "etcpassw");
        assert_eq!(sanitize_extension("noext"), "noext");
        assert_eq!(sanitize_extension("trailing."), "bin");
    }

    #[tokio::test]
    async fn attachments_are_ordered_under_event_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MediaStore::new(&crate::config::MediaConfig {
            uploads_dir: tmp.path().to_path_buf(),
        });

        let event_id = Uuid::new_v4();
        let first = store
            .save_attachment(&event_id, 0, "a.jpg", b"one")
            .await
            .unwrap();
        let second = store
            .save_attachment(&event_id, 1, "b.png", b"two")
            .await
            .unwrap();

        assert_eq!(first, format!("{}/0.jpg", event_id));
        assert_eq!(second, format!("{}/1.png", event_id));
        assert_eq!(
            std::fs::read(tmp.path().join(&first)).unwrap(),
            b"one".to_vec()
        );
    }
}
