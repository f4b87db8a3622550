use crate::config::StreamingConfig;
use crate::error::Error;
use anyhow::Result;
use log::{debug, error, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// One running transcoder child converting a camera feed into a rolling
/// window of HLS segments plus `manifest.m3u8`.
pub struct TranscodeProcess {
    child: Child,
}

impl TranscodeProcess {
    /// True once the child has exited
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)) | Err(_))
    }

    /// Kill the child and reap it
    pub async fn stop(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("Transcode child already gone: {}", e);
        }
        let _ = self.child.wait().await;
    }
}

/// Spawn the transcoder for one camera. The child runs with the camera's
/// live directory as working directory and emits relative segment paths.
pub fn spawn(config: &StreamingConfig, source_url: &str, out_dir: &Path) -> Result<TranscodeProcess> {
    std::fs::create_dir_all(out_dir)?;

    let mut cmd = Command::new(&config.ffmpeg_path);
    cmd.args(build_args(config, source_url));
    cmd.current_dir(out_dir);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::TranscodeFailure(format!("failed to spawn transcoder: {}", e)))?;

    // Drain stderr into the log so encoder complaints are not lost.
    if let Some(stderr) = child.stderr.take() {
        let tag = out_dir.display().to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let lower = line.to_ascii_lowercase();
                if lower.contains("error") || lower.contains("failed") {
                    error!("transcode[{}]: {}", tag, line);
                } else {
                    debug!("transcode[{}]: {}", tag, line);
                }
            }
        });
    }

    Ok(TranscodeProcess { child })
}

fn build_args(config: &StreamingConfig, source_url: &str) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "warning".into()];

    if source_url.starts_with("rtsp://") {
        // TCP transport is the reliable choice for camera feeds.
        args.extend(["-rtsp_transport".into(), "tcp".into()]);
    }

    args.extend([
        "-fflags".into(),
        "nobuffer".into(),
        "-i".into(),
        source_url.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "64k".into(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        config.segment_seconds.to_string(),
        "-hls_list_size".into(),
        config.retention_segments.to_string(),
        "-hls_flags".into(),
        "delete_segments+independent_segments".into(),
        "-hls_segment_filename".into(),
        crate::media::SEGMENT_PATTERN.into(),
        "-y".into(),
        "manifest.m3u8".into(),
    ]);

    args
}

/// Age of the newest transcoder output (manifest or segment) in the live
/// directory, or None when nothing has been produced yet.
pub fn newest_output_age(dir: &Path) -> Option<Duration> {
    let mut newest: Option<SystemTime> = None;

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name != "manifest.m3u8" && !(name.starts_with("seg-") && name.ends_with(".ts")) {
            continue;
        }
        if let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) {
            newest = Some(match newest {
                Some(prev) if prev >= mtime => prev,
                _ => mtime,
            });
        }
    }

    newest.and_then(|t| SystemTime::now().duration_since(t).ok())
}

/// Whether the manifest exists and playback can start
pub fn manifest_ready(dir: &Path) -> bool {
    dir.join("manifest.m3u8").exists()
}

/// Delete segments beyond the rolling window. The transcoder prunes its own
/// output; this sweeps up whatever a killed process left behind.
pub fn prune_segments(dir: &Path, keep: usize) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    let mut segments: Vec<(u64, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            let number = name
                .strip_prefix("seg-")?
                .strip_suffix(".ts")?
                .parse::<u64>()
                .ok()?;
            Some((number, entry.path()))
        })
        .collect();

    if segments.len() <= keep {
        return;
    }

    segments.sort_by_key(|(n, _)| *n);
    let excess = segments.len() - keep;
    for (_, path) in segments.into_iter().take(excess) {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to prune segment {:?}: {}", path, e);
        }
    }
}

/// Remove all live output for a stopped session
pub fn cleanup_output(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == "manifest.m3u8" || (name.starts_with("seg-") && name.ends_with(".ts")) {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamingConfig;

    #[test]
    fn rtsp_sources_force_tcp_transport() {
        let config = StreamingConfig::default();
        let args = build_args(&config, "rtsp://cam.local/stream");
        assert!(args.contains(&"-rtsp_transport".to_string()));

        let args = build_args(&config, "http://cam.local/feed.mjpeg");
        assert!(!args.contains(&"-rtsp_transport".to_string()));
    }

    #[test]
    fn prune_keeps_newest_segments() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..6 {
            std::fs::write(tmp.path().join(format!("seg-{}.ts", i)), b"x").unwrap();
        }
        std::fs::write(tmp.path().join("manifest.m3u8"), b"#EXTM3U").unwrap();

        prune_segments(tmp.path(), 3);

        let mut left: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["manifest.m3u8", "seg-3.ts", "seg-4.ts", "seg-5.ts"]);
    }

    #[test]
    fn output_age_ignores_unrelated_files() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(newest_output_age(tmp.path()).is_none());

        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        assert!(newest_output_age(tmp.path()).is_none());

        std::fs::write(tmp.path().join("seg-0.ts"), b"x").unwrap();
        let age = newest_output_age(tmp.path()).unwrap();
        assert!(age < Duration::from_secs(5));
    }
}
