use crate::config::StreamingConfig;
use crate::db::repositories::cameras::CameraDirectory;
use crate::error::Error;
use crate::media;
use crate::stream::transcode::{self, TranscodeProcess};
use anyhow::Result;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Running,
    Degraded,
    Stopped,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Live transcode session for one camera
struct StreamSession {
    camera_id: Uuid,
    source_url: String,
    out_dir: PathBuf,
    process: Option<TranscodeProcess>,
    state: SessionState,
    viewers: u32,
    starts: u32,
    consecutive_failures: u32,
    last_spawn: Instant,
    idle_since: Option<Instant>,
}

impl StreamSession {
    fn spawn(&mut self, config: &StreamingConfig) -> Result<()> {
        let process = transcode::spawn(config, &self.source_url, &self.out_dir)?;
        self.process = Some(process);
        self.state = SessionState::Starting;
        self.starts += 1;
        self.last_spawn = Instant::now();
        Ok(())
    }

    fn status(&self) -> StreamStatus {
        StreamStatus {
            camera_id: self.camera_id,
            state: self.state,
            viewers: self.viewers,
            starts: self.starts,
            consecutive_failures: self.consecutive_failures,
            manifest_ready: transcode::manifest_ready(&self.out_dir),
        }
    }
}

/// Viewer handle returned by acquire; streams stay up while at least one
/// handle is outstanding (plus the idle grace period after the last release)
#[derive(Debug)]
pub struct StreamHandle {
    pub camera_id: Uuid,
    pub manifest: PathBuf,
}

/// Snapshot of a session for operators
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub camera_id: Uuid,
    pub state: SessionState,
    pub viewers: u32,
    pub starts: u32,
    pub consecutive_failures: u32,
    pub manifest_ready: bool,
}

type SessionMap = Arc<RwLock<HashMap<Uuid, Arc<Mutex<StreamSession>>>>>;

/// Owns zero-or-one transcode process per camera.
///
/// Sessions live in an arena keyed by camera id with explicit viewer
/// refcounts; teardown is deterministic (last release + grace period) and a
/// per-session watchdog restarts unhealthy processes up to the configured
/// ceiling before the session degrades and stops retrying.
pub struct StreamSupervisor {
    config: StreamingConfig,
    directory: Arc<dyn CameraDirectory>,
    sessions: SessionMap,
}

impl StreamSupervisor {
    pub fn new(config: StreamingConfig, directory: Arc<dyn CameraDirectory>) -> Self {
        Self {
            config,
            directory,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start or attach to the camera's live session and wait until it is
    /// producing segments or the start timeout passes. The session keeps
    /// starting in the background on timeout; callers observe progress via
    /// `status`.
    pub async fn acquire(&self, camera_id: &Uuid) -> Result<StreamHandle> {
        let camera = self
            .directory
            .camera_by_id(camera_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera not found: {}", camera_id)))?;

        let source_url = camera
            .source_url
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                Error::NoSource(format!("camera {} has no source feed configured", camera_id))
            })?;

        // The address is handed to a child process; refuse anything that does
        // not parse as a URL.
        url::Url::parse(&source_url).map_err(|e| {
            Error::Streaming(format!(
                "camera {} has an invalid source address: {}",
                camera_id, e
            ))
        })?;

        let session = self.session_entry(camera_id, &source_url).await?;

        // Wait for first output without holding the session lock.
        let out_dir = media::live_dir(&self.config.streams_dir, camera_id);
        let deadline = Instant::now() + Duration::from_secs(self.config.start_timeout_secs);
        while Instant::now() < deadline && !transcode::manifest_ready(&out_dir) {
            {
                let s = session.lock().await;
                if s.state == SessionState::Degraded {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if transcode::manifest_ready(&out_dir) {
            let mut s = session.lock().await;
            if s.state == SessionState::Starting {
                s.state = SessionState::Running;
                s.consecutive_failures = 0;
            }
        }

        Ok(StreamHandle {
            camera_id: *camera_id,
            manifest: media::manifest_path(&self.config.streams_dir, camera_id),
        })
    }

    /// Drop one viewer reference. The transcode keeps running until the last
    /// reference is released and the idle grace period passes.
    pub async fn release(&self, handle: StreamHandle) {
        let sessions = self.sessions.read().await;
        if let Some(session) = sessions.get(&handle.camera_id) {
            let mut s = session.lock().await;
            s.viewers = s.viewers.saturating_sub(1);
            if s.viewers == 0 {
                s.idle_since = Some(Instant::now());
            }
        }
    }

    /// Session snapshot for a camera, if one exists
    pub async fn status(&self, camera_id: &Uuid) -> Option<StreamStatus> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(camera_id)?;
        let s = session.lock().await;
        Some(s.status())
    }

    /// Kill and respawn a camera's transcode for a fresh live view
    pub async fn force_restart(&self, camera_id: &Uuid) -> Result<StreamStatus> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(camera_id)
            .ok_or_else(|| Error::NotFound(format!("No session for camera {}", camera_id)))?;

        let mut s = session.lock().await;
        if let Some(process) = s.process.take() {
            process.stop().await;
        }
        transcode::cleanup_output(&s.out_dir);
        s.consecutive_failures = 0;
        s.spawn(&self.config)?;

        info!("Forced restart of transcode for camera {}", camera_id);
        Ok(s.status())
    }

    /// Stop every session and clean up live output
    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().collect()
        };

        for (camera_id, session) in drained {
            let mut s = session.lock().await;
            if let Some(process) = s.process.take() {
                process.stop().await;
            }
            s.state = SessionState::Stopped;
            transcode::cleanup_output(&s.out_dir);
            info!("Stopped transcode for camera {}", camera_id);
        }
    }

    async fn session_entry(
        &self,
        camera_id: &Uuid,
        source_url: &str,
    ) -> Result<Arc<Mutex<StreamSession>>> {
        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions.get(camera_id).cloned() {
            let mut s = existing.lock().await;
            if s.state != SessionState::Stopped {
                s.viewers += 1;
                s.idle_since = None;
                // A degraded session only restarts on an explicit new view
                // request, never on its own.
                if s.process.is_none() {
                    s.consecutive_failures = 0;
                    if let Err(e) = s.spawn(&self.config) {
                        s.viewers = s.viewers.saturating_sub(1);
                        return Err(e);
                    }
                }
                drop(s);
                return Ok(existing);
            }
            // Stale entry whose watchdog is winding down; replace it.
            drop(s);
            sessions.remove(camera_id);
        }

        let out_dir = media::live_dir(&self.config.streams_dir, camera_id);
        let mut session = StreamSession {
            camera_id: *camera_id,
            source_url: source_url.to_string(),
            out_dir,
            process: None,
            state: SessionState::Starting,
            viewers: 1,
            starts: 0,
            consecutive_failures: 0,
            last_spawn: Instant::now(),
            idle_since: None,
        };
        session.spawn(&self.config)?;

        let session = Arc::new(Mutex::new(session));
        sessions.insert(*camera_id, session.clone());

        tokio::spawn(watchdog(
            session.clone(),
            self.sessions.clone(),
            self.config.clone(),
            *camera_id,
        ));

        info!("Started transcode session for camera {}", camera_id);
        Ok(session)
    }
}

/// Per-session health loop: judges the transcode by output freshness,
/// restarts it up to the ceiling, and tears the session down after the idle
/// grace period.
async fn watchdog(
    session: Arc<Mutex<StreamSession>>,
    sessions: SessionMap,
    config: StreamingConfig,
    camera_id: Uuid,
) {
    let interval = Duration::from_millis(config.watchdog_interval_ms);
    let freshness = Duration::from_secs(config.freshness_timeout_secs);
    let idle_grace = Duration::from_secs(config.idle_grace_secs);

    loop {
        tokio::time::sleep(interval).await;

        let mut stopped_process: Option<TranscodeProcess> = None;
        let mut remove = false;

        {
            let mut s = session.lock().await;

            if s.state == SessionState::Stopped {
                // shutdown() already tore this session down
                break;
            }

            // Idle teardown: last viewer gone and the grace period elapsed.
            if s.viewers == 0 {
                if let Some(idle) = s.idle_since {
                    if idle.elapsed() >= idle_grace {
                        stopped_process = s.process.take();
                        s.state = SessionState::Stopped;
                        remove = true;
                    }
                }
            }

            if !remove && s.state != SessionState::Degraded {
                let exited = match s.process.as_mut() {
                    Some(p) => p.has_exited(),
                    None => true,
                };
                let fresh = transcode::manifest_ready(&s.out_dir)
                    && transcode::newest_output_age(&s.out_dir)
                        .map(|age| age < freshness)
                        .unwrap_or(false);

                if !exited && fresh {
                    if s.state == SessionState::Starting {
                        s.state = SessionState::Running;
                    }
                    s.consecutive_failures = 0;
                    transcode::prune_segments(&s.out_dir, config.retention_segments as usize);
                } else {
                    // Starting sessions get the full start window for their
                    // first output; running ones only the freshness window.
                    let window = if exited {
                        Duration::ZERO
                    } else if s.state == SessionState::Starting {
                        Duration::from_secs(config.start_timeout_secs)
                    } else {
                        freshness
                    };

                    if s.last_spawn.elapsed() >= window {
                        if let Some(p) = s.process.take() {
                            stopped_process = Some(p);
                        }
                        s.consecutive_failures += 1;

                        if s.consecutive_failures > config.restart_ceiling {
                            error!(
                                "Camera {}: transcode degraded after {} consecutive failures",
                                camera_id, s.consecutive_failures
                            );
                            s.state = SessionState::Degraded;
                        } else {
                            warn!(
                                "Camera {}: transcode unhealthy (failure {}/{}), restarting",
                                camera_id, s.consecutive_failures, config.restart_ceiling
                            );
                            if let Err(e) = s.spawn(&config) {
                                error!("Camera {}: restart failed: {}", camera_id, e);
                                s.state = SessionState::Degraded;
                            }
                        }
                    }
                }
            }
        }

        if let Some(process) = stopped_process {
            process.stop().await;
        }

        if remove {
            {
                let mut map = sessions.write().await;
                map.remove(&camera_id);
            }
            let out_dir = media::live_dir(&config.streams_dir, &camera_id);
            transcode::cleanup_output(&out_dir);
            info!("Idle transcode session for camera {} stopped", camera_id);
            break;
        }
    }
}
