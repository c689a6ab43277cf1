// src/manager.rs

//! `StreamManager`: owns the one transcoder child process at a time, the
//! five-state FSM, and the reconnect-with-backoff flow. Grounded on
//! `original_source/services/source-camera/camera/stream.py`'s
//! `StreamManager`, restructured around an async mutex around process
//! mutation (spec.md §5's "child process handle... all mutations
//! serialised by a mutex") instead of Python's `asyncio.Lock`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sense_broker::now_ts;
use tokio::process::Child;
use tokio::sync::{Mutex, mpsc};

use crate::config::HlsSettings;
use crate::ffmpeg::{self, ParsedVideoInfo};
use crate::reconnect;
use crate::state::{StreamState, StreamStatus};

const STARTUP_GRACE: Duration = Duration::from_secs(2);
const KILL_GRACE: Duration = Duration::from_secs(5);
const STALE_THRESHOLD: Duration = Duration::from_secs(10);

struct Inner {
    state: StreamState,
    process: Option<Child>,
    start_time: Option<f64>,
    error_message: Option<String>,
    reconnect_attempts: u32,
    resolution: Option<String>,
    fps: Option<u32>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: StreamState::Stopped,
            process: None,
            start_time: None,
            error_message: None,
            reconnect_attempts: 0,
            resolution: None,
            fps: None,
        }
    }
}

pub struct StreamManager {
    rtsp_url: String,
    transport: String,
    output_dir: PathBuf,
    hls: HlsSettings,
    max_reconnect_attempts: i64,
    reconnect_base_secs: f64,
    inner: Mutex<Inner>,
}

impl StreamManager {
    pub fn new(
        rtsp_url: impl Into<String>,
        transport: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        hls: HlsSettings,
        max_reconnect_attempts: i64,
        reconnect_base_secs: f64,
    ) -> Self {
        Self {
            rtsp_url: rtsp_url.into(),
            transport: transport.into(),
            output_dir: output_dir.into(),
            hls,
            max_reconnect_attempts,
            reconnect_base_secs,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join("stream.m3u8")
    }

    pub async fn status(&self) -> StreamStatus {
        let inner = self.inner.lock().await;
        let uptime = match inner.start_time {
            Some(t0) => ((now_ts() - t0).max(0.0) * 10.0).round() / 10.0,
            None => 0.0,
        };
        StreamStatus {
            state: inner.state,
            connected: inner.state == StreamState::Streaming,
            error: inner.error_message.clone(),
            resolution: inner.resolution.clone(),
            fps: inner.fps,
            uptime_secs: uptime,
        }
    }

    pub async fn state(&self) -> StreamState {
        self.inner.lock().await.state
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().await.reconnect_attempts
    }

    fn ensure_output_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_dir)
    }

    fn cleanup_segments(&self) {
        if let Ok(entries) = std::fs::read_dir(&self.output_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "ts") {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        let playlist = self.playlist_path();
        if playlist.exists() {
            let _ = std::fs::remove_file(&playlist);
        }
    }

    /// Spawns a fresh transcoder into `inner.process`, wiring up the stderr
    /// reader. Does not touch `inner.state`; callers decide the transition.
    async fn spawn_transcoder(self: &Arc<Self>, inner: &mut Inner) -> anyhow::Result<()> {
        self.ensure_output_dir()?;
        self.cleanup_segments();

        let argv = ffmpeg::build_command(&self.transport, &self.rtsp_url, &self.output_dir, self.hls);
        let mut child = ffmpeg::spawn(&argv)?;

        if let Some(stderr) = child.stderr.take() {
            let (tx, rx) = mpsc::channel(32);
            tokio::spawn(ffmpeg::read_stderr(stderr, tx));
            let mgr = self.clone();
            tokio::spawn(async move { mgr.drain_video_info(rx).await });
        }

        inner.process = Some(child);
        Ok(())
    }

    async fn drain_video_info(self: Arc<Self>, mut rx: mpsc::Receiver<ParsedVideoInfo>) {
        while let Some(info) = rx.recv().await {
            let mut inner = self.inner.lock().await;
            if let Some(resolution) = info.resolution {
                inner.resolution = Some(resolution);
            }
            if let Some(fps) = info.fps {
                inner.fps = Some(fps);
            }
        }
    }

    /// Starts the stream from `STOPPED`. Idempotent: a call while already
    /// running returns `Ok(())` without restarting anything.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.process.is_some() {
            return Ok(());
        }

        inner.state = StreamState::Starting;
        inner.start_time = Some(now_ts());
        inner.error_message = None;
        inner.resolution = None;
        inner.fps = None;

        if let Err(err) = self.spawn_transcoder(&mut inner).await {
            inner.state = StreamState::Error;
            inner.error_message = Some(err.to_string());
            return Err(err);
        }
        drop(inner);

        tokio::time::sleep(STARTUP_GRACE).await;

        let mut inner = self.inner.lock().await;
        let alive = matches!(
            inner.process.as_mut().map(|c| c.try_wait()),
            Some(Ok(None))
        );
        if alive {
            inner.state = StreamState::Streaming;
            inner.reconnect_attempts = 0;
            tracing::info!("transcoder streaming");
            Ok(())
        } else {
            inner.state = StreamState::Error;
            inner.error_message = Some("transcoder exited during startup".to_string());
            inner.process = None;
            anyhow::bail!("transcoder failed to start")
        }
    }

    /// Stops the stream: kills the transcoder (SIGTERM, then SIGKILL after a
    /// grace period), cleans segments, and resets to `STOPPED`.
    pub async fn stop(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if let Some(mut child) = inner.process.take() {
            kill_gracefully(&mut child).await;
        }
        self.cleanup_segments();
        inner.state = StreamState::Stopped;
        inner.start_time = None;
        inner.error_message = None;
        inner.reconnect_attempts = 0;
        inner.resolution = None;
        inner.fps = None;
    }

    pub async fn restart(self: &Arc<Self>) -> anyhow::Result<()> {
        self.stop().await;
        self.start().await
    }

    /// One health-monitor tick (spec.md §4.4.3). A no-op outside
    /// `STREAMING`/`RECONNECTING`.
    pub async fn health_tick(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.state, StreamState::Streaming | StreamState::Reconnecting) {
            return;
        }

        let exited = match inner.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => true,
        };
        if exited {
            tracing::warn!("transcoder exited, reconnecting");
            inner.process = None;
            inner.state = StreamState::Error;
            inner.error_message = Some("transcoder exited".to_string());
            drop(inner);
            self.reconnect().await;
            return;
        }

        if let Ok(metadata) = std::fs::metadata(self.playlist_path())
            && let Ok(modified) = metadata.modified()
        {
            let age = std::time::SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();
            if age > STALE_THRESHOLD {
                tracing::warn!(age_secs = age.as_secs_f64(), "stream stale, reconnecting");
                inner.state = StreamState::Error;
                inner.error_message = Some("stream stale - no new segments".to_string());
                let process = inner.process.take();
                drop(inner);
                if let Some(mut child) = process {
                    kill_gracefully(&mut child).await;
                }
                self.reconnect().await;
                return;
            }
        }

        if inner.state != StreamState::Streaming {
            inner.state = StreamState::Streaming;
            inner.error_message = None;
            inner.reconnect_attempts = 0;
        }
    }

    async fn reconnect(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        let attempt = inner.reconnect_attempts + 1;
        if !reconnect::attempt_allowed(attempt, self.max_reconnect_attempts) {
            tracing::error!(attempt, "max reconnect attempts reached");
            inner.state = StreamState::Error;
            inner.error_message = Some("max reconnect attempts reached".to_string());
            return;
        }

        inner.reconnect_attempts = attempt;
        inner.state = StreamState::Reconnecting;
        let delay = reconnect::backoff_delay_secs(attempt, self.reconnect_base_secs);
        drop(inner);

        tracing::info!(attempt, delay_secs = delay, "reconnecting transcoder");
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;

        let mut inner = self.inner.lock().await;
        if inner.state != StreamState::Reconnecting {
            return;
        }
        if let Err(err) = self.spawn_transcoder(&mut inner).await {
            inner.state = StreamState::Error;
            inner.error_message = Some(err.to_string());
            return;
        }
        drop(inner);

        tokio::time::sleep(STARTUP_GRACE).await;

        let mut inner = self.inner.lock().await;
        if inner.state != StreamState::Reconnecting {
            return;
        }
        let alive = matches!(
            inner.process.as_mut().map(|c| c.try_wait()),
            Some(Ok(None))
        );
        if alive {
            inner.state = StreamState::Streaming;
            inner.error_message = None;
            inner.reconnect_attempts = 0;
            tracing::info!("reconnected");
        } else {
            inner.state = StreamState::Error;
            inner.error_message = Some("transcoder exited during reconnect".to_string());
            inner.process = None;
        }
    }
}

/// SIGTERM, then SIGKILL after `KILL_GRACE` if the process hasn't exited.
async fn kill_gracefully(child: &mut Child) {
    if let Some(pid) = child.id() {
        // Safety: `pid` is the live child's own pid, owned exclusively by us.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        tracing::warn!("transcoder did not exit after SIGTERM, sending SIGKILL");
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(rtsp_url: &str, output_dir: PathBuf) -> Arc<StreamManager> {
        Arc::new(StreamManager::new(
            rtsp_url,
            "tcp",
            output_dir,
            HlsSettings::default(),
            10,
            5.0,
        ))
    }

    #[tokio::test]
    async fn start_against_missing_binary_enters_error_state() {
        let dir = std::env::temp_dir().join(format!("sense-camera-test-{}", std::process::id()));
        let mgr = manager("rtsp://127.0.0.1/does-not-matter", dir.clone());
        // ffmpeg is assumed absent in the test sandbox; if present, this test
        // still holds because the RTSP host is unreachable and ffmpeg exits
        // non-zero well inside the 2s startup grace.
        let result = mgr.start().await;
        // Either spawn itself failed (binary missing) or the process died
        // during the startup grace window; both land in ERROR.
        if result.is_err() {
            assert_eq!(mgr.state().await, StreamState::Error);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reconnect_delay_matches_backoff_law() {
        assert_eq!(reconnect::backoff_delay_secs(4, 5.0), 40.0);
    }
}
