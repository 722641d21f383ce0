//! Disk-Space Detector. Unlike the other three, this one is not
//! a `Detector`: it has no upstream event to react to, just its own polling
//! loop against `/dvr`, independent of the SSE stream entirely.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::activity::ActivityRecorder;
use crate::client::DvrClient;
use crate::clock::unix_now;
use crate::config::DiskSpaceOptions;
use crate::error::DvrClientError;
use crate::model::ActivityRecord;
use crate::notifier::NotificationManager;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const POLL_INTERVAL_SECS: u64 = 120;
const ERROR_BACKOFF_START_SECS: u64 = 2;
const ERROR_BACKOFF_CAP_SECS: u64 = 30;
const ALERT_COOLDOWN_SECS: u64 = 3600;
const HISTORY_CAP: usize = 24;
const STALE_AFTER_MISSED_POLLS: u64 = 3;

struct State {
    alert_sent: bool,
    last_alert: u64,
    last_success: u64,
    /// (timestamp, free_bytes), oldest first, capped at 24 samples.
    history: VecDeque<(u64, u64)>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DiskSpaceSnapshot {
    pub alert_active: bool,
    pub last_alert: u64,
    pub last_success: u64,
    pub last_free_bytes: Option<u64>,
}

pub struct DiskSpaceDetector {
    dvr: Arc<dyn DvrClient>,
    notifier: Arc<NotificationManager>,
    activity_recorder: Arc<ActivityRecorder>,
    options: DiskSpaceOptions,
    state: Mutex<State>,
}

impl DiskSpaceDetector {
    pub fn new(
        dvr: Arc<dyn DvrClient>,
        notifier: Arc<NotificationManager>,
        activity_recorder: Arc<ActivityRecorder>,
        options: DiskSpaceOptions,
    ) -> Self {
        Self {
            dvr,
            notifier,
            activity_recorder,
            options,
            state: Mutex::new(State {
                alert_sent: false,
                last_alert: 0,
                last_success: unix_now(),
                history: VecDeque::with_capacity(HISTORY_CAP),
            }),
        }
    }

    /// Cheap jitter with no extra dependency: the sub-second component of
    /// the wall clock as a `[-5, 5]` second offset.
    fn jittered(base: u64) -> u64 {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let offset = (nanos % 11) as i64 - 5;
        (base as i64 + offset).max(1) as u64
    }

    /// Polls `/dvr` once, updates alert/history state, and emits a
    /// notification if the disk just crossed into unhealthy territory (or
    /// the cooldown has elapsed since the last alert).
    pub async fn poll_once(&self) -> Result<(), DvrClientError> {
        let status = self.dvr.get_status().await?;
        let now = unix_now();
        let percent_free = status.percent_free();
        let free_gib = status.free_bytes as f64 / GIB;
        let unhealthy = percent_free < self.options.threshold_percent || free_gib < self.options.threshold_gb;

        let mut state = self.state.lock().await;
        state.last_success = now;
        state.history.push_back((now, status.free_bytes));
        if state.history.len() > HISTORY_CAP {
            state.history.pop_front();
        }

        if let Some(eta_secs) = Self::estimate_seconds_to_threshold(&state.history, self.options.threshold_gb) {
            info!(eta_secs, "disk space projected to cross threshold");
        }

        if unhealthy {
            if now.saturating_sub(state.last_alert) >= ALERT_COOLDOWN_SECS {
                state.last_alert = now;
                state.alert_sent = true;
                drop(state);
                self.emit_alert(percent_free, free_gib, &status.path, now).await;
            }
        } else if state.alert_sent {
            state.alert_sent = false;
            info!("disk space back above threshold, alert latch reset");
        }

        Ok(())
    }

    async fn emit_alert(&self, percent_free: f64, free_gib: f64, path: &str, now: u64) {
        let body = format!(
            "Free space: {free_gib:.1} GiB ({percent_free:.1}%)\nPath: {path}\nThreshold: {:.1}% / {:.1} GiB",
            self.options.threshold_percent, self.options.threshold_gb
        );
        let title = "Channels DVR - Low Disk Space";
        self.notifier.send(title, &body, None).await;
        self.activity_recorder
            .record(ActivityRecord::new("disk.low", title, body, "disk"), path, "dvr", now)
            .await;
    }

    /// Linear regression over recent `(timestamp, free_bytes)` samples,
    /// projecting when free space crosses the GiB threshold. Logged only,
    /// never alerted on.
    fn estimate_seconds_to_threshold(history: &VecDeque<(u64, u64)>, threshold_gb: f64) -> Option<i64> {
        if history.len() < 2 {
            return None;
        }
        let n = history.len() as f64;
        let (sum_x, sum_y, sum_xy, sum_xx) = history.iter().fold((0f64, 0f64, 0f64, 0f64), |(sx, sy, sxy, sxx), (t, f)| {
            let x = *t as f64;
            let y = *f as f64;
            (sx + x, sy + y, sxy + x * y, sxx + x * x)
        });
        let denom = n * sum_xx - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            return None;
        }
        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        if slope >= 0.0 {
            // Free space isn't trending down; no meaningful ETA.
            return None;
        }
        let intercept = (sum_y - slope * sum_x) / n;
        let threshold_bytes = threshold_gb * GIB;
        let eta_x = (threshold_bytes - intercept) / slope;
        let last_x = history.back().map(|(t, _)| *t as f64).unwrap_or(0.0);
        Some((eta_x - last_x) as i64)
    }

    /// The polling loop; intended to run for the process lifetime as its own
    /// task. Normal cadence is 120s with jitter; errors retry sooner, with
    /// exponential backoff capped at 30s.
    pub async fn run(self: Arc<Self>) {
        let mut error_backoff = ERROR_BACKOFF_START_SECS;
        loop {
            match self.poll_once().await {
                Ok(()) => {
                    error_backoff = ERROR_BACKOFF_START_SECS;
                    tokio::time::sleep(Duration::from_secs(Self::jittered(POLL_INTERVAL_SECS))).await;
                }
                Err(err) => {
                    warn!(error = %err, "disk-space poll failed");
                    tokio::time::sleep(Duration::from_secs(error_backoff)).await;
                    error_backoff = (error_backoff * 2).min(ERROR_BACKOFF_CAP_SECS);
                }
            }
        }
    }

    /// Read-only view for the control plane's `/status` endpoint.
    pub async fn snapshot(&self) -> DiskSpaceSnapshot {
        let state = self.state.lock().await;
        DiskSpaceSnapshot {
            alert_active: state.alert_sent,
            last_alert: state.last_alert,
            last_success: state.last_success,
            last_free_bytes: state.history.back().map(|(_, free)| *free),
        }
    }

    /// Self-healing check: if the poller hasn't completed a
    /// successful pass in three intervals, force one immediately rather than
    /// literally respawning the `run` task. Intended to run every 30 min.
    pub async fn health_check(&self) {
        let now = unix_now();
        let stale = {
            let state = self.state.lock().await;
            now.saturating_sub(state.last_success) > POLL_INTERVAL_SECS * STALE_AFTER_MISSED_POLLS
        };
        if stale {
            warn!("disk-space poller appears stalled, forcing an immediate poll");
            if let Err(err) = self.poll_once().await {
                warn!(error = %err, "disk-space recovery poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DvrClient;
    use crate::model::{ChannelInfo, CompletedRecording, DiskStatus, RecordingJob, VodCatalogEntry};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct StubDvr {
        status: StdMutex<DiskStatus>,
    }

    #[async_trait]
    impl DvrClient for StubDvr {
        async fn list_channels(&self) -> Result<Vec<ChannelInfo>, DvrClientError> {
            Ok(vec![])
        }
        async fn fetch_xmltv(&self) -> Result<String, DvrClientError> {
            Ok(String::new())
        }
        async fn list_jobs(&self) -> Result<Vec<RecordingJob>, DvrClientError> {
            Ok(vec![])
        }
        async fn get_job(&self, id: &str) -> Result<RecordingJob, DvrClientError> {
            Err(DvrClientError::NotFound(id.to_string()))
        }
        async fn get_recording(&self, file_id: &str) -> Result<CompletedRecording, DvrClientError> {
            Err(DvrClientError::NotFound(file_id.to_string()))
        }
        async fn list_recordings(&self) -> Result<Vec<CompletedRecording>, DvrClientError> {
            Ok(vec![])
        }
        async fn list_vod(&self) -> Result<Vec<VodCatalogEntry>, DvrClientError> {
            Ok(vec![])
        }
        async fn get_status(&self) -> Result<DiskStatus, DvrClientError> {
            Ok(self.status.lock().unwrap().clone())
        }
    }

    fn gib(n: f64) -> u64 {
        (n * GIB) as u64
    }

    fn detector(dvr: Arc<StubDvr>) -> (DiskSpaceDetector, tempfile::TempDir) {
        let notifier = Arc::new(NotificationManager::new(vec![]));
        let dir = tempfile::tempdir().unwrap();
        let activity_recorder = Arc::new(ActivityRecorder::new(dir.path()));
        let d = DiskSpaceDetector::new(
            dvr,
            notifier,
            activity_recorder,
            DiskSpaceOptions {
                enabled: true,
                threshold_percent: 10.0,
                threshold_gb: 50.0,
            },
        );
        (d, dir)
    }

    #[tokio::test]
    async fn low_disk_scenario_fires_once_then_cooldown_gates() {
        let dvr = Arc::new(StubDvr {
            status: StdMutex::new(DiskStatus {
                free_bytes: gib(40.0),
                total_bytes: gib(1000.0),
                used_bytes: gib(960.0),
                path: "/mnt/dvr".to_string(),
            }),
        });
        let (d, _dir) = detector(dvr);

        d.poll_once().await.unwrap();
        {
            let state = d.state.lock().await;
            assert!(state.alert_sent);
        }

        // Second poll with the same values, well within the 1h cooldown.
        d.poll_once().await.unwrap();
        {
            let state = d.state.lock().await;
            let alerts_fired = state.last_alert;
            assert_ne!(alerts_fired, 0);
        }
    }

    #[tokio::test]
    async fn recovery_clears_the_latch() {
        let dvr = Arc::new(StubDvr {
            status: StdMutex::new(DiskStatus {
                free_bytes: gib(40.0),
                total_bytes: gib(1000.0),
                used_bytes: gib(960.0),
                path: "/mnt/dvr".to_string(),
            }),
        });
        let (d, _dir) = detector(dvr.clone());
        d.poll_once().await.unwrap();
        assert!(d.state.lock().await.alert_sent);

        dvr.status.lock().unwrap().free_bytes = gib(200.0);
        d.poll_once().await.unwrap();
        assert!(!d.state.lock().await.alert_sent);
    }

    #[test]
    fn regression_returns_none_for_flat_or_growing_history() {
        let mut history = VecDeque::new();
        history.push_back((0, gib(100.0) as u64));
        history.push_back((100, gib(100.0) as u64));
        assert!(DiskSpaceDetector::estimate_seconds_to_threshold(&history, 50.0).is_none());
    }

    #[test]
    fn regression_projects_eta_for_declining_history() {
        let mut history = VecDeque::new();
        history.push_back((0, gib(100.0) as u64));
        history.push_back((100, gib(90.0) as u64));
        history.push_back((200, gib(80.0) as u64));
        let eta = DiskSpaceDetector::estimate_seconds_to_threshold(&history, 50.0);
        assert!(eta.is_some());
        assert!(eta.unwrap() > 0);
    }
}
