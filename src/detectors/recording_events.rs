//! Recording-Events Detector: the scheduled/started/completed/
//! cancelled state machine. Four upstream event shapes drive internal
//! transitions between three partitions (`scheduled`, `active`, `pending`),
//! all three guarded by one "event lock" that the watchdog is allowed to
//! forcibly replace if the detector appears stuck — treating the lock
//! itself as a disposable, swappable resource.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::activity::ActivityRecorder;
use crate::caches::{fetch_recording, JobCache};
use crate::client::DvrClient;
use crate::clock::unix_now;
use crate::config::RecordingEventsOptions;
use crate::detector::Detector;
use crate::formatter::{format_recording_alert, format_recording_time, RecordingAlertFields};
use crate::model::{ActivityRecord, CompletedRecording, DvrEvent, PendingRecording, RecordingJob, RecordingOutcome};
use crate::notifier::NotificationManager;
use crate::session_store::SessionStore;

const SCHEDULE_HORIZON_SECS: u64 = 30;
const NOTIFICATION_COOLDOWN_SECS: u64 = 60;
const PENDING_TIMEOUT_SECS: u64 = 600;
const PENDING_CYCLE_CAP: usize = 10;
const WATCHDOG_IDLE_SECS: u64 = 30 * 60;
const SCHEDULED_MAX_AGE_SECS: u64 = 24 * 3600;
const PENDING_MAX_AGE_SECS: u64 = 6 * 3600;
const MAX_RETRIES: u32 = 300;
const CLEANUP_PROBE_CAP: usize = 50;

#[derive(Default)]
struct Partitions {
    scheduled: HashMap<String, RecordingJob>,
    active: HashMap<String, RecordingJob>,
    pending: HashMap<String, PendingRecording>,
}

pub struct RecordingEventsDetector {
    job_cache: Arc<JobCache>,
    dvr: Arc<dyn DvrClient>,
    // Reused purely for its generic notification-key/cooldown bookkeeping,
    // not for session tracking.
    cooldowns: Arc<SessionStore>,
    notifier: Arc<NotificationManager>,
    activity_recorder: Arc<ActivityRecorder>,
    options: RecordingEventsOptions,
    tz: chrono_tz::Tz,
    event_lock: std::sync::Mutex<Arc<tokio::sync::Mutex<Partitions>>>,
    last_handled: AtomicU64,
}

impl RecordingEventsDetector {
    pub fn new(
        job_cache: Arc<JobCache>,
        dvr: Arc<dyn DvrClient>,
        cooldowns: Arc<SessionStore>,
        notifier: Arc<NotificationManager>,
        activity_recorder: Arc<ActivityRecorder>,
        options: RecordingEventsOptions,
        tz: chrono_tz::Tz,
    ) -> Self {
        Self {
            job_cache,
            dvr,
            cooldowns,
            notifier,
            activity_recorder,
            options,
            tz,
            event_lock: std::sync::Mutex::new(Arc::new(tokio::sync::Mutex::new(Partitions::default()))),
            last_handled: AtomicU64::new(0),
        }
    }

    async fn acquire(&self) -> tokio::sync::OwnedMutexGuard<Partitions> {
        let arc = self.event_lock.lock().unwrap().clone();
        arc.lock_owned().await
    }

    fn touch(&self, now: u64) {
        self.last_handled.store(now, Ordering::Relaxed);
    }

    async fn emit(&self, kind: &str, notification_key: &str, fields: RecordingAlertFields, subject: &str, now: u64) {
        if self.cooldowns.was_notification_sent(notification_key, NOTIFICATION_COOLDOWN_SECS, now) {
            return;
        }
        let alert = format_recording_alert(&fields);
        self.notifier.send(&alert.title, &alert.body, alert.image_url.as_deref()).await;
        self.cooldowns.record_notification(notification_key, now);
        self.activity_recorder
            .record(ActivityRecord::new(kind, alert.title, alert.body, "rec"), subject, "dvr", now)
            .await;
    }

    async fn on_job_created(&self, event: &DvrEvent) {
        let job_id = event.name.clone();
        let Some(job) = self.job_cache.get(&job_id).await else {
            return;
        };
        let now = unix_now();
        if job.start_time <= now + SCHEDULE_HORIZON_SECS {
            // Starts too soon to bother with a Scheduled alert; the
            // recording-started transition will pick it up directly.
            return;
        }

        {
            let mut partitions = self.acquire().await;
            partitions.scheduled.insert(job_id.clone(), job.clone());
        }
        self.touch(now);

        if !self.options.alert_scheduled {
            return;
        }
        let fields = RecordingAlertFields {
            status_emoji: "📅",
            status_label: "Scheduled".to_string(),
            job_name: job.name.clone(),
            channels: job.channels.clone(),
            time_label: format_recording_time(job.start_time, now, &self.tz),
            duration_secs: Some(job.duration),
        };
        self.emit(
            "recording.scheduled",
            &format!("recording-scheduled-{job_id}"),
            fields,
            &job_id,
            now,
        )
        .await;
    }

    async fn on_job_started(&self, event: &DvrEvent) {
        let Some(job_id) = event.value.strip_prefix("recording-") else {
            return;
        };
        let job_id = job_id.to_string();
        let job = self.job_cache.get(&job_id).await;
        let now = unix_now();

        {
            let mut partitions = self.acquire().await;
            partitions.scheduled.remove(&job_id);
            if let Some(job) = job.clone() {
                partitions.active.insert(job_id.clone(), job);
            }
        }
        self.touch(now);

        let Some(job) = job else {
            return;
        };
        if !self.options.alert_started {
            return;
        }
        let fields = RecordingAlertFields {
            status_emoji: "🔴",
            status_label: "Started".to_string(),
            job_name: job.name.clone(),
            channels: job.channels.clone(),
            time_label: format_recording_time(now, now, &self.tz),
            duration_secs: Some(job.duration),
        };
        self.emit("recording.started", &format!("recording-started-{job_id}"), fields, &job_id, now)
            .await;
    }

    async fn on_recording_completed(&self, event: &DvrEvent) {
        let Some(file_id) = event.value.strip_prefix("recorded-") else {
            return;
        };
        let file_id = file_id.to_string();
        let now = unix_now();

        let Ok(recording) = fetch_recording(&self.dvr, &file_id).await else {
            return;
        };

        if recording.processed {
            self.finalize_recording(recording, now).await;
        } else {
            let mut partitions = self.acquire().await;
            partitions.pending.entry(file_id.clone()).or_insert(PendingRecording {
                first_seen: now,
                last_check: now,
                check_count: 1,
                file_id,
                job_id: Some(recording.job_id),
            });
        }
        self.touch(now);
    }

    async fn on_job_deleted(&self, event: &DvrEvent) {
        let job_id = event.name.clone();
        let now = unix_now();
        let was_scheduled = {
            let mut partitions = self.acquire().await;
            partitions.scheduled.remove(&job_id).is_some()
        };
        self.touch(now);

        if !was_scheduled || !self.options.alert_cancelled {
            return;
        }
        let fields = RecordingAlertFields {
            status_emoji: RecordingOutcome::Cancelled.emoji(),
            status_label: RecordingOutcome::Cancelled.label().to_string(),
            job_name: job_id.clone(),
            channels: vec![],
            time_label: format_recording_time(now, now, &self.tz),
            duration_secs: None,
        };
        self.emit("recording.cancelled", &format!("recording-cancelled-{job_id}"), fields, &job_id, now)
            .await;
    }

    async fn finalize_recording(&self, recording: CompletedRecording, now: u64) {
        {
            let mut partitions = self.acquire().await;
            partitions.active.remove(&recording.job_id);
            partitions.pending.remove(&recording.file_id);
        }

        let outcome = RecordingOutcome::classify(recording.cancelled, recording.completed, recording.delayed);
        let (enabled, state) = match outcome {
            RecordingOutcome::Cancelled => (self.options.alert_cancelled, "cancelled"),
            _ => (self.options.alert_completed, "completed"),
        };
        if !enabled {
            return;
        }

        let fields = RecordingAlertFields {
            status_emoji: outcome.emoji(),
            status_label: outcome.label().to_string(),
            job_name: recording.title.clone(),
            channels: recording.channel.clone().into_iter().collect(),
            time_label: format_recording_time(now, now, &self.tz),
            duration_secs: recording.duration,
        };
        self.emit(
            &format!("recording.{state}"),
            &format!("recording-{state}-{}", recording.file_id),
            fields,
            &recording.file_id,
            now,
        )
        .await;
    }

    /// Bounded-rate retry worker for the pending queue: snapshots
    /// up to 10 entries under the lock, then does the HTTP re-fetch outside
    /// it. Called by a scheduler roughly every 2 seconds.
    pub async fn process_pending(&self) {
        let now = unix_now();
        let snapshot: Vec<(String, PendingRecording)> = {
            let partitions = self.acquire().await;
            partitions
                .pending
                .iter()
                .take(PENDING_CYCLE_CAP)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        for (file_id, pending) in snapshot {
            if now.saturating_sub(pending.first_seen) > PENDING_TIMEOUT_SECS {
                let mut partitions = self.acquire().await;
                partitions.pending.remove(&file_id);
                warn!(file_id = %file_id, "pending recording lookup timed out");
                continue;
            }

            match fetch_recording(&self.dvr, &file_id).await {
                Ok(recording) if recording.processed => {
                    self.finalize_recording(recording, now).await;
                }
                Ok(_) => {
                    let mut partitions = self.acquire().await;
                    if let Some(entry) = partitions.pending.get_mut(&file_id) {
                        entry.last_check = now;
                        entry.check_count += 1;
                    }
                }
                Err(_) => {}
            }
        }
    }

    /// Liveness check: if no transition has been handled in 30
    /// minutes and the event lock looks stuck, replace it with a fresh one
    /// and refresh the Job Cache. Called roughly every 5 minutes.
    pub async fn watchdog_check(&self) {
        let now = unix_now();
        let last = self.last_handled.load(Ordering::Relaxed);
        if now.saturating_sub(last) <= WATCHDOG_IDLE_SECS {
            return;
        }

        let appears_stuck = {
            let arc = self.event_lock.lock().unwrap().clone();
            arc.try_lock().is_err()
        };
        if !appears_stuck {
            return;
        }

        warn!("recording-events watchdog: resetting event lock after 30 min of inactivity");
        *self.event_lock.lock().unwrap() = Arc::new(tokio::sync::Mutex::new(Partitions::default()));
        let _ = self.job_cache.refresh_now().await;
    }
}

#[async_trait]
impl Detector for RecordingEventsDetector {
    fn name(&self) -> &'static str {
        "recording_events"
    }

    fn should_handle(&self, event: &DvrEvent) -> bool {
        match event.event_type.as_str() {
            "jobs.created" | "jobs.deleted" => true,
            "programs.set" => event.value.starts_with("recording-") || event.value.starts_with("recorded-"),
            _ => false,
        }
    }

    async fn handle(&self, event: &DvrEvent) {
        if !self.options.enabled {
            return;
        }
        match event.event_type.as_str() {
            "jobs.created" => self.on_job_created(event).await,
            "jobs.deleted" => self.on_job_deleted(event).await,
            "programs.set" if event.value.starts_with("recording-") => self.on_job_started(event).await,
            "programs.set" if event.value.starts_with("recorded-") => self.on_recording_completed(event).await,
            _ => {}
        }
    }

    async fn cleanup(&self) {
        let now = unix_now();
        let jobs = self.job_cache.refresh_now().await.unwrap_or_default();
        let mut partitions = self.acquire().await;

        let stale_scheduled: Vec<String> = partitions
            .scheduled
            .iter()
            .filter(|(id, job)| !jobs.contains_key(*id) || now.saturating_sub(job.start_time) > SCHEDULED_MAX_AGE_SECS)
            .take(CLEANUP_PROBE_CAP)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale_scheduled {
            partitions.scheduled.remove(&id);
        }

        let stale_active: Vec<String> = partitions
            .active
            .keys()
            .filter(|id| !jobs.contains_key(*id))
            .take(CLEANUP_PROBE_CAP)
            .cloned()
            .collect();
        for id in stale_active {
            partitions.active.remove(&id);
        }

        let stale_pending: Vec<String> = partitions
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.first_seen) > PENDING_MAX_AGE_SECS || p.check_count > MAX_RETRIES)
            .take(CLEANUP_PROBE_CAP)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale_pending {
            partitions.pending.remove(&id);
        }
    }
}
