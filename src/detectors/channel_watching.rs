//! Channel-Watching Detector: turns live-viewing `activities.set`
//! events into session state, "now watching" / "exited" alerts, and activity
//! log entries.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::activity::ActivityRecorder;
use crate::caches::{ChannelCache, ProgramCache};
use crate::clock::unix_now;
use crate::config::ChannelWatchingOptions;
use crate::detector::Detector;
use crate::formatter::{format_channel_alert, format_exit_line, ChannelAlertFields};
use crate::model::{ActivityRecord, DvrEvent, Session};
use crate::notifier::NotificationManager;
use crate::parsing::{parse_channel_activity, parse_source_descriptor};
use crate::session_store::{tracking_key, SessionStore};
use crate::stream_tracker::StreamTracker;

/// Sessions untouched for this long are considered abandoned by the
/// periodic cleanup sweep, independent of any `activities.set` end event
/// (the upstream SSE stream is not guaranteed to deliver one).
const STALE_SESSION_SECS: u64 = 300;

pub struct ChannelWatchingDetector {
    sessions: Arc<SessionStore>,
    stream_tracker: Option<Arc<StreamTracker>>,
    channel_cache: Arc<ChannelCache>,
    program_cache: Arc<ProgramCache>,
    notifier: Arc<NotificationManager>,
    activity_recorder: Arc<ActivityRecorder>,
    options: ChannelWatchingOptions,
}

impl ChannelWatchingDetector {
    pub fn new(
        sessions: Arc<SessionStore>,
        stream_tracker: Option<Arc<StreamTracker>>,
        channel_cache: Arc<ChannelCache>,
        program_cache: Arc<ProgramCache>,
        notifier: Arc<NotificationManager>,
        activity_recorder: Arc<ActivityRecorder>,
        options: ChannelWatchingOptions,
    ) -> Self {
        Self {
            sessions,
            stream_tracker,
            channel_cache,
            program_cache,
            notifier,
            activity_recorder,
            options,
        }
    }

    async fn sync_stream_count(&self, session_id: &str, value: &str, now: u64) {
        if let Some(tracker) = &self.stream_tracker {
            if tracker.process_activity(session_id, value, now) {
                tracker.sync_count().await;
            }
        }
    }

    async fn log_exit(&self, session: &Session, now: u64) {
        let line = format_exit_line(session.channel_name.as_deref().unwrap_or("Unknown"), &session.channel_number);
        debug!(session = %session.session_id, "{line}");
        self.activity_recorder
            .record(
                ActivityRecord::new("channel.stop", "Exited", line, "tv"),
                &session.channel_number,
                &session.device,
                now,
            )
            .await;
    }
}

/// RAII guard releasing the tracking-key reentrancy lock, even on early return.
struct ProcessingGuard<'a> {
    store: &'a SessionStore,
    key: &'a str,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.store.complete_event_processing(self.key);
    }
}

#[async_trait]
impl Detector for ChannelWatchingDetector {
    fn name(&self) -> &'static str {
        "channel_watching"
    }

    fn should_handle(&self, event: &DvrEvent) -> bool {
        if event.event_type != "activities.set" {
            return false;
        }
        if event.is_end() {
            return self.sessions.get_session(&event.name).is_some();
        }
        parse_channel_activity(&event.value).is_some()
    }

    async fn handle(&self, event: &DvrEvent) {
        if !self.options.enabled {
            return;
        }
        let Some(activity) = parse_channel_activity(&event.value) else {
            return;
        };
        let now = unix_now();
        let device_or_ip = activity.ip.clone().unwrap_or_else(|| activity.device.clone());
        let tkey = tracking_key(&activity.channel_number, &device_or_ip);

        if !self.sessions.mark_event_processing(&tkey, now) {
            return;
        }
        let _guard = ProcessingGuard {
            store: &self.sessions,
            key: &tkey,
        };

        self.sync_stream_count(&event.name, &event.value, now).await;

        if let Some(existing) = self.sessions.session_for_device(&activity.device) {
            if existing.session_id == event.name && existing.channel_number == activity.channel_number {
                // Same session still watching the same channel: refresh the
                // touch timestamp only, no new notification.
                let mut touched = existing;
                touched.last_touch = now;
                self.sessions.upsert_session(touched);
                return;
            }
            self.log_exit(&existing, now).await;
            self.sessions.remove_session(&existing.session_id);
        }

        if self.sessions.was_notification_sent(&tkey, 5, now) {
            return;
        }

        let channel_info = self.channel_cache.by_number(&activity.channel_number).await;
        let program = self.program_cache.current_program(&activity.channel_number, now).await;
        let source = parse_source_descriptor(&event.name);
        let total_streams = self.stream_tracker.as_ref().map(|t| t.count() as u64);

        let fields = ChannelAlertFields {
            channel_name: channel_info.as_ref().map(|c| c.name.clone()),
            channel_number: activity.channel_number.clone(),
            program_title: program.as_ref().map(|p| p.title.clone()),
            resolution: activity.resolution.clone(),
            device: activity.device.clone(),
            source,
            total_streams,
            ip: activity.ip.clone(),
            channel_image: channel_info.as_ref().and_then(|c| c.logo_url.clone()),
            program_image: program.as_ref().and_then(|p| p.icon.clone()),
        };
        let alert = format_channel_alert(&fields, &self.options);

        let session = Session {
            session_id: event.name.clone(),
            channel_number: activity.channel_number.clone(),
            channel_name: channel_info.map(|c| c.name),
            device: activity.device.clone(),
            ip: activity.ip.clone(),
            source: fields.source.clone(),
            resolution: activity.resolution.clone(),
            program_title: fields.program_title.clone(),
            image_url: alert.image_url.clone(),
            stream_count_at_alert: total_streams,
            last_touch: now,
        };
        self.sessions.upsert_session(session);

        self.notifier.send(&alert.title, &alert.body, alert.image_url.as_deref()).await;
        self.sessions.record_notification(&tkey, now);

        self.activity_recorder
            .record(
                ActivityRecord::new("channel.start", alert.title.clone(), alert.body.clone(), "tv"),
                &activity.channel_number,
                &activity.device,
                now,
            )
            .await;
    }

    async fn on_end(&self, event: &DvrEvent) {
        let now = unix_now();
        self.sync_stream_count(&event.name, "", now).await;
        if let Some(session) = self.sessions.remove_session(&event.name) {
            self.log_exit(&session, now).await;
        }
    }

    async fn cleanup(&self) {
        let now = unix_now();
        let stale = self.sessions.sweep_stale(now, STALE_SESSION_SECS);
        for session in &stale {
            self.log_exit(session, now).await;
        }
        if let Some(tracker) = &self.stream_tracker {
            if tracker.cleanup_stale_sessions(now, STALE_SESSION_SECS) {
                tracker.sync_count().await;
            }
        }
        self.sessions.sweep_processing_events(now, STALE_SESSION_SECS);
        self.sessions.sweep_notification_history(now, STALE_SESSION_SECS * 12);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DvrClient;
    use crate::error::DvrClientError;
    use crate::model::{ChannelInfo, CompletedRecording, RecordingJob, VodCatalogEntry};
    use async_trait::async_trait;

    struct StubDvr;

    #[async_trait]
    impl DvrClient for StubDvr {
        async fn list_channels(&self) -> Result<Vec<ChannelInfo>, DvrClientError> {
            Ok(vec![ChannelInfo {
                number: "7".to_string(),
                name: "ABC".to_string(),
                logo_url: Some("logo.png".to_string()),
            }])
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
        async fn get_status(&self) -> Result<crate::model::DiskStatus, DvrClientError> {
            Ok(crate::model::DiskStatus {
                free_bytes: 0,
                total_bytes: 0,
                used_bytes: 0,
                path: String::new(),
            })
        }
    }

    fn detector() -> (ChannelWatchingDetector, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let dvr: Arc<dyn DvrClient> = Arc::new(StubDvr);
        let sessions = Arc::new(SessionStore::new());
        let stream_tracker = Arc::new(StreamTracker::new(dir.path()));
        let channel_cache = Arc::new(ChannelCache::new(dvr.clone(), 3600));
        let program_cache = Arc::new(ProgramCache::new(dvr, chrono_tz::UTC, 3600));
        let notifier = Arc::new(NotificationManager::new(vec![]));
        let activity_recorder = Arc::new(ActivityRecorder::new(dir.path()));
        let d = ChannelWatchingDetector::new(
            sessions,
            Some(stream_tracker),
            channel_cache,
            program_cache,
            notifier,
            activity_recorder,
            ChannelWatchingOptions::default(),
        );
        (d, dir)
    }

    fn watching_event(name: &str, value: &str) -> DvrEvent {
        DvrEvent {
            event_type: "activities.set".to_string(),
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn handle_creates_session_on_first_watch() {
        let (d, _dir) = detector();
        let event = watching_event("6-stream-M3U-Primary-abc", "Watching ch7 ABC from LivingRoom (192.168.1.10) 1080i");
        assert!(d.should_handle(&event));
        d.handle(&event).await;
        assert_eq!(d.sessions.session_count(), 1);
        let session = d.sessions.get_session(&event.name).unwrap();
        assert_eq!(session.channel_number, "7");
        assert_eq!(session.device, "LivingRoom");
    }

    #[tokio::test]
    async fn repeated_same_channel_does_not_duplicate_session() {
        let (d, _dir) = detector();
        let event = watching_event("6-stream-M3U-Primary-abc", "Watching ch7 ABC from LivingRoom (192.168.1.10) 1080i");
        d.handle(&event).await;
        d.handle(&event).await;
        assert_eq!(d.sessions.session_count(), 1);
    }

    #[tokio::test]
    async fn channel_switch_on_same_device_replaces_session() {
        let (d, _dir) = detector();
        let first = watching_event("sess-1", "Watching ch7 ABC from LivingRoom (192.168.1.10) 1080i");
        d.handle(&first).await;
        let second = watching_event("sess-2", "Watching ch9 NBC from LivingRoom (192.168.1.10) 1080i");
        d.handle(&second).await;
        assert_eq!(d.sessions.session_count(), 1);
        assert!(d.sessions.get_session("sess-1").is_none());
        assert!(d.sessions.get_session("sess-2").is_some());
    }

    #[tokio::test]
    async fn rapid_same_channel_resession_within_cooldown_suppresses_second_alert() {
        let (d, _dir) = detector();
        let first = watching_event("sess-1", "Watching ch7 ABC from LivingRoom (192.168.1.10) 1080i");
        d.handle(&first).await;
        assert_eq!(d.sessions.get_session("sess-1").unwrap().channel_number, "7");

        // Same device, same channel, but a distinct session id arrives
        // within the 5s cooldown window for `ch7-192.168.1.10` -- the old
        // session is still closed, but no second alert should fire.
        let second = watching_event("sess-2", "Watching ch7 ABC from LivingRoom (192.168.1.10) 1080i");
        d.handle(&second).await;

        assert!(d.sessions.get_session("sess-1").is_none());
        assert!(d.sessions.get_session("sess-2").is_none());
    }

    #[tokio::test]
    async fn on_end_removes_session() {
        let (d, _dir) = detector();
        let start = watching_event("sess-1", "Watching ch7 ABC from LivingRoom (192.168.1.10) 1080i");
        d.handle(&start).await;
        let end = watching_event("sess-1", "");
        assert!(d.should_handle(&end));
        d.on_end(&end).await;
        assert_eq!(d.sessions.session_count(), 0);
    }

    #[test]
    fn should_handle_ignores_unrelated_event_types() {
        let (d, _dir) = detector();
        let event = DvrEvent {
            event_type: "hello".to_string(),
            name: String::new(),
            value: String::new(),
        };
        assert!(!d.should_handle(&event));
    }
}
