//! VOD-Watching Detector: the on-demand counterpart to
//! Channel-Watching. Sessions are keyed by `vod<fileId>-<identifier>`
//! (parsed from the event `Name`) instead of a device/IP tracking key, since
//! the same title can be watched concurrently from several devices.
//!
//! Re-notification is gated on *either* wall-clock cooldown or media-time
//! progress, whichever trips first: a viewer who scrubs far ahead should
//! still get a fresh alert even if the cooldown window hasn't elapsed, and a
//! viewer idling on pause should still get a reminder once the cooldown
//! expires even with no progress.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::activity::ActivityRecorder;
use crate::caches::VodCache;
use crate::clock::unix_now;
use crate::config::VodWatchingOptions;
use crate::detector::Detector;
use crate::formatter::{format_vod_alert, VodAlertFields};
use crate::model::{ActivityRecord, DvrEvent, VodSession};
use crate::notifier::NotificationManager;
use crate::parsing::{classify_vod_value, parse_hms, parse_vod_name, vod_session_key, VodValue};
use std::sync::Arc;

pub struct VodWatchingDetector {
    sessions: Mutex<HashMap<String, VodSession>>,
    /// identifier → last IP seen for it, so a later event that omits an IP
    /// (e.g. a bare `Streaming` placeholder) can still be attributed.
    ip_cache: Mutex<HashMap<String, String>>,
    vod_cache: Arc<VodCache>,
    notifier: Arc<NotificationManager>,
    activity_recorder: Arc<ActivityRecorder>,
    options: VodWatchingOptions,
}

impl VodWatchingDetector {
    pub fn new(
        vod_cache: Arc<VodCache>,
        notifier: Arc<NotificationManager>,
        activity_recorder: Arc<ActivityRecorder>,
        options: VodWatchingOptions,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ip_cache: Mutex::new(HashMap::new()),
            vod_cache,
            notifier,
            activity_recorder,
            options,
        }
    }

    /// Deletes any other session sharing `identifier` but a different
    /// `file_id` (§4.7 cross-file switch): the viewer started a new title on
    /// the same device/IP before the old one reported its own end event.
    fn evict_cross_file_sessions(&self, identifier: &str, file_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        let stale: Vec<String> = sessions
            .values()
            .filter(|s| s.identifier == identifier && s.file_id != file_id)
            .map(|s| s.session_key.clone())
            .collect();
        for key in stale {
            sessions.remove(&key);
        }
    }

    fn recover_ip(&self, identifier: &str, ip: Option<String>) -> Option<String> {
        if let Some(ip) = &ip {
            self.ip_cache.lock().unwrap().insert(identifier.to_string(), ip.clone());
            return Some(ip.clone());
        }
        self.ip_cache.lock().unwrap().get(identifier).cloned()
    }

    /// Decides whether `new_ts`/`now` warrants re-notifying given the last
    /// alert for this session, per the cooldown-or-progress gate described
    /// above.
    fn should_renotify(&self, prior: &VodSession, new_ts: &str, now: u64) -> bool {
        let cooldown_elapsed = now.saturating_sub(prior.last_notification) >= self.options.alert_cooldown_secs;
        let progressed = match (parse_hms(&prior.timestamp), parse_hms(new_ts)) {
            (Some(old), Some(new)) if new > old => {
                (new - old) >= self.options.significant_threshold_secs
            }
            _ => false,
        };
        cooldown_elapsed || progressed
    }
}

#[async_trait]
impl Detector for VodWatchingDetector {
    fn name(&self) -> &'static str {
        "vod_watching"
    }

    fn should_handle(&self, event: &DvrEvent) -> bool {
        if event.event_type != "activities.set" {
            return false;
        }
        let Some(parts) = parse_vod_name(&event.name) else {
            return false;
        };
        if event.is_end() {
            let key = vod_session_key(&parts.file_id, &parts.identifier);
            return self.sessions.lock().unwrap().contains_key(&key);
        }
        classify_vod_value(&event.value).is_some()
    }

    async fn handle(&self, event: &DvrEvent) {
        if !self.options.enabled {
            return;
        }
        let Some(name_parts) = parse_vod_name(&event.name) else {
            return;
        };
        let Some(classified) = classify_vod_value(&event.value) else {
            return;
        };
        let now = unix_now();
        let key = vod_session_key(&name_parts.file_id, &name_parts.identifier);

        self.evict_cross_file_sessions(&name_parts.identifier, &name_parts.file_id);

        let value_parts = match classified {
            VodValue::Placeholder => {
                let ip = self.recover_ip(&name_parts.identifier, None);
                let mut sessions = self.sessions.lock().unwrap();
                let entry = sessions.entry(key.clone()).or_insert_with(|| VodSession {
                    session_key: key.clone(),
                    file_id: name_parts.file_id.clone(),
                    identifier: name_parts.identifier.clone(),
                    timestamp: "Streaming".to_string(),
                    last_update: now,
                    last_notification: 0,
                    device: None,
                    ip: ip.clone(),
                });
                entry.timestamp = "Streaming".to_string();
                entry.last_update = now;
                if entry.ip.is_none() {
                    entry.ip = ip;
                }
                return;
            }
            VodValue::Progress(parts) => parts,
        };
        let ip = self.recover_ip(&name_parts.identifier, value_parts.ip.clone());

        let prior = self.sessions.lock().unwrap().get(&key).cloned();
        let should_notify = match &prior {
            Some(prior) => self.should_renotify(prior, &value_parts.timestamp, now),
            None => true,
        };

        let session = VodSession {
            session_key: key.clone(),
            file_id: name_parts.file_id.clone(),
            identifier: name_parts.identifier.clone(),
            timestamp: value_parts.timestamp.clone(),
            last_update: now,
            last_notification: if should_notify { now } else { prior.as_ref().map(|p| p.last_notification).unwrap_or(now) },
            device: value_parts.device.clone(),
            ip: ip.clone(),
        };
        self.sessions.lock().unwrap().insert(key.clone(), session);

        if !should_notify {
            return;
        }

        let catalog_entry = self.vod_cache.get(&name_parts.file_id).await;
        let fields = VodAlertFields {
            title: catalog_entry.as_ref().map(|e| e.title.clone()).unwrap_or_else(|| name_parts.file_id.clone()),
            year: catalog_entry.as_ref().and_then(|e| e.year),
            episode_title: catalog_entry.as_ref().and_then(|e| e.episode_title.clone()),
            timestamp: value_parts.timestamp.clone(),
            duration_secs: catalog_entry.as_ref().and_then(|e| e.duration_secs),
            device: value_parts.device.clone(),
            ip: ip.clone(),
            summary: catalog_entry.as_ref().and_then(|e| e.summary.clone()),
            rating: catalog_entry.as_ref().and_then(|e| e.rating.clone()),
            genres: catalog_entry.as_ref().map(|e| e.genres.clone()).unwrap_or_default(),
            cast: catalog_entry.as_ref().map(|e| e.cast.clone()).unwrap_or_default(),
            image_url: catalog_entry.as_ref().and_then(|e| e.image_url.clone()),
        };
        let alert = format_vod_alert(&fields);

        debug!(session = %key, timestamp = %value_parts.timestamp, "vod progress alert");
        self.notifier.send(&alert.title, &alert.body, alert.image_url.as_deref()).await;

        self.activity_recorder
            .record(
                ActivityRecord::new("vod.progress", alert.title.clone(), alert.body.clone(), "film"),
                &name_parts.file_id,
                value_parts.device.as_deref().unwrap_or("unknown"),
                now,
            )
            .await;
    }

    async fn on_end(&self, event: &DvrEvent) {
        let Some(parts) = parse_vod_name(&event.name) else {
            return;
        };
        let key = vod_session_key(&parts.file_id, &parts.identifier);
        let removed = self.sessions.lock().unwrap().remove(&key);
        if let Some(session) = removed {
            let now = unix_now();
            self.activity_recorder
                .record(
                    ActivityRecord::new("vod.stop", "Stopped", format!("Stopped watching {}", session.file_id), "film"),
                    &session.file_id,
                    session.device.as_deref().unwrap_or("unknown"),
                    now,
                )
                .await;
        }
    }

    async fn cleanup(&self) {
        let now = unix_now();
        let max_age = self.options.alert_cooldown_secs.max(300) * 4;
        self.sessions.lock().unwrap().retain(|_, s| now.saturating_sub(s.last_update) <= max_age);

        let live_identifiers: std::collections::HashSet<String> =
            self.sessions.lock().unwrap().values().map(|s| s.identifier.clone()).collect();
        self.ip_cache.lock().unwrap().retain(|identifier, _| live_identifiers.contains(identifier));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DvrClient;
    use crate::error::DvrClientError;
    use crate::model::{ChannelInfo, CompletedRecording, RecordingJob, VodCatalogEntry};

    struct StubDvr;

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
            Ok(vec![VodCatalogEntry {
                file_id: "F1".to_string(),
                title: "Movie".to_string(),
                year: Some(2020),
                episode_title: None,
                duration_secs: Some(7200),
                summary: None,
                rating: None,
                genres: vec![],
                cast: vec![],
                image_url: None,
            }])
        }
        async fn get_status(&self) -> Result<crate::model::DiskStatus, DvrClientError> {
            unreachable!()
        }
    }

    fn detector(cooldown: u64, threshold: u64) -> (VodWatchingDetector, tempfile::TempDir) {
        let dvr: Arc<dyn DvrClient> = Arc::new(StubDvr);
        let vod_cache = Arc::new(VodCache::new(dvr, 3600));
        let notifier = Arc::new(NotificationManager::new(vec![]));
        let dir = tempfile::tempdir().unwrap();
        let activity_recorder = Arc::new(ActivityRecorder::new(dir.path()));
        let d = VodWatchingDetector::new(
            vod_cache,
            notifier,
            activity_recorder,
            VodWatchingOptions {
                enabled: true,
                alert_cooldown_secs: cooldown,
                significant_threshold_secs: threshold,
            },
        );
        (d, dir)
    }

    fn event(name: &str, value: &str) -> DvrEvent {
        DvrEvent {
            event_type: "activities.set".to_string(),
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn first_event_always_notifies() {
        let (d, _dir) = detector(300, 300);
        let e = event("6-file-F1-192.168.1.20", "Watching Movie from LivingRoom (192.168.1.20) at 0s");
        assert!(d.should_handle(&e));
        d.handle(&e).await;
        assert_eq!(d.sessions.lock().unwrap().len(), 1);
    }

    #[test]
    fn cooldown_boundary_scenario_310s_triggers_second_alert() {
        let (d, _dir) = detector(300, 300);
        let prior = VodSession {
            session_key: vod_session_key("F1", "192.168.1.20"),
            file_id: "F1".to_string(),
            identifier: "192.168.1.20".to_string(),
            timestamp: "0s".to_string(),
            last_update: 0,
            last_notification: 0,
            device: None,
            ip: None,
        };
        assert!(d.should_renotify(&prior, "310s", 310));
    }

    #[tokio::test]
    async fn cooldown_boundary_scenario_60s_does_not_retrigger() {
        let (d, _dir) = detector(300, 300);
        let prior = VodSession {
            session_key: vod_session_key("F1", "192.168.1.20"),
            file_id: "F1".to_string(),
            identifier: "192.168.1.20".to_string(),
            timestamp: "0s".to_string(),
            last_update: 0,
            last_notification: 0,
            device: None,
            ip: None,
        };
        assert!(!d.should_renotify(&prior, "60s", 60));
    }

    #[tokio::test]
    async fn streaming_without_timestamp_creates_placeholder_with_no_notification() {
        let (d, _dir) = detector(300, 300);
        let e = event("6-file-F1-192.168.1.20", "Streaming from LivingRoom (192.168.1.20)");
        assert!(d.should_handle(&e));
        d.handle(&e).await;
        let sessions = d.sessions.lock().unwrap();
        let session = sessions.get(&vod_session_key("F1", "192.168.1.20")).unwrap();
        assert_eq!(session.timestamp, "Streaming");
        assert_eq!(session.last_notification, 0);
    }

    #[tokio::test]
    async fn cross_file_switch_evicts_prior_session_for_same_identifier() {
        let (d, _dir) = detector(300, 300);
        let first = event("6-file-F1-192.168.1.20", "Watching Movie from LivingRoom (192.168.1.20) at 0s");
        d.handle(&first).await;
        assert_eq!(d.sessions.lock().unwrap().len(), 1);

        let second = event("6-file-F2-192.168.1.20", "Watching Other from LivingRoom (192.168.1.20) at 0s");
        d.handle(&second).await;

        let sessions = d.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions.contains_key(&vod_session_key("F2", "192.168.1.20")));
        assert!(!sessions.contains_key(&vod_session_key("F1", "192.168.1.20")));
    }

    #[tokio::test]
    async fn ip_recovered_from_cache_when_later_event_omits_it() {
        let (d, _dir) = detector(300, 300);
        let first = event("6-file-F1-192.168.1.20", "Watching Movie from LivingRoom (192.168.1.20) at 0s");
        d.handle(&first).await;

        let placeholder = event("6-file-F1-192.168.1.20", "Streaming from LivingRoom");
        d.handle(&placeholder).await;

        let sessions = d.sessions.lock().unwrap();
        let session = sessions.get(&vod_session_key("F1", "192.168.1.20")).unwrap();
        assert_eq!(session.ip.as_deref(), Some("192.168.1.20"));
    }
}
