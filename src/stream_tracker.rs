//! Stream Tracker (spec §4.4): unique-device stream counter driven by
//! activity strings, with `stream_count.txt` as the output ABI to the
//! external UI (SPEC_FULL.md's atomic-replace note: write-to-temp-then-
//! rename, never a plain truncate-write).

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use regex::Regex;
use tracing::warn;

#[derive(Debug, Clone)]
struct ActiveStream {
    activity: String,
    device: String,
    last_seen: u64,
}

struct Inner {
    active_streams: HashMap<String, ActiveStream>,
    device_sessions: HashMap<String, String>,
}

pub struct StreamTracker {
    inner: Mutex<Inner>,
    count_file: PathBuf,
    watching_re: Regex,
    device_re: Regex,
}

impl StreamTracker {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                active_streams: HashMap::new(),
                device_sessions: HashMap::new(),
            }),
            count_file: state_dir.as_ref().join("stream_count.txt"),
            watching_re: Regex::new(r"(?i)(watching|recording).*ch\d").unwrap(),
            device_re: Regex::new(r"(?i)(?:watching|recording)\s+ch\S*\s+\S+\s+from\s+([^(]+?)\s*(?:\(|$)").unwrap(),
        }
    }

    fn extract_device(&self, activity: &str) -> Option<String> {
        self.device_re
            .captures(activity)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    fn is_watching(&self, activity: &str) -> bool {
        !activity.is_empty() && self.watching_re.is_match(activity)
    }

    /// Folds one activity string into the tracker's state. Returns `true`
    /// iff the unique-device count changed (callers use this to decide
    /// whether the count file needs rewriting).
    pub fn process_activity(&self, session_id: &str, activity: &str, now: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.device_sessions.len();

        if self.is_watching(activity) {
            if let Some(device) = self.extract_device(activity) {
                if let Some(existing_session) = inner.device_sessions.get(&device).cloned() {
                    if existing_session != session_id {
                        inner.active_streams.remove(&existing_session);
                    }
                }
                inner.active_streams.insert(
                    session_id.to_string(),
                    ActiveStream {
                        activity: activity.to_string(),
                        device: device.clone(),
                        last_seen: now,
                    },
                );
                inner.device_sessions.insert(device, session_id.to_string());
            }
        } else if let Some(stream) = inner.active_streams.remove(session_id) {
            if inner.device_sessions.get(&stream.device).map(String::as_str) == Some(session_id) {
                inner.device_sessions.remove(&stream.device);
            }
        }

        inner.device_sessions.len() != before
    }

    pub fn cleanup_stale_sessions(&self, now: u64, max_age_secs: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.device_sessions.len();

        let stale: Vec<String> = inner
            .active_streams
            .iter()
            .filter(|(_, s)| now.saturating_sub(s.last_seen) > max_age_secs)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in stale {
            if let Some(stream) = inner.active_streams.remove(&session_id) {
                if inner.device_sessions.get(&stream.device).map(String::as_str) == Some(session_id.as_str()) {
                    inner.device_sessions.remove(&stream.device);
                }
            }
        }

        inner.device_sessions.len() != before
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().device_sessions.len()
    }

    /// Writes the current count to `stream_count.txt` via write-temp-then-
    /// rename so external readers never observe a half-written file.
    pub async fn persist_count(&self) -> io::Result<()> {
        let count = self.count();
        let tmp_path = self.count_file.with_extension("txt.tmp");
        tokio::fs::write(&tmp_path, count.to_string()).await?;
        tokio::fs::rename(&tmp_path, &self.count_file).await?;
        Ok(())
    }

    pub async fn sync_count(&self) {
        if let Err(err) = self.persist_count().await {
            warn!(error = %err, "failed to persist stream_count.txt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn watching_activity_registers_device() {
        let dir = tempdir().unwrap();
        let tracker = StreamTracker::new(dir.path());
        let changed = tracker.process_activity(
            "sess-1",
            "Watching ch7 ABC from LivingRoom (192.168.1.10) 1080i",
            100,
        );
        assert!(changed);
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn switching_device_session_evicts_prior_mapping() {
        let dir = tempdir().unwrap();
        let tracker = StreamTracker::new(dir.path());
        tracker.process_activity("sess-1", "Watching ch7 ABC from LivingRoom (192.168.1.10)", 100);
        let changed = tracker.process_activity("sess-2", "Watching ch9 NBC from LivingRoom (192.168.1.10)", 101);
        // same device, different session id: count of unique devices stays 1
        assert!(!changed);
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn empty_activity_decrements_count() {
        let dir = tempdir().unwrap();
        let tracker = StreamTracker::new(dir.path());
        tracker.process_activity("sess-1", "Watching ch7 ABC from LivingRoom (192.168.1.10)", 100);
        let changed = tracker.process_activity("sess-1", "", 110);
        assert!(changed);
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn persist_count_writes_decimal_count() {
        let dir = tempdir().unwrap();
        let tracker = StreamTracker::new(dir.path());
        tracker.process_activity("sess-1", "Watching ch7 ABC from LivingRoom (192.168.1.10)", 100);
        tracker.persist_count().await.unwrap();

        let contents = tokio::fs::read_to_string(dir.path().join("stream_count.txt")).await.unwrap();
        assert_eq!(contents, "1");
    }

    #[test]
    fn stale_sessions_are_swept_after_max_age() {
        let dir = tempdir().unwrap();
        let tracker = StreamTracker::new(dir.path());
        tracker.process_activity("sess-1", "Watching ch7 ABC from LivingRoom (192.168.1.10)", 0);
        let changed = tracker.cleanup_stale_sessions(301, 300);
        assert!(changed);
        assert_eq!(tracker.count(), 0);
    }
}
