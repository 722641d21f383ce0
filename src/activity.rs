//! Activity Recorder: append-only log consumed by the external
//! UI. Separate from the Notification Manager — every emitted alert also
//! gets an Activity Record, subject to its own short dedup window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::warn;

use crate::model::ActivityRecord;

const MAX_ENTRIES: usize = 500;
const DEDUP_WINDOW_SECS: u64 = 5;

pub struct ActivityRecorder {
    path: PathBuf,
    lock: Mutex<HashMap<String, u64>>,
}

impl ActivityRecorder {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join("activity_history.json"),
            lock: Mutex::new(HashMap::new()),
        }
    }

    /// Appends `record` unless an entry with the same `(kind, subject, device)`
    /// was recorded within the last 5 seconds. Returns `true` if written.
    pub async fn record(&self, record: ActivityRecord, subject: &str, device: &str, now: u64) -> bool {
        let dedup_key = ActivityRecord::dedup_key(&record.kind, subject, device);
        let mut recent = self.lock.lock().await;

        if let Some(last) = recent.get(&dedup_key) {
            if now.saturating_sub(*last) < DEDUP_WINDOW_SECS {
                return false;
            }
        }
        recent.insert(dedup_key, now);
        recent.retain(|_, ts| now.saturating_sub(*ts) < DEDUP_WINDOW_SECS);

        if let Err(err) = self.append(record).await {
            warn!(error = %err, "failed to persist activity history");
            return false;
        }
        true
    }

    async fn append(&self, record: ActivityRecord) -> std::io::Result<()> {
        let mut entries = self.read_all().await.unwrap_or_default();
        entries.insert(0, record);
        entries.truncate(MAX_ENTRIES);

        let tmp_path = self.path.with_extension("json.tmp");
        let body = serde_json::to_string(&entries)?;
        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn read_all(&self) -> std::io::Result<Vec<ActivityRecord>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents).unwrap_or_default()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn read_page(&self, offset: usize, limit: usize) -> std::io::Result<Vec<ActivityRecord>> {
        let all = self.read_all().await?;
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn records_and_reads_back() {
        let dir = tempdir().unwrap();
        let recorder = ActivityRecorder::new(dir.path());
        let written = recorder
            .record(
                ActivityRecord::new("channel.start", "Watching TV", "ABC on ch7", "tv"),
                "ch7",
                "LivingRoom",
                100,
            )
            .await;
        assert!(written);

        let all = recorder.read_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Watching TV");
    }

    #[tokio::test]
    async fn dedup_window_suppresses_rapid_repeats() {
        let dir = tempdir().unwrap();
        let recorder = ActivityRecorder::new(dir.path());
        let first = recorder
            .record(ActivityRecord::new("k", "t", "m", "i"), "ch7", "LivingRoom", 100)
            .await;
        let second = recorder
            .record(ActivityRecord::new("k", "t", "m", "i"), "ch7", "LivingRoom", 102)
            .await;
        let third = recorder
            .record(ActivityRecord::new("k", "t", "m", "i"), "ch7", "LivingRoom", 110)
            .await;

        assert!(first);
        assert!(!second);
        assert!(third);
    }

    #[tokio::test]
    async fn caps_at_max_entries() {
        let dir = tempdir().unwrap();
        let recorder = ActivityRecorder::new(dir.path());
        for i in 0..510u64 {
            recorder
                .record(ActivityRecord::new("k", "t", "m", "i"), &i.to_string(), "d", i)
                .await;
        }
        let all = recorder.read_all().await.unwrap();
        assert_eq!(all.len(), MAX_ENTRIES);
    }
}
