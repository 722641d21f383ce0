//! Core data types shared across the event pipeline.
//!
//! `chrono::DateTime<Utc>` is used for anything that crosses a file or HTTP
//! boundary; the in-memory hot path (cooldown checks, TTL comparisons) uses
//! plain `u64` Unix seconds so detector loops can compare timestamps without
//! going through chrono.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw upstream SSE event, parsed either directly as JSON or from a
/// `data:<json>` frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DvrEvent {
    #[serde(rename = "Type")]
    pub event_type: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: String,
}

impl DvrEvent {
    pub fn is_hello(&self) -> bool {
        self.event_type == "hello"
    }

    pub fn is_end(&self) -> bool {
        self.event_type == "activities.set" && self.value.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub channel_number: String,
    pub channel_name: Option<String>,
    pub device: String,
    pub ip: Option<String>,
    pub source: Option<String>,
    pub resolution: Option<String>,
    pub program_title: Option<String>,
    pub image_url: Option<String>,
    pub stream_count_at_alert: Option<u64>,
    pub last_touch: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VodSession {
    pub session_key: String,
    pub file_id: String,
    pub identifier: String,
    pub timestamp: String,
    pub last_update: u64,
    pub last_notification: u64,
    pub device: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingJob {
    pub id: String,
    pub name: String,
    pub start_time: u64,
    pub duration: u64,
    pub channels: Vec<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingOutcome {
    Completed,
    CompletedDelayed,
    CompletedInterrupted,
    StoppedManual,
    Cancelled,
}

impl RecordingOutcome {
    pub fn classify(cancelled: bool, completed: bool, delayed: bool) -> Self {
        match (cancelled, completed, delayed) {
            (false, true, false) => RecordingOutcome::Completed,
            (false, true, true) => RecordingOutcome::CompletedDelayed,
            (false, false, _) => RecordingOutcome::CompletedInterrupted,
            (true, true, _) => RecordingOutcome::StoppedManual,
            (true, false, _) => RecordingOutcome::Cancelled,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            RecordingOutcome::Completed => "✅",
            RecordingOutcome::CompletedDelayed => "✅",
            RecordingOutcome::CompletedInterrupted => "⚠️",
            RecordingOutcome::StoppedManual => "⏹️",
            RecordingOutcome::Cancelled => "🚫",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RecordingOutcome::Completed => "Completed",
            RecordingOutcome::CompletedDelayed => "Completed (Delayed)",
            RecordingOutcome::CompletedInterrupted => "Completed (Interrupted)",
            RecordingOutcome::StoppedManual => "Stopped (manual)",
            RecordingOutcome::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRecording {
    pub file_id: String,
    pub job_id: String,
    pub title: String,
    pub episode_title: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<u64>,
    pub processed: bool,
    pub cancelled: bool,
    pub completed: bool,
    pub delayed: bool,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PendingRecording {
    pub first_seen: u64,
    pub last_check: u64,
    pub check_count: u32,
    pub file_id: String,
    pub job_id: Option<String>,
}

/// `Value`: (cache payload, fetched-at Unix seconds). Valid while
/// `now - fetched_at < ttl`.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, fetched_at: u64) -> Self {
        Self { value, fetched_at }
    }

    pub fn is_fresh(&self, now: u64, ttl_secs: u64) -> bool {
        now.saturating_sub(self.fetched_at) < ttl_secs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub number: String,
    pub name: String,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub start: u64,
    pub stop: u64,
    pub title: String,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VodCatalogEntry {
    pub file_id: String,
    pub title: String,
    pub year: Option<u32>,
    pub episode_title: Option<String>,
    pub duration_secs: Option<u64>,
    pub summary: Option<String>,
    pub rating: Option<String>,
    pub genres: Vec<String>,
    pub cast: Vec<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskStatus {
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub path: String,
}

impl DiskStatus {
    pub fn percent_free(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.free_bytes as f64 / self.total_bytes as f64) * 100.0
    }
}

/// A formatted notification ready to hand to the Notification Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedAlert {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub icon: String,
}

impl ActivityRecord {
    pub fn new(kind: impl Into<String>, title: impl Into<String>, message: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
            icon: icon.into(),
        }
    }

    /// Key used for the Activity Recorder's 5-second per-entity dedup window.
    pub fn dedup_key(kind: &str, subject: &str, device: &str) -> String {
        format!("{kind}:{subject}:{device}")
    }
}

#[derive(Debug, Default)]
pub struct EventMonitorStats {
    pub total: HashMap<String, u64>,
    pub alert_hit: u64,
    pub filtered: u64,
    pub error: u64,
}
