//! Session Store: a single mutex guarding active sessions,
//! in-flight event markers, and notification cooldown history. None of its
//! critical sections await, so a plain `std::sync::Mutex` is correct.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::Session;

#[derive(Default)]
struct Inner {
    active_sessions: HashMap<String, Session>,
    processing_events: HashMap<String, u64>,
    notification_history: HashMap<String, u64>,
}

pub struct SessionStore {
    inner: Mutex<Inner>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.inner.lock().unwrap().active_sessions.get(session_id).cloned()
    }

    pub fn upsert_session(&self, session: Session) {
        self.inner
            .lock()
            .unwrap()
            .active_sessions
            .insert(session.session_id.clone(), session);
    }

    pub fn remove_session(&self, session_id: &str) -> Option<Session> {
        self.inner.lock().unwrap().active_sessions.remove(session_id)
    }

    /// Session currently held by `device`, if any (linear scan — session
    /// counts are small, bounded by concurrent viewers).
    pub fn session_for_device(&self, device: &str) -> Option<Session> {
        self.inner
            .lock()
            .unwrap()
            .active_sessions
            .values()
            .find(|s| s.device == device)
            .cloned()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().active_sessions.len()
    }

    pub fn sweep_stale(&self, now: u64, max_age_secs: u64) -> Vec<Session> {
        let mut inner = self.inner.lock().unwrap();
        let stale_ids: Vec<String> = inner
            .active_sessions
            .iter()
            .filter(|(_, s)| now.saturating_sub(s.last_touch) > max_age_secs)
            .map(|(id, _)| id.clone())
            .collect();

        stale_ids
            .into_iter()
            .filter_map(|id| inner.active_sessions.remove(&id))
            .collect()
    }

    /// Reentrancy guard. Returns `true` (caller should proceed) iff
    /// `tracking_key` was not already marked in-flight.
    pub fn mark_event_processing(&self, tracking_key: &str, now: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.processing_events.contains_key(tracking_key) {
            false
        } else {
            inner.processing_events.insert(tracking_key.to_string(), now);
            true
        }
    }

    pub fn complete_event_processing(&self, tracking_key: &str) {
        self.inner.lock().unwrap().processing_events.remove(tracking_key);
    }

    pub fn was_notification_sent(&self, key: &str, within_secs: u64, now: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.notification_history.get(key) {
            Some(ts) => now.saturating_sub(*ts) < within_secs,
            None => false,
        }
    }

    pub fn record_notification(&self, key: &str, now: u64) {
        self.inner
            .lock()
            .unwrap()
            .notification_history
            .insert(key.to_string(), now);
    }

    pub fn last_notification(&self, key: &str) -> Option<u64> {
        self.inner.lock().unwrap().notification_history.get(key).copied()
    }

    pub fn sweep_processing_events(&self, now: u64, max_age_secs: u64) {
        self.inner
            .lock()
            .unwrap()
            .processing_events
            .retain(|_, ts| now.saturating_sub(*ts) <= max_age_secs);
    }

    pub fn sweep_notification_history(&self, now: u64, max_age_secs: u64) {
        self.inner
            .lock()
            .unwrap()
            .notification_history
            .retain(|_, ts| now.saturating_sub(*ts) <= max_age_secs);
    }
}

pub fn tracking_key(channel_number: &str, device_or_ip: &str) -> String {
    format!("ch{channel_number}-{device_or_ip}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, device: &str, last_touch: u64) -> Session {
        Session {
            session_id: id.to_string(),
            channel_number: "7".to_string(),
            channel_name: None,
            device: device.to_string(),
            ip: None,
            source: None,
            resolution: None,
            program_title: None,
            image_url: None,
            stream_count_at_alert: None,
            last_touch,
        }
    }

    #[test]
    fn at_most_one_active_session_per_device_is_caller_enforced() {
        let store = SessionStore::new();
        store.upsert_session(session("a", "living-room", 0));
        store.upsert_session(session("b", "living-room", 0));
        // store itself is keyed by session id, not device: callers (the
        // Channel-Watching Detector) must evict the old session before
        // inserting the new one to uphold the invariant.
        assert_eq!(store.session_count(), 2);
    }

    #[test]
    fn mark_event_processing_guards_reentrancy() {
        let store = SessionStore::new();
        assert!(store.mark_event_processing("ch7-living-room", 100));
        assert!(!store.mark_event_processing("ch7-living-room", 101));
        store.complete_event_processing("ch7-living-room");
        assert!(store.mark_event_processing("ch7-living-room", 102));
    }

    #[test]
    fn cooldown_gates_within_window_only() {
        let store = SessionStore::new();
        store.record_notification("ch7-living-room", 100);
        assert!(store.was_notification_sent("ch7-living-room", 5, 103));
        assert!(!store.was_notification_sent("ch7-living-room", 5, 106));
    }

    #[test]
    fn sweep_stale_removes_only_expired_sessions() {
        let store = SessionStore::new();
        store.upsert_session(session("a", "d1", 0));
        store.upsert_session(session("b", "d2", 290));
        let removed = store.sweep_stale(300, 300);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].session_id, "a");
        assert_eq!(store.session_count(), 1);
    }
}
