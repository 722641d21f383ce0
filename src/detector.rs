//! Detector capability trait (spec §9 "Dynamic dispatch across detectors"):
//! a `Detector` is anything the Event Monitor can hand an upstream event to.
//! Replaces duck-typed "has method X" dispatch with one object-safe trait
//! the monitor iterates in registration order.
//!
//! Disk-Space is deliberately not a `Detector`: §4.9 describes it as its own
//! polling loop, independent of the SSE stream, so it has no `handle` to
//! offer the Event Monitor.

use async_trait::async_trait;

use crate::model::DvrEvent;

#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this detector's `handle`/`on_end` should be invoked for `event`.
    fn should_handle(&self, event: &DvrEvent) -> bool;

    /// Non-terminal event for this detector's domain (e.g. a mid-session
    /// `activities.set` progress update).
    async fn handle(&self, event: &DvrEvent);

    /// Terminal event for this detector's domain (e.g. `activities.set` with
    /// an empty `Value`). Default no-op for detectors with no end-of-session
    /// concept (Recording-Events).
    async fn on_end(&self, _event: &DvrEvent) {}

    /// Periodic sweep of this detector's own state (stale sessions, expired
    /// retry entries, ...). Called by the Cleanup Scheduler, not the Event
    /// Monitor.
    async fn cleanup(&self);
}
