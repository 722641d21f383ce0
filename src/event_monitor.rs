//! Event Monitor (spec §4.1): the SSE read loop against `/dvr/events/subscribe`,
//! its reconnect/backoff policy, the companion keep-alive pinger, and
//! dispatch to every registered `Detector` in registration order.
//!
//! Dispatch is synchronous relative to the read loop by design (spec §5):
//! the loop awaits each detector's `handle`/`on_end` before reading the next
//! line, so a slow detector throttles ingestion rather than racing it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::detector::Detector;
use crate::model::{DvrEvent, EventMonitorStats};

const INITIAL_BACKOFF_SECS: u64 = 5;
const MAX_BACKOFF_SECS: u64 = 60;
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EventMonitor {
    http: reqwest::Client,
    base_url: String,
    detectors: Vec<Arc<dyn Detector>>,
    stats: Mutex<EventMonitorStats>,
}

impl EventMonitor {
    pub fn new(base_url: impl Into<String>, detectors: Vec<Arc<dyn Detector>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            detectors,
            stats: Mutex::new(EventMonitorStats::default()),
        }
    }

    pub async fn stats_snapshot(&self) -> EventMonitorStatsSnapshot {
        let stats = self.stats.lock().await;
        EventMonitorStatsSnapshot {
            total: stats.total.clone(),
            alert_hit: stats.alert_hit,
            filtered: stats.filtered,
            error: stats.error,
        }
    }

    /// Dispatches one parsed event to every registered detector, in
    /// registration order, and updates the observability counters. Detector
    /// order matters only in that it's deterministic; no detector's outcome
    /// depends on another having run first (spec §5: no cross-detector
    /// ordering is promised).
    async fn dispatch(&self, event: &DvrEvent) {
        {
            let mut stats = self.stats.lock().await;
            *stats.total.entry(event.event_type.clone()).or_insert(0) += 1;
        }

        if event.is_hello() {
            debug!("hello event consumed");
            return;
        }

        let mut handled = false;
        for detector in &self.detectors {
            if !detector.should_handle(event) {
                continue;
            }
            handled = true;
            if event.is_end() {
                detector.on_end(event).await;
            } else {
                detector.handle(event).await;
            }
        }

        let mut stats = self.stats.lock().await;
        if handled {
            stats.alert_hit += 1;
        } else {
            stats.filtered += 1;
        }
    }

    fn parse_line(line: &str) -> Option<DvrEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let json = trimmed.strip_prefix("data:").map(str::trim).unwrap_or(trimmed);
        if json.is_empty() {
            return None;
        }
        serde_json::from_str(json).ok()
    }

    /// One connection attempt: subscribe, stream lines until the connection
    /// drops or errors, dispatching each parsed event as it arrives. Returns
    /// once the stream ends (either cleanly or via I/O error) so the caller
    /// can apply backoff and reconnect.
    async fn run_once(&self, cancel: &CancellationToken) -> Result<(), reqwest::Error> {
        let url = format!("{}/dvr/events/subscribe", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        info!("connected to event stream");
        let mut stream = resp.bytes_stream();
        let mut buf = String::new();

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = stream.next() => next,
            };
            let Some(chunk) = chunk else {
                warn!("event stream closed by upstream");
                return Ok(());
            };
            let bytes = chunk?;
            buf.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(idx) = buf.find('\n') {
                let line = buf[..idx].to_string();
                buf.drain(..=idx);

                match Self::parse_line(&line) {
                    Some(event) => self.dispatch(&event).await,
                    None => {
                        if !line.trim().is_empty() {
                            let mut stats = self.stats.lock().await;
                            stats.error += 1;
                            drop(stats);
                            warn!(line = %line, "malformed event, dropping");
                        }
                    }
                }
            }
        }
    }

    /// The reconnecting read loop: intended to run for the process lifetime
    /// as its own task. Backoff starts at 5s and doubles to a 60s cap on
    /// each consecutive failure; a clean connect resets it.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF_SECS;
        while !cancel.is_cancelled() {
            match self.run_once(&cancel).await {
                Ok(()) => {
                    backoff = INITIAL_BACKOFF_SECS;
                }
                Err(err) => {
                    error!(error = %err, "event stream connection failed");
                }
            }
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
        }
        info!("event monitor shut down");
    }

    /// Companion keep-alive pinger (spec §4.1): `GET /status` every 15s on a
    /// separate connection. Failures are logged but never propagate to the
    /// SSE loop — this task's only job is to surface upstream liveness.
    pub async fn run_keepalive(self: Arc<Self>, cancel: CancellationToken) {
        let url = format!("{}/status", self.base_url);
        let mut ticker = tokio::time::interval(crate::config::KEEPALIVE_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.http.get(&url).timeout(STATUS_TIMEOUT).send().await {
                Ok(resp) if resp.status().is_success() => debug!("keep-alive ok"),
                Ok(resp) => warn!(status = %resp.status(), "keep-alive returned non-success"),
                Err(err) => warn!(error = %err, "keep-alive request failed"),
            }
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EventMonitorStatsSnapshot {
    pub total: HashMap<String, u64>,
    pub alert_hit: u64,
    pub filtered: u64,
    pub error: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_json_line() {
        let event = EventMonitor::parse_line(r#"{"Type":"activities.set","Name":"n","Value":"v"}"#).unwrap();
        assert_eq!(event.event_type, "activities.set");
    }

    #[test]
    fn parses_sse_data_framed_line() {
        let event = EventMonitor::parse_line(r#"data:{"Type":"hello","Name":"","Value":""}"#).unwrap();
        assert!(event.is_hello());
    }

    #[test]
    fn blank_line_parses_to_none() {
        assert!(EventMonitor::parse_line("").is_none());
        assert!(EventMonitor::parse_line("   ").is_none());
    }

    #[test]
    fn malformed_json_parses_to_none() {
        assert!(EventMonitor::parse_line("{not json").is_none());
    }

    #[tokio::test]
    async fn dispatch_counts_hits_and_filtered() {
        struct AlwaysHandles;
        #[async_trait::async_trait]
        impl Detector for AlwaysHandles {
            fn name(&self) -> &'static str {
                "always"
            }
            fn should_handle(&self, event: &DvrEvent) -> bool {
                event.event_type == "activities.set"
            }
            async fn handle(&self, _event: &DvrEvent) {}
            async fn cleanup(&self) {}
        }

        let monitor = EventMonitor::new("http://localhost", vec![Arc::new(AlwaysHandles)]);
        monitor
            .dispatch(&DvrEvent {
                event_type: "activities.set".to_string(),
                name: "n".to_string(),
                value: "v".to_string(),
            })
            .await;
        monitor
            .dispatch(&DvrEvent {
                event_type: "jobs.created".to_string(),
                name: "n".to_string(),
                value: String::new(),
            })
            .await;

        let stats = monitor.stats_snapshot().await;
        assert_eq!(stats.alert_hit, 1);
        assert_eq!(stats.filtered, 1);
    }
}
