pub mod activity;
pub mod cache;
pub mod caches;
pub mod client;
pub mod clock;
pub mod config;
pub mod detector;
pub mod detectors;
pub mod error;
pub mod event_monitor;
pub mod formatter;
pub mod model;
pub mod notifier;
pub mod parsing;
pub mod routes;
pub mod session_store;
pub mod stream_tracker;
pub mod telemetry;

pub use config::Config;
pub use detector::Detector;
pub use event_monitor::EventMonitor;
pub use routes::{create_router, AppState};
