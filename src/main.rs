use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use dvr_sentinel::activity::ActivityRecorder;
use dvr_sentinel::caches::{ChannelCache, JobCache, ProgramCache, VodCache};
use dvr_sentinel::client::{DvrClient, HttpDvrClient};
use dvr_sentinel::clock::unix_now;
use dvr_sentinel::config::{Config, ConfigError, STANDBY_RETRY_INTERVAL};
use dvr_sentinel::detector::Detector;
use dvr_sentinel::detectors::{ChannelWatchingDetector, DiskSpaceDetector, RecordingEventsDetector, VodWatchingDetector};
use dvr_sentinel::event_monitor::EventMonitor;
use dvr_sentinel::notifier::{AppriseProvider, NotificationManager, NotificationProvider, PushoverProvider};
use dvr_sentinel::routes::{create_router, AppState, Metrics};
use dvr_sentinel::session_store::SessionStore;
use dvr_sentinel::stream_tracker::StreamTracker;
use dvr_sentinel::telemetry::{init_structured_logging, LogConfig};

/// Blocks until a valid `Config` can be loaded. A missing DVR host or
/// invalid `tz` is a configuration error: the process logs it and
/// waits, re-reading the environment every 30s, rather than exiting --
/// useful when the sidecar is started before its environment file is
/// populated by an orchestrator.
async fn wait_for_config() -> Config {
    loop {
        match Config::from_env() {
            Ok(config) => return config,
            Err(err) => {
                log_standby(&err);
                tokio::time::sleep(STANDBY_RETRY_INTERVAL).await;
            }
        }
    }
}

fn log_standby(err: &ConfigError) {
    // Logging isn't initialized yet the first time this runs (we don't know
    // `log_level` until config loads), so this goes to stderr directly.
    eprintln!("configuration error: {err}; entering standby and retrying every {}s", STANDBY_RETRY_INTERVAL.as_secs());
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(wait_for_config().await);

    let log_config = LogConfig::new("dvr-sentinel")
        .with_level(config.log_level)
        .with_log_dir(format!("{}/logs", config.state_dir));
    let _log_guard = init_structured_logging(&log_config);

    info!(host = %config.channels_dvr_host, port = config.channels_dvr_port, "starting dvr-sentinel");

    let dvr_client: Arc<dyn DvrClient> = Arc::new(
        HttpDvrClient::new(config.base_url()).context("failed to build DVR HTTP client")?,
    );

    let channel_cache = Arc::new(ChannelCache::new(dvr_client.clone(), config.cache_ttls.channel_secs));
    let program_cache = Arc::new(ProgramCache::new(dvr_client.clone(), config.tz, config.cache_ttls.program_secs));
    let job_cache = Arc::new(JobCache::new(dvr_client.clone(), config.cache_ttls.job_secs));
    let vod_cache = Arc::new(VodCache::new(dvr_client.clone(), config.cache_ttls.vod_secs));

    let sessions = Arc::new(SessionStore::new());
    let stream_tracker = config
        .stream_count
        .then(|| Arc::new(StreamTracker::new(&config.state_dir)));
    let activity_recorder = Arc::new(ActivityRecorder::new(&config.state_dir));

    let providers: Vec<Arc<dyn NotificationProvider>> = vec![
        Arc::new(PushoverProvider::new(&config.pushover)),
        Arc::new(AppriseProvider::new(&config.apprise)),
    ];
    let notifier = Arc::new(NotificationManager::new(providers));

    let channel_detector = Arc::new(ChannelWatchingDetector::new(
        sessions.clone(),
        stream_tracker.clone(),
        channel_cache,
        program_cache,
        notifier.clone(),
        activity_recorder.clone(),
        config.channel_watching.clone(),
    ));
    let vod_detector = Arc::new(VodWatchingDetector::new(
        vod_cache,
        notifier.clone(),
        activity_recorder.clone(),
        config.vod_watching.clone(),
    ));
    let recording_detector = Arc::new(RecordingEventsDetector::new(
        job_cache,
        dvr_client.clone(),
        sessions.clone(),
        notifier.clone(),
        activity_recorder.clone(),
        config.recording_events.clone(),
        config.tz,
    ));

    let detectors: Vec<Arc<dyn Detector>> = vec![
        channel_detector.clone(),
        vod_detector.clone(),
        recording_detector.clone(),
    ];
    let event_monitor = Arc::new(EventMonitor::new(config.base_url(), detectors));

    let disk_space_detector = config.alert_disk_space.then(|| {
        Arc::new(DiskSpaceDetector::new(
            dvr_client.clone(),
            notifier.clone(),
            activity_recorder.clone(),
            config.disk_space.clone(),
        ))
    });

    let cancel = CancellationToken::new();

    tokio::spawn(event_monitor.clone().run(cancel.child_token()));
    tokio::spawn(event_monitor.clone().run_keepalive(cancel.child_token()));

    if let Some(disk) = &disk_space_detector {
        tokio::spawn(disk.clone().run(cancel.child_token()));
        spawn_ticker(disk.clone(), Duration::from_secs(30 * 60), cancel.child_token(), |d| async move {
            d.health_check().await;
        });
    }

    spawn_ticker(recording_detector.clone(), Duration::from_secs(2), cancel.child_token(), |d| async move {
        d.process_pending().await;
    });
    spawn_ticker(recording_detector.clone(), Duration::from_secs(5 * 60), cancel.child_token(), |d| async move {
        d.watchdog_check().await;
    });

    // Cleanup Scheduler: one sweep per detector plus the Session
    // Store's own sweep, every hour. Recording-Events' own `cleanup` already
    // covers its scheduled/active/pending partitions at the same cadence.
    {
        let cleanup_targets = detectors_for_cleanup(&channel_detector, &vod_detector, &recording_detector);
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for detector in &cleanup_targets {
                            detector.cleanup().await;
                        }
                    }
                }
            }
        });
    }

    let metrics = Arc::new(Metrics::new());
    let state = AppState {
        sessions,
        stream_tracker,
        activity: activity_recorder,
        event_monitor,
        disk_space: disk_space_detector,
        config: config.clone(),
        metrics,
        started_at: unix_now(),
    };
    let app = create_router(state);

    let bind_addr = env::var("dvr_sentinel_bind_addr").unwrap_or_else(|_| "127.0.0.1:8090".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind control plane on {bind_addr}"))?;
    info!(addr = %bind_addr, "control plane listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("control plane server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping background tasks");
            cancel.cancel();
        }
    }

    Ok(())
}

fn detectors_for_cleanup(
    channel: &Arc<ChannelWatchingDetector>,
    vod: &Arc<VodWatchingDetector>,
    recording: &Arc<RecordingEventsDetector>,
) -> Vec<Arc<dyn Detector>> {
    vec![channel.clone(), vod.clone(), recording.clone()]
}

/// Spawns a task that calls `f(target)` on a fixed interval until `cancel`
/// fires, checked at each iteration boundary.
fn spawn_ticker<T, F, Fut>(target: Arc<T>, period: Duration, cancel: CancellationToken, f: F)
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => f(target.clone()).await,
            }
        }
    });
}
