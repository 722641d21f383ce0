//! Concrete read-through caches (spec §4.2) built on `TtlCache`.
//!
//! Each wrapper owns the DVR Client lookup needed to refresh itself and
//! exposes the shape detectors actually want (lookup by channel number,
//! current-program scan, lookup by job/file id) instead of making every
//! caller re-derive it from a raw `Vec`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::xmltv::{parse_xmltv, XmltvGuide};
use crate::client::DvrClient;
use crate::error::DvrClientError;
use crate::cache::TtlCache;
use crate::model::{ChannelInfo, CompletedRecording, ProgramEntry, RecordingJob, VodCatalogEntry};

pub struct ChannelCache {
    dvr: Arc<dyn DvrClient>,
    cache: TtlCache<Vec<ChannelInfo>>,
}

impl ChannelCache {
    pub fn new(dvr: Arc<dyn DvrClient>, ttl_secs: u64) -> Self {
        Self {
            dvr,
            cache: TtlCache::new(ttl_secs),
        }
    }

    async fn channels(&self) -> Result<Vec<ChannelInfo>, DvrClientError> {
        let dvr = self.dvr.clone();
        self.cache.get_or_refresh(|| async move { dvr.list_channels().await }).await
    }

    pub async fn by_number(&self, number: &str) -> Option<ChannelInfo> {
        self.channels().await.ok()?.into_iter().find(|c| c.number == number)
    }
}

pub struct ProgramCache {
    dvr: Arc<dyn DvrClient>,
    tz: chrono_tz::Tz,
    cache: TtlCache<Arc<XmltvGuide>>,
}

impl ProgramCache {
    pub fn new(dvr: Arc<dyn DvrClient>, tz: chrono_tz::Tz, ttl_secs: u64) -> Self {
        Self {
            dvr,
            tz,
            cache: TtlCache::new(ttl_secs),
        }
    }

    async fn guide(&self) -> Result<Arc<XmltvGuide>, DvrClientError> {
        let dvr = self.dvr.clone();
        let tz = self.tz;
        self.cache
            .get_or_refresh(|| async move {
                let xml = dvr.fetch_xmltv().await?;
                Ok(Arc::new(parse_xmltv(&xml, &tz)))
            })
            .await
    }

    /// Looks up the channel-id for a number (lcn), then scans its program
    /// list for the entry whose window contains `now`.
    pub async fn current_program(&self, channel_number: &str, now: u64) -> Option<ProgramEntry> {
        let guide = self.guide().await.ok()?;
        let channel_id = guide.channel_ids.get(channel_number)?;
        guide.current_program(channel_id, now).cloned()
    }
}

pub struct JobCache {
    dvr: Arc<dyn DvrClient>,
    cache: TtlCache<HashMap<String, RecordingJob>>,
}

impl JobCache {
    pub fn new(dvr: Arc<dyn DvrClient>, ttl_secs: u64) -> Self {
        Self {
            dvr,
            cache: TtlCache::new(ttl_secs),
        }
    }

    async fn jobs(&self) -> Result<HashMap<String, RecordingJob>, DvrClientError> {
        let dvr = self.dvr.clone();
        self.cache
            .get_or_refresh(|| async move {
                let jobs = dvr.list_jobs().await?;
                Ok(jobs.into_iter().map(|j| (j.id.clone(), j)).collect())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Option<RecordingJob> {
        self.jobs().await.ok()?.get(id).cloned()
    }

    /// Bypasses the cache: used by the Recording-Events watchdog recovery
    /// path and the hourly cleanup sweep, both of which need ground truth.
    pub async fn refresh_now(&self) -> Result<HashMap<String, RecordingJob>, DvrClientError> {
        self.cache.invalidate().await;
        self.jobs().await
    }
}

pub struct VodCache {
    dvr: Arc<dyn DvrClient>,
    cache: TtlCache<HashMap<String, VodCatalogEntry>>,
}

impl VodCache {
    pub fn new(dvr: Arc<dyn DvrClient>, ttl_secs: u64) -> Self {
        Self {
            dvr,
            cache: TtlCache::new(ttl_secs),
        }
    }

    async fn catalog(&self) -> Result<HashMap<String, VodCatalogEntry>, DvrClientError> {
        let dvr = self.dvr.clone();
        self.cache
            .get_or_refresh(|| async move {
                let entries = dvr.list_vod().await?;
                Ok(entries.into_iter().map(|e| (e.file_id.clone(), e)).collect())
            })
            .await
    }

    pub async fn get(&self, file_id: &str) -> Option<VodCatalogEntry> {
        self.catalog().await.ok()?.get(file_id).cloned()
    }
}

/// Thin pass-through used by Recording-Events for completed-recording
/// lookups; unlike the other caches this always hits the DVR Client because
/// the pending-retry loop needs the freshest `processed` flag, not a stale
/// 1-hour-old snapshot. Kept alongside the TTL caches so every DVR lookup in
/// the codebase goes through one seam.
pub async fn fetch_recording(dvr: &Arc<dyn DvrClient>, file_id: &str) -> Result<CompletedRecording, DvrClientError> {
    dvr.get_recording(file_id).await
}
