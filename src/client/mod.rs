//! DVR Client: typed HTTP fetchers for the upstream Channels DVR server,
//! modeled on the teacher's per-device HTTP clients (see
//! `device-manager::firmware_client::OnvifFirmwareClient`) — one
//! `reqwest::Client` built once with sane defaults, per-call timeout
//! overrides, errors classified into a small enum instead of bubbling
//! `reqwest::Error` directly.

pub mod xmltv;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::DvrClientError;
use crate::model::{ChannelInfo, CompletedRecording, DiskStatus, RecordingJob, VodCatalogEntry};

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const CATALOG_TIMEOUT: Duration = Duration::from_secs(20);
const JOBS_TIMEOUT: Duration = Duration::from_secs(10);
const XMLTV_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait DvrClient: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, DvrClientError>;
    async fn fetch_xmltv(&self) -> Result<String, DvrClientError>;
    async fn list_jobs(&self) -> Result<Vec<RecordingJob>, DvrClientError>;
    async fn get_job(&self, id: &str) -> Result<RecordingJob, DvrClientError>;
    async fn get_recording(&self, file_id: &str) -> Result<CompletedRecording, DvrClientError>;
    async fn list_recordings(&self) -> Result<Vec<CompletedRecording>, DvrClientError>;
    async fn list_vod(&self) -> Result<Vec<VodCatalogEntry>, DvrClientError>;
    async fn get_status(&self) -> Result<DiskStatus, DvrClientError>;
}

pub struct HttpDvrClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDvrClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DvrClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| DvrClientError::ConnectionFailed("client init".to_string(), e.to_string()))?;

        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<T, DvrClientError> {
        let url = self.url(path);
        let resp = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| DvrClientError::from_reqwest(path.to_string(), e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DvrClientError::NotFound(path.to_string()));
        }
        if !resp.status().is_success() {
            return Err(DvrClientError::UnexpectedStatus(path.to_string(), resp.status()));
        }

        resp.json::<T>()
            .await
            .map_err(|e| DvrClientError::Decode(path.to_string(), e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    #[serde(alias = "Number")]
    number: String,
    #[serde(alias = "Name")]
    name: String,
    #[serde(alias = "Logo")]
    logo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawJob {
    #[serde(alias = "ID")]
    id: String,
    #[serde(alias = "Name")]
    name: String,
    #[serde(alias = "StartTime")]
    start_time: u64,
    #[serde(alias = "Duration")]
    duration: u64,
    #[serde(default, alias = "Channels")]
    channels: Vec<String>,
    #[serde(default)]
    item: Option<RawJobItem>,
}

#[derive(Debug, Deserialize)]
struct RawJobItem {
    summary: Option<String>,
    image_url: Option<String>,
}

impl From<RawJob> for RecordingJob {
    fn from(raw: RawJob) -> Self {
        RecordingJob {
            id: raw.id,
            name: raw.name,
            start_time: raw.start_time,
            duration: raw.duration,
            channels: raw.channels,
            summary: raw.item.as_ref().and_then(|i| i.summary.clone()),
            image_url: raw.item.and_then(|i| i.image_url),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRecording {
    #[serde(alias = "FileID")]
    file_id: String,
    #[serde(alias = "JobID", default)]
    job_id: String,
    #[serde(alias = "Title", default)]
    title: String,
    #[serde(default, alias = "EpisodeTitle")]
    episode_title: Option<String>,
    #[serde(default, alias = "Channel")]
    channel: Option<String>,
    #[serde(default, alias = "Duration")]
    duration: Option<u64>,
    #[serde(default)]
    processed: bool,
    #[serde(default)]
    cancelled: bool,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    delayed: bool,
    #[serde(default, alias = "ImageURL")]
    image_url: Option<String>,
}

impl From<RawRecording> for CompletedRecording {
    fn from(raw: RawRecording) -> Self {
        CompletedRecording {
            file_id: raw.file_id,
            job_id: raw.job_id,
            title: raw.title,
            episode_title: raw.episode_title,
            channel: raw.channel,
            duration: raw.duration,
            processed: raw.processed,
            cancelled: raw.cancelled,
            completed: raw.completed,
            delayed: raw.delayed,
            image_url: raw.image_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDiskStatus {
    #[serde(alias = "Free")]
    free: u64,
    #[serde(alias = "Total")]
    total: u64,
    #[serde(alias = "Used", default)]
    used: u64,
    #[serde(alias = "Path", default)]
    path: String,
}

#[async_trait]
impl DvrClient for HttpDvrClient {
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, DvrClientError> {
        let raw: Vec<RawChannel> = self.get_json("/api/v1/channels", CATALOG_TIMEOUT).await?;
        Ok(raw
            .into_iter()
            .map(|c| ChannelInfo {
                number: c.number,
                name: c.name,
                logo_url: c.logo_url,
            })
            .collect())
    }

    async fn fetch_xmltv(&self) -> Result<String, DvrClientError> {
        let url = self.url("/devices/ANY/guide/xmltv");
        let resp = self
            .http
            .get(&url)
            .timeout(XMLTV_TIMEOUT)
            .send()
            .await
            .map_err(|e| DvrClientError::from_reqwest("xmltv".to_string(), e))?;

        if !resp.status().is_success() {
            return Err(DvrClientError::UnexpectedStatus("xmltv".to_string(), resp.status()));
        }

        resp.text()
            .await
            .map_err(|e| DvrClientError::Decode("xmltv".to_string(), e.to_string()))
    }

    async fn list_jobs(&self) -> Result<Vec<RecordingJob>, DvrClientError> {
        let raw: Vec<RawJob> = self.get_json("/api/v1/jobs", JOBS_TIMEOUT).await?;
        Ok(raw.into_iter().map(RecordingJob::from).collect())
    }

    async fn get_job(&self, id: &str) -> Result<RecordingJob, DvrClientError> {
        let path = format!("/api/v1/jobs/{id}");
        let raw: RawJob = self.get_json(&path, JOBS_TIMEOUT).await?;
        Ok(raw.into())
    }

    async fn get_recording(&self, file_id: &str) -> Result<CompletedRecording, DvrClientError> {
        let path = format!("/api/v1/recordings/{file_id}");
        match self.get_json::<RawRecording>(&path, CATALOG_TIMEOUT).await {
            Ok(raw) => Ok(raw.into()),
            Err(DvrClientError::NotFound(_)) => {
                let catalog = self.list_recordings().await?;
                catalog
                    .into_iter()
                    .find(|r| r.file_id == file_id)
                    .ok_or_else(|| DvrClientError::NotFound(file_id.to_string()))
            }
            Err(other) => Err(other),
        }
    }

    async fn list_recordings(&self) -> Result<Vec<CompletedRecording>, DvrClientError> {
        let raw: Vec<RawRecording> = self.get_json("/api/v1/all", CATALOG_TIMEOUT).await?;
        Ok(raw.into_iter().map(CompletedRecording::from).collect())
    }

    async fn list_vod(&self) -> Result<Vec<VodCatalogEntry>, DvrClientError> {
        self.get_json("/api/v1/all", CATALOG_TIMEOUT).await
    }

    async fn get_status(&self) -> Result<DiskStatus, DvrClientError> {
        let raw: RawDiskStatus = self.get_json("/dvr", STATUS_TIMEOUT).await?;
        Ok(DiskStatus {
            free_bytes: raw.free,
            total_bytes: raw.total,
            used_bytes: raw.used,
            path: raw.path,
        })
    }
}
