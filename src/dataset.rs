use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnError, DisplayFromStr, PickFirst, serde_as};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tokio::task;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub enum DatasetSource {
    File(PathBuf),
    Remote(Url),
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::File(path) => write!(f, "file:{}", path.display()),
            DatasetSource::Remote(url) => write!(f, "{url}"),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub torrents: BTreeMap<String, Torrent>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub languages: HashMap<String, Vec<String>>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub stats: Option<DatasetStats>,
}

impl Dataset {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DatasetError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn language_codes(&self) -> Vec<String> {
        let codes: BTreeSet<String> = if self.languages.is_empty() {
            self.torrents
                .values()
                .flat_map(|torrent| torrent.languages.iter())
                .map(|code| normalize_language(code))
                .collect()
        } else {
            self.languages
                .keys()
                .map(|code| normalize_language(code))
                .collect()
        };
        codes.into_iter().collect()
    }
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetStats {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub last_updated: Option<String>,
}

// Each field falls back to its default on its own; numeric strings parse.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Torrent {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub name: String,
    #[serde_as(as = "DefaultOnError<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default, rename = "torrent_files")]
    pub file_count: u32,
    #[serde_as(as = "DefaultOnError<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub total_size: u64,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub subtitle_files: Vec<SubtitleFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackType {
    Complete,
    EpisodeSpecific,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubtitleFile {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub filename: String,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub is_pack: bool,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub pack_type: Option<PackType>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub episode_number: Option<u32>,
    #[serde_as(as = "DefaultOnError<Vec<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub afids: Vec<u64>,
    #[serde_as(as = "DefaultOnError<Vec<DefaultOnError<PickFirst<(_, DisplayFromStr)>>>>")]
    #[serde(default)]
    pub sizes: Vec<u64>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub pack_name: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub pack_url_type: Option<String>,
}

impl SubtitleFile {
    pub fn is_complete_pack(&self) -> bool {
        self.is_pack && self.pack_type == Some(PackType::Complete)
    }

    pub fn is_episode_pack(&self, episode: u32) -> bool {
        self.is_pack
            && self.pack_type == Some(PackType::EpisodeSpecific)
            && self.episode_number == Some(episode)
    }

    pub fn is_individual_for(&self, episode: u32) -> bool {
        !self.is_pack && self.episode_number == Some(episode)
    }

    pub fn size(&self) -> u64 {
        self.sizes.iter().copied().max().unwrap_or(0)
    }

    pub fn pack_label(&self) -> &'static str {
        match (self.is_pack, self.pack_type) {
            (true, Some(PackType::Complete)) => "complete",
            (true, Some(PackType::EpisodeSpecific)) => "episode_specific",
            (true, None) => "pack",
            (false, _) => "individual",
        }
    }

    pub fn has_language(&self, language: &str) -> bool {
        let wanted = normalize_language(language);
        self.languages
            .iter()
            .any(|code| normalize_language(code) == wanted)
    }
}

pub fn normalize_language(code: &str) -> String {
    let lowered = code.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "enm" | "und" | "" => "eng".to_string(),
        _ => lowered,
    }
}

#[derive(Debug, Clone)]
pub struct DatasetStore {
    source: DatasetSource,
    client: Client,
    ttl: Duration,
    cache: Arc<RwLock<Option<CachedDataset>>>,
    refresh_lock: Arc<Mutex<()>>,
}

#[derive(Debug)]
struct CachedDataset {
    loaded: Instant,
    loaded_at: OffsetDateTime,
    dataset: Arc<Dataset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStatus {
    pub source: String,
    pub loaded: bool,
    pub loaded_at: Option<String>,
    pub age_secs: Option<u64>,
    pub ttl_secs: u64,
    pub torrent_count: usize,
    pub language_count: usize,
    pub last_updated: Option<String>,
}

impl DatasetStore {
    pub fn new(source: DatasetSource, ttl: Duration, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("toshosubs/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            source,
            client,
            ttl,
            cache: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn source(&self) -> &DatasetSource {
        &self.source
    }

    /// Returns the cached dataset, reloading it when older than the TTL.
    pub async fn snapshot(&self) -> Result<Arc<Dataset>, DatasetError> {
        if let Some(dataset) = self.fresh_snapshot().await {
            return Ok(dataset);
        }

        let _guard = self.refresh_lock.lock().await;

        // another caller may have refreshed while we waited on the lock
        if let Some(dataset) = self.fresh_snapshot().await {
            return Ok(dataset);
        }

        match self.load().await {
            Ok(dataset) => {
                let dataset = Arc::new(dataset);
                let mut guard = self.cache.write().await;
                *guard = Some(CachedDataset {
                    loaded: Instant::now(),
                    loaded_at: OffsetDateTime::now_utc(),
                    dataset: dataset.clone(),
                });
                info!(
                    source = %self.source,
                    torrents = dataset.torrents.len(),
                    languages = dataset.languages.len(),
                    "dataset loaded"
                );
                Ok(dataset)
            }
            Err(error) => {
                let guard = self.cache.read().await;
                if let Some(cached) = guard.as_ref() {
                    warn!(
                        error = %error,
                        source = %self.source,
                        "dataset refresh failed; serving stale snapshot"
                    );
                    return Ok(cached.dataset.clone());
                }
                Err(error)
            }
        }
    }

    async fn fresh_snapshot(&self) -> Option<Arc<Dataset>> {
        let guard = self.cache.read().await;
        let cached = guard.as_ref()?;
        if self.ttl.is_zero() || cached.loaded.elapsed() >= self.ttl {
            debug!(source = %self.source, "dataset cache expired");
            return None;
        }
        Some(cached.dataset.clone())
    }

    async fn load(&self) -> Result<Dataset, DatasetError> {
        let bytes = match &self.source {
            DatasetSource::File(path) => {
                fs::read(path).await.map_err(|source| DatasetError::Read {
                    source,
                    path: path.clone(),
                })?
            }
            DatasetSource::Remote(url) => self.download(url).await?,
        };

        debug!(source = %self.source, bytes = bytes.len(), "decoding dataset");

        task::spawn_blocking(move || Dataset::from_slice(&bytes)).await?
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>, DatasetError> {
        let download_error = |source| DatasetError::Download {
            source,
            url: url.clone(),
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(download_error)?
            .error_for_status()
            .map_err(download_error)?;

        let bytes = response.bytes().await.map_err(download_error)?;
        Ok(bytes.to_vec())
    }

    pub async fn status(&self) -> DatasetStatus {
        let guard = self.cache.read().await;
        let mut status = DatasetStatus {
            source: self.source.to_string(),
            loaded: false,
            loaded_at: None,
            age_secs: None,
            ttl_secs: self.ttl.as_secs(),
            torrent_count: 0,
            language_count: 0,
            last_updated: None,
        };

        if let Some(cached) = guard.as_ref() {
            status.loaded = true;
            status.loaded_at = cached.loaded_at.format(&Rfc3339).ok();
            status.age_secs = Some(cached.loaded.elapsed().as_secs());
            status.torrent_count = cached.dataset.torrents.len();
            status.language_count = cached.dataset.languages.len();
            status.last_updated = cached
                .dataset
                .stats
                .as_ref()
                .and_then(|stats| stats.last_updated.clone());
        }

        status
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to download dataset from {url}")]
    Download {
        #[source]
        source: reqwest::Error,
        url: Url,
    },
    #[error("failed to read dataset file at {path}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to deserialise dataset payload")]
    Deserialisation(#[from] serde_json::Error),
    #[error("background task failed")]
    TaskJoin(#[from] tokio::task::JoinError),
}
