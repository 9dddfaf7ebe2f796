use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use url::Url;

use crate::dataset::DatasetSource;
use crate::range::RangeConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub dataset_source: DatasetSource,
    pub dataset_timeout: Duration,
    pub cache_ttl: Duration,
    pub storage_base_url: Url,
    pub torrent_pack_base_url: Url,
    pub default_limit: usize,
    pub max_limit: usize,
    pub range: RangeConfig,
    pub series_overrides_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup("TOSHOSUBS_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("TOSHOSUBS_PORT").unwrap_or_else(|| "8080".to_string());
        let port = port
            .parse::<u16>()
            .context("TOSHOSUBS_PORT must be a valid u16 integer")?;
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .context("failed to parse socket address from TOSHOSUBS_HOST and TOSHOSUBS_PORT")?;

        let dataset_path = lookup("TOSHOSUBS_DATASET_PATH").filter(|value| !value.trim().is_empty());
        let dataset_url = lookup("TOSHOSUBS_DATASET_URL").filter(|value| !value.trim().is_empty());
        let dataset_source = match (dataset_path, dataset_url) {
            (Some(path), None) => DatasetSource::File(PathBuf::from(path)),
            (None, Some(url)) => DatasetSource::Remote(
                Url::parse(url.trim()).context("TOSHOSUBS_DATASET_URL must be a valid URL")?,
            ),
            (Some(_), Some(_)) => {
                bail!("set only one of TOSHOSUBS_DATASET_PATH and TOSHOSUBS_DATASET_URL")
            }
            (None, None) => {
                bail!("one of TOSHOSUBS_DATASET_PATH or TOSHOSUBS_DATASET_URL is required")
            }
        };

        let dataset_timeout =
            Duration::from_secs(parse_or(&lookup, "TOSHOSUBS_DATASET_TIMEOUT_SECS", 10));
        let cache_ttl = Duration::from_secs(parse_or(&lookup, "TOSHOSUBS_CACHE_TTL_SECS", 3600));

        let raw_storage_url = lookup("TOSHOSUBS_STORAGE_BASE_URL")
            .unwrap_or_else(|| "https://storage.animetosho.org/".to_string());
        let storage_base_url = parse_root_url(&raw_storage_url, "TOSHOSUBS_STORAGE_BASE_URL")?;

        let raw_pack_url = lookup("TOSHOSUBS_TORRENT_PACK_BASE_URL")
            .unwrap_or_else(|| "https://animetosho.org/storage/".to_string());
        let torrent_pack_base_url = parse_root_url(&raw_pack_url, "TOSHOSUBS_TORRENT_PACK_BASE_URL")?;

        let max_limit = lookup("TOSHOSUBS_MAX_LIMIT")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(200);
        let default_limit = lookup("TOSHOSUBS_DEFAULT_LIMIT")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(100)
            .min(max_limit);

        let defaults = RangeConfig::default();
        let range = RangeConfig {
            volume_size: parse_or(&lookup, "TOSHOSUBS_VOLUME_SIZE", defaults.volume_size),
            pack_min_files: parse_or(&lookup, "TOSHOSUBS_PACK_MIN_FILES", defaults.pack_min_files),
            extras_min_files: parse_or(
                &lookup,
                "TOSHOSUBS_EXTRAS_MIN_FILES",
                defaults.extras_min_files,
            ),
        };

        let series_overrides_path = lookup("TOSHOSUBS_SERIES_OVERRIDES_PATH")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            listen_addr,
            dataset_source,
            dataset_timeout,
            cache_ttl,
            storage_base_url,
            torrent_pack_base_url,
            default_limit,
            max_limit,
            range,
            series_overrides_path,
        })
    }

    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .max(1)
            .min(self.max_limit)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_root_url(value: &str, label: &str) -> Result<Url> {
    let mut normalized = value.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).with_context(|| format!("{label} must be a valid URL"))
}
