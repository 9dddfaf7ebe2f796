use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_with::{DisplayFromStr, serde_as};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, trace};

static EXPLICIT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\D)(?:eps?(?:isodes?)?\s*)?(\d{1,2})\s*-\s*(\d{1,2})(?:\D|$)").unwrap()
});

const PACK_KEYWORDS: [&str; 3] = ["complete", "batch", "season"];
const VOLUME_LABELS: usize = 4;
const EXTRAS_LABEL: &str = "Extras";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeSpan {
    pub start: u32,
    pub end: u32,
}

impl EpisodeSpan {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn episode_count(&self) -> u32 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }
}

impl fmt::Display for EpisodeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.start, self.end)
    }
}

impl FromStr for EpisodeSpan {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (start, end) = value
            .split_once('-')
            .ok_or_else(|| format!("`{value}` is not an NN-MM episode span"))?;
        let start = start
            .trim()
            .parse()
            .map_err(|_| format!("invalid span start in `{value}`"))?;
        let end = end
            .trim()
            .parse()
            .map_err(|_| format!("invalid span end in `{value}`"))?;
        Ok(Self { start, end })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeRange {
    Span(EpisodeSpan),
    WithExtras { span: EpisodeSpan, label: String },
    Complete,
}

impl EpisodeRange {
    pub fn has_extras(&self) -> bool {
        matches!(self, EpisodeRange::WithExtras { .. })
    }
}

impl fmt::Display for EpisodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeRange::Span(span) => write!(f, "{span}"),
            EpisodeRange::WithExtras { span, label } => write!(f, "{span} + {label}"),
            EpisodeRange::Complete => f.write_str("Complete"),
        }
    }
}

impl Serialize for EpisodeRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RangeConfig {
    pub volume_size: u32,
    pub pack_min_files: u32,
    pub extras_min_files: u32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            volume_size: 6,
            pack_min_files: 5,
            extras_min_files: 20,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesOverride {
    #[serde(default)]
    pub episodes: u32,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    #[serde(default)]
    pub volumes: Vec<EpisodeSpan>,
    #[serde(default)]
    pub extras: Option<SeriesExtras>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesExtras {
    pub file_count: u32,
    pub label: String,
}

// Keyed by a lowercase title fragment.
#[derive(Debug, Clone, Default)]
pub struct SeriesOverrides {
    entries: Vec<(String, SeriesOverride)>,
}

impl SeriesOverrides {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, SeriesOverride> = serde_json::from_slice(bytes)?;
        Ok(raw.into_iter().collect())
    }

    pub async fn from_path(path: &Path) -> Result<Self, OverrideError> {
        let contents = fs::read(path).await.map_err(|source| OverrideError::Read {
            source,
            path: path.to_path_buf(),
        })?;
        let overrides = Self::from_json(&contents).map_err(|source| OverrideError::Parse {
            source,
            path: path.to_path_buf(),
        })?;
        debug!(
            path = %path.display(),
            series = overrides.len(),
            "loaded series overrides"
        );
        Ok(overrides)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, SeriesOverride)> for SeriesOverrides {
    fn from_iter<I: IntoIterator<Item = (String, SeriesOverride)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, series)| (key.to_lowercase(), series))
                .filter(|(key, _)| !key.trim().is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EpisodeRangeDetector {
    config: RangeConfig,
    overrides: SeriesOverrides,
}

impl EpisodeRangeDetector {
    pub fn new(config: RangeConfig, overrides: SeriesOverrides) -> Self {
        Self { config, overrides }
    }

    pub fn detect(&self, name: &str, file_count: u32) -> Option<EpisodeRange> {
        if let Some(span) = explicit_span(name) {
            trace!(name, %span, "explicit episode range in title");
            return Some(EpisodeRange::Span(span));
        }

        let lower = name.to_lowercase();

        if let Some(range) = self.detect_series(&lower, file_count) {
            trace!(name, file_count, %range, "series override matched");
            return Some(range);
        }

        if let Some(span) = self.detect_volume(&lower) {
            return Some(EpisodeRange::Span(span));
        }

        if file_count > 1 {
            return self.detect_from_file_count(&lower, file_count);
        }

        None
    }

    fn detect_series(&self, lower: &str, file_count: u32) -> Option<EpisodeRange> {
        for (key, series) in &self.overrides.entries {
            if !lower.contains(key.as_str()) {
                continue;
            }

            if series.episodes > 0 && (file_count >= series.episodes || has_pack_keyword(lower)) {
                let span = EpisodeSpan::new(1, series.episodes);
                if let Some(extras) = &series.extras
                    && extras.file_count == file_count
                {
                    return Some(EpisodeRange::WithExtras {
                        span,
                        label: extras.label.clone(),
                    });
                }
                return Some(EpisodeRange::Span(span));
            }

            let labels = series.volumes.len().max(VOLUME_LABELS);
            if let Some(volume) = volume_number(lower, labels)
                && let Some(span) = series.volumes.get(volume - 1)
            {
                return Some(EpisodeRange::Span(*span));
            }

            if file_count > 0
                && let Some(span) = series.volumes.iter().find(|span| span.episode_count() == file_count)
            {
                return Some(EpisodeRange::Span(*span));
            }
        }

        None
    }

    fn detect_volume(&self, lower: &str) -> Option<EpisodeSpan> {
        let size = self.config.volume_size;
        if size == 0 {
            return None;
        }

        let volume = u32::try_from(volume_number(lower, VOLUME_LABELS)?).ok()?;
        let end = volume.checked_mul(size)?;
        Some(EpisodeSpan::new(end - size + 1, end))
    }

    fn detect_from_file_count(&self, lower: &str, file_count: u32) -> Option<EpisodeRange> {
        if file_count >= self.config.extras_min_files {
            return Some(EpisodeRange::WithExtras {
                span: EpisodeSpan::new(1, file_count - 1),
                label: EXTRAS_LABEL.to_string(),
            });
        }

        if file_count >= self.config.pack_min_files {
            return Some(EpisodeRange::Span(EpisodeSpan::new(1, file_count)));
        }

        if has_pack_keyword(lower) {
            return Some(EpisodeRange::Complete);
        }

        None
    }
}

fn explicit_span(name: &str) -> Option<EpisodeSpan> {
    let caps = EXPLICIT_RANGE.captures(name)?;
    let start = caps.get(1)?.as_str().parse().ok()?;
    let end = caps.get(2)?.as_str().parse().ok()?;
    Some(EpisodeSpan::new(start, end))
}

fn has_pack_keyword(lower: &str) -> bool {
    PACK_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

fn volume_number(lower: &str, labels: usize) -> Option<usize> {
    (1..=labels).find(|volume| {
        lower.contains(&format!("vol.{volume:02}")) || lower.contains(&format!("volume {volume}"))
    })
}

pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if bytes < KIB {
        format!("{bytes}B")
    } else if bytes < MIB {
        format!("{:.1}KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1}MB", bytes as f64 / MIB as f64)
    }
}

pub fn display_title(name: &str, range: Option<&EpisodeRange>, size_formatted: &str) -> String {
    match range {
        None if size_formatted.is_empty() => truncate(name, 70).to_string(),
        None => format!("{} ({size_formatted})", truncate(name, 70)),
        Some(range) if range.has_extras() => {
            format!("{} ({range}) ({size_formatted})", truncate(name, 40))
        }
        Some(EpisodeRange::Complete) => {
            format!("{} (Complete) ({size_formatted})", truncate(name, 55))
        }
        Some(range) => format!("{} (Eps {range}) ({size_formatted})", truncate(name, 45)),
    }
}

fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("failed to read series overrides at {path}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse series overrides at {path}")]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },
}
