use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::dataset::{Dataset, SubtitleFile, Torrent, normalize_language};
use crate::episode::extract_requested_episode;
use crate::links::LinkBuilder;
use crate::range::{EpisodeRange, EpisodeRangeDetector, display_title, format_size};
use crate::selector::select_best_file;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub language: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub filename: String,
    pub download_url: Option<String>,
    pub downloads: Vec<Download>,
    pub size: u64,
    pub size_formatted: String,
    pub episode_number: Option<u32>,
    pub episode_match: bool,
    pub pack_type: &'static str,
    pub episode_range: Option<EpisodeRange>,
    pub display_title: String,
    pub languages: Vec<String>,
    pub file_count: u32,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Download {
    pub language: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub total: usize,
    pub episode_requested: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Searcher {
    detector: EpisodeRangeDetector,
    links: LinkBuilder,
}

impl Searcher {
    pub fn new(detector: EpisodeRangeDetector, links: LinkBuilder) -> Self {
        Self { detector, links }
    }

    pub fn detector(&self) -> &EpisodeRangeDetector {
        &self.detector
    }

    pub fn search(
        &self,
        dataset: &Dataset,
        request: &SearchRequest,
    ) -> Result<SearchOutcome, SearchError> {
        let query = request.query.trim().to_lowercase();
        if query.is_empty() {
            return Err(SearchError::MissingQuery);
        }

        let requested_episode = extract_requested_episode(&request.query);
        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(normalize_language);

        let candidates = candidate_ids(dataset, language.as_deref());
        debug!(
            query = %query,
            language = language.as_deref(),
            episode = requested_episode,
            candidates = candidates.len(),
            "searching dataset"
        );

        let mut hits = Vec::new();
        for id in candidates {
            let Some(torrent) = dataset.torrents.get(id) else {
                trace!(torrent_id = id, "language index references unknown torrent");
                continue;
            };

            if !torrent.name.to_lowercase().contains(&query) && !id.contains(&query) {
                continue;
            }

            let files = torrent.subtitle_files.iter().filter(|file| match &language {
                Some(language) => file.has_language(language),
                None => true,
            });

            let Some(selected) = select_best_file(files, requested_episode) else {
                trace!(torrent_id = id, "no subtitle files in requested language");
                continue;
            };

            hits.push(self.build_hit(id, torrent, selected, requested_episode)?);
        }

        rank_hits(&mut hits);
        let total = hits.len();
        hits.truncate(request.limit);

        debug!(total, returned = hits.len(), "search completed");

        Ok(SearchOutcome {
            hits,
            total,
            episode_requested: requested_episode,
        })
    }

    fn build_hit(
        &self,
        id: &str,
        torrent: &Torrent,
        file: &SubtitleFile,
        requested_episode: Option<u32>,
    ) -> Result<SearchHit, SearchError> {
        let download_url = self
            .links
            .primary(id, &torrent.name, file)?
            .map(|url| url.to_string());
        let downloads = self.downloads(id, torrent, file)?;
        let episode_range = self.detector.detect(&torrent.name, torrent.file_count);
        let size = file.size();
        let size_formatted = format_size(size);
        let display_title = display_title(&torrent.name, episode_range.as_ref(), &size_formatted);

        let mut languages: Vec<String> = Vec::with_capacity(file.languages.len());
        for code in file.languages.iter().map(|code| normalize_language(code)) {
            if !languages.contains(&code) {
                languages.push(code);
            }
        }

        Ok(SearchHit {
            id: id.to_string(),
            name: torrent.name.clone(),
            filename: file.filename.clone(),
            download_url,
            downloads,
            size,
            size_formatted,
            episode_number: file.episode_number,
            episode_match: requested_episode.is_some() && file.episode_number == requested_episode,
            pack_type: file.pack_label(),
            episode_range,
            display_title,
            languages,
            file_count: torrent.file_count,
            total_size: torrent.total_size,
        })
    }

    // packs always collapse to their single archive
    fn downloads(
        &self,
        id: &str,
        torrent: &Torrent,
        file: &SubtitleFile,
    ) -> Result<Vec<Download>, SearchError> {
        let language_at = |index: usize| {
            file.languages
                .get(index)
                .or_else(|| file.languages.first())
                .map(|code| normalize_language(code))
                .unwrap_or_else(|| normalize_language(""))
        };

        if file.is_pack {
            let Some(url) = self.links.primary(id, &torrent.name, file)? else {
                return Ok(Vec::new());
            };
            return Ok(vec![Download {
                language: language_at(0),
                url: url.to_string(),
            }]);
        }

        file.afids
            .iter()
            .enumerate()
            .map(|(index, afid)| -> Result<Download, SearchError> {
                Ok(Download {
                    language: language_at(index),
                    url: self.links.attachment(*afid)?.to_string(),
                })
            })
            .collect()
    }
}

/// Exact episode matches first, then larger files; ties keep input order.
pub fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.episode_match
            .cmp(&a.episode_match)
            .then_with(|| b.size.cmp(&a.size))
    });
}

fn candidate_ids<'a>(dataset: &'a Dataset, language: Option<&str>) -> BTreeSet<&'a str> {
    if let Some(language) = language {
        let indexed: BTreeSet<&str> = dataset
            .languages
            .iter()
            .filter(|(code, _)| normalize_language(code) == language)
            .flat_map(|(_, ids)| ids.iter().map(String::as_str))
            .collect();
        if !indexed.is_empty() {
            return indexed;
        }
    }

    dataset.torrents.keys().map(String::as_str).collect()
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("a search query is required")]
    MissingQuery,
    #[error("failed to build subtitle download url")]
    Link(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PackType;
    use crate::range::RangeConfig;
    use crate::range::SeriesOverrides;
    use url::Url;

    fn searcher() -> Searcher {
        Searcher::new(
            EpisodeRangeDetector::new(RangeConfig::default(), SeriesOverrides::default()),
            LinkBuilder::new(
                Url::parse("https://storage.animetosho.org/").unwrap(),
                Url::parse("https://animetosho.org/storage/").unwrap(),
            ),
        )
    }

    fn individual(episode: u32, languages: &[&str], afids: &[u64], size: u64) -> SubtitleFile {
        SubtitleFile {
            filename: format!("Show - {episode:02}.ass"),
            languages: languages.iter().map(|code| code.to_string()).collect(),
            episode_number: Some(episode),
            afids: afids.to_vec(),
            sizes: vec![size],
            ..SubtitleFile::default()
        }
    }

    fn torrent(name: &str, file_count: u32, files: Vec<SubtitleFile>) -> Torrent {
        Torrent {
            name: name.to_string(),
            file_count,
            subtitle_files: files,
            ..Torrent::default()
        }
    }

    fn request(query: &str, language: Option<&str>) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            language: language.map(str::to_string),
            limit: 50,
        }
    }

    fn dataset() -> Dataset {
        let mut dataset = Dataset::default();
        dataset.torrents.insert(
            "1".to_string(),
            torrent("Show - 05 [720p]", 1, vec![individual(5, &["eng"], &[1], 100)]),
        );
        dataset.torrents.insert(
            "2".to_string(),
            torrent("Show Batch", 12, vec![individual(5, &["enm"], &[2], 50)]),
        );
        dataset.torrents.insert(
            "3".to_string(),
            torrent("Show - 06 [1080p]", 1, vec![individual(6, &["eng"], &[3], 200)]),
        );
        dataset.torrents.insert(
            "4".to_string(),
            torrent("Other - 05", 1, vec![individual(5, &["spa"], &[4], 900)]),
        );
        dataset
    }

    #[test]
    fn ranks_by_size_without_requested_episode() {
        let outcome = searcher().search(&dataset(), &request("show", None)).unwrap();
        assert_eq!(outcome.episode_requested, None);
        let ids: Vec<&str> = outcome.hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
        assert!(outcome.hits.iter().all(|hit| !hit.episode_match));
    }

    #[test]
    fn episode_matches_rank_first_in_search() {
        let mut dataset = Dataset::default();
        dataset.torrents.insert(
            "10".to_string(),
            torrent("Show - 05 [720p]", 1, vec![individual(5, &["eng"], &[1], 100)]),
        );
        dataset.torrents.insert(
            "11".to_string(),
            torrent("Show - 05-12 Batch", 8, vec![individual(6, &["eng"], &[2], 200)]),
        );
        dataset.torrents.insert(
            "12".to_string(),
            torrent("Show - 05 [BD]", 1, vec![individual(5, &["eng"], &[3], 50)]),
        );

        let outcome = searcher().search(&dataset, &request("show - 05", None)).unwrap();
        assert_eq!(outcome.episode_requested, Some(5));
        let ids: Vec<&str> = outcome.hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["10", "12", "11"]);
        assert!(!outcome.hits[2].episode_match);
    }

    #[test]
    fn requested_episode_ranking_scenario() {
        let mut hits: Vec<SearchHit> = [("a", true, 100), ("b", false, 200), ("c", true, 50)]
            .into_iter()
            .map(|(id, episode_match, size)| SearchHit {
                id: id.to_string(),
                name: String::new(),
                filename: String::new(),
                download_url: None,
                downloads: Vec::new(),
                size,
                size_formatted: format_size(size),
                episode_number: None,
                episode_match,
                pack_type: "individual",
                episode_range: None,
                display_title: String::new(),
                languages: Vec::new(),
                file_count: 0,
                total_size: 0,
            })
            .collect();

        rank_hits(&mut hits);

        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn blank_query_is_rejected() {
        let error = searcher().search(&dataset(), &request("   ", None)).unwrap_err();
        assert!(matches!(error, SearchError::MissingQuery));
    }

    #[test]
    fn language_filter_folds_legacy_codes() {
        let outcome = searcher()
            .search(&dataset(), &request("show", Some("eng")))
            .unwrap();
        assert_eq!(outcome.total, 3);

        let outcome = searcher()
            .search(&dataset(), &request("05", Some("spa")))
            .unwrap();
        let ids: Vec<&str> = outcome.hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["4"]);
        assert_eq!(outcome.hits[0].languages, vec!["spa"]);
    }

    #[test]
    fn language_index_prunes_candidates() {
        let mut dataset = dataset();
        dataset
            .languages
            .insert("eng".to_string(), vec!["3".to_string()]);

        let outcome = searcher().search(&dataset, &request("show", Some("eng"))).unwrap();
        let ids: Vec<&str> = outcome.hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);
    }

    #[test]
    fn limit_applies_after_ranking() {
        let mut limited = request("show", None);
        limited.limit = 1;
        let outcome = searcher().search(&dataset(), &limited).unwrap();
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].id, "3");
    }

    #[test]
    fn hits_carry_links_and_ranges() {
        let mut dataset = dataset();
        dataset.torrents.insert(
            "7".to_string(),
            torrent(
                "Show Complete",
                24,
                vec![
                    individual(1, &["eng", "jpn"], &[0xabc, 0xdef], 10),
                    SubtitleFile {
                        filename: "Show Complete".to_string(),
                        languages: vec!["eng".to_string(), "jpn".to_string()],
                        is_pack: true,
                        pack_type: Some(PackType::Complete),
                        sizes: vec![5000],
                        pack_url_type: Some("torattachpk".to_string()),
                        ..SubtitleFile::default()
                    },
                ],
            ),
        );

        let outcome = searcher()
            .search(&dataset, &request("show complete", None))
            .unwrap();
        let hit = &outcome.hits[0];
        assert_eq!(hit.pack_type, "complete");
        assert_eq!(hit.size, 5000);
        assert_eq!(hit.downloads.len(), 1);
        assert_eq!(
            hit.download_url.as_deref(),
            Some("https://animetosho.org/storage/torattachpk/7/Show%20Complete_attachments.7z")
        );
        assert_eq!(
            hit.episode_range.as_ref().map(ToString::to_string).as_deref(),
            Some("01-23 + Extras")
        );
    }

    #[test]
    fn individual_hits_list_every_language_variant() {
        let mut dataset = Dataset::default();
        dataset.torrents.insert(
            "8".to_string(),
            torrent(
                "Show - 01",
                1,
                vec![individual(1, &["eng", "jpn"], &[0xabc, 0xdef], 10)],
            ),
        );

        let outcome = searcher().search(&dataset, &request("show", None)).unwrap();
        let hit = &outcome.hits[0];
        assert_eq!(
            hit.download_url.as_deref(),
            Some("https://storage.animetosho.org/attach/00000abc/file.xz")
        );
        let languages: Vec<&str> = hit.downloads.iter().map(|d| d.language.as_str()).collect();
        assert_eq!(languages, vec!["eng", "jpn"]);
    }
}
