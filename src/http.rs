use std::borrow::Cow;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::dataset::DatasetError;
use crate::range::{EpisodeRange, display_title, format_size};
use crate::search::{SearchError, SearchHit, SearchOutcome, SearchRequest};
use crate::{AppState, SharedAppState};

const SEARCH_CACHE_CONTROL: &str = "s-maxage=3600, stale-while-revalidate=86400";

pub fn router(state: SharedAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/health", get(health))
        .route("/api/search", get(search_handler))
        .route("/api/kodi", get(kodi_handler))
        .route("/api/episodes", get(episodes_handler))
        .route("/api/languages", get(languages_handler))
        .route("/api/debug", get(debug_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct SearchQuery {
    q: Option<String>,
    lang: Option<String>,
    limit: Option<String>,
}

impl SearchQuery {
    fn text(&self) -> Option<&str> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn limit(&self) -> Option<usize> {
        self.limit
            .as_deref()
            .and_then(|value| value.trim().parse::<usize>().ok())
    }
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
    total: usize,
    episode_requested: Option<u32>,
}

#[derive(Debug, Serialize)]
struct KodiItem {
    torrent_id: String,
    title: String,
    display_title: String,
    episode_range: Option<EpisodeRange>,
    filename: String,
    download_url: Option<String>,
    language: String,
    languages: Vec<String>,
    size: u64,
    size_formatted: String,
    episode_match: bool,
    torrent_files: u32,
    total_size: u64,
}

impl From<SearchHit> for KodiItem {
    fn from(hit: SearchHit) -> Self {
        let language = hit
            .languages
            .first()
            .cloned()
            .unwrap_or_else(|| "eng".to_string());

        KodiItem {
            torrent_id: hit.id,
            title: hit.name,
            display_title: hit.display_title,
            episode_range: hit.episode_range,
            filename: hit.filename,
            download_url: hit.download_url,
            language,
            languages: hit.languages,
            size: hit.size,
            size_formatted: hit.size_formatted,
            episode_match: hit.episode_match,
            torrent_files: hit.file_count,
            total_size: hit.total_size,
        }
    }
}

async fn search_handler(
    State(state): State<SharedAppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, HttpError> {
    info!(
        query = query.q.as_deref(),
        lang = query.lang.as_deref(),
        limit = query.limit.as_deref(),
        "search request received"
    );

    let outcome = run_search(&state, &query).await?;
    let body = SearchResponse {
        total: outcome.total,
        episode_requested: outcome.episode_requested,
        results: outcome.hits,
    };

    Ok((
        [(header::CACHE_CONTROL, SEARCH_CACHE_CONTROL)],
        Json(body),
    )
        .into_response())
}

async fn kodi_handler(
    State(state): State<SharedAppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, HttpError> {
    info!(
        query = query.q.as_deref(),
        lang = query.lang.as_deref(),
        limit = query.limit.as_deref(),
        "kodi search request received"
    );

    let outcome = run_search(&state, &query).await?;
    let data: Vec<KodiItem> = outcome.hits.into_iter().map(KodiItem::from).collect();
    let count = data.len();

    Ok((
        [(header::CACHE_CONTROL, SEARCH_CACHE_CONTROL)],
        Json(json!({ "success": true, "data": data, "count": count })),
    )
        .into_response())
}

async fn run_search(state: &AppState, query: &SearchQuery) -> Result<SearchOutcome, HttpError> {
    let Some(text) = query.text() else {
        return Err(HttpError::MissingQuery);
    };

    let dataset = state.dataset.snapshot().await?;
    let request = SearchRequest {
        query: text.to_string(),
        language: query.lang.clone(),
        limit: state.config.effective_limit(query.limit()),
    };

    let outcome = state.searcher.search(&dataset, &request)?;
    debug!(
        total = outcome.total,
        returned = outcome.hits.len(),
        episode = outcome.episode_requested,
        "search served"
    );
    Ok(outcome)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct EpisodesQuery {
    id: Option<String>,
    name: Option<String>,
    files: Option<String>,
}

#[derive(Debug, Serialize)]
struct EpisodesResponse {
    id: Option<String>,
    name: String,
    file_count: u32,
    episode_range: Option<EpisodeRange>,
    display_title: String,
}

async fn episodes_handler(
    State(state): State<SharedAppState>,
    Query(query): Query<EpisodesQuery>,
) -> Result<Response, HttpError> {
    let id = query
        .id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let (name, file_count, size_formatted) = match id {
        Some(id) => {
            let dataset = state.dataset.snapshot().await?;
            let torrent = dataset
                .torrents
                .get(id)
                .ok_or_else(|| HttpError::UnknownTorrent(id.to_string()))?;
            let size_formatted = if torrent.total_size > 0 {
                format_size(torrent.total_size)
            } else {
                String::new()
            };
            (torrent.name.clone(), torrent.file_count, size_formatted)
        }
        None => {
            let name = query
                .name
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or(HttpError::MissingName)?;
            let file_count = query
                .files
                .as_deref()
                .and_then(|value| value.trim().parse::<u32>().ok())
                .unwrap_or(0);
            (name.to_string(), file_count, String::new())
        }
    };

    let episode_range = state.searcher.detector().detect(&name, file_count);
    debug!(
        name = %name,
        file_count,
        range = episode_range.as_ref().map(ToString::to_string).as_deref(),
        "episode range detected"
    );

    let display_title = display_title(&name, episode_range.as_ref(), &size_formatted);
    Ok(Json(EpisodesResponse {
        id: id.map(str::to_string),
        name,
        file_count,
        episode_range,
        display_title,
    })
    .into_response())
}

async fn languages_handler(State(state): State<SharedAppState>) -> Result<Response, HttpError> {
    let dataset = state.dataset.snapshot().await?;
    Ok(Json(json!({ "languages": dataset.language_codes() })).into_response())
}

async fn debug_handler(State(state): State<SharedAppState>) -> impl IntoResponse {
    Json(state.dataset.status().await)
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("query parameter `q` is required")]
    MissingQuery,
    #[error("query parameter `name` or `id` is required")]
    MissingName,
    #[error("torrent `{0}` not found")]
    UnknownTorrent(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message): (StatusCode, Cow<'static, str>) = match &self {
            HttpError::MissingQuery | HttpError::Search(SearchError::MissingQuery) => {
                (StatusCode::BAD_REQUEST, Cow::from("Query required"))
            }
            HttpError::MissingName => (StatusCode::BAD_REQUEST, Cow::from(self.to_string())),
            HttpError::UnknownTorrent(_) => (StatusCode::NOT_FOUND, Cow::from(self.to_string())),
            HttpError::Dataset(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Cow::from("Subtitle dataset is unavailable"),
            ),
            HttpError::Search(SearchError::Link(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Cow::from("Failed to build subtitle download url"),
            ),
        };

        if status.is_server_error() {
            tracing::error!("subtitle handler error: {self}");
        } else {
            debug!("rejected subtitle request: {self}");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}
