mod config;
mod dataset;
mod episode;
mod http;
mod links;
mod range;
mod search;
mod selector;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::dataset::DatasetStore;
use crate::links::LinkBuilder;
use crate::range::{EpisodeRangeDetector, SeriesOverrides};
use crate::search::Searcher;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub dataset: DatasetStore,
    pub searcher: Searcher,
}

pub type SharedAppState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    let listen_addr = config.listen_addr;

    let dataset = DatasetStore::new(
        config.dataset_source.clone(),
        config.cache_ttl,
        config.dataset_timeout,
    )
    .context("failed to construct dataset store")?;

    let overrides = match &config.series_overrides_path {
        Some(path) => SeriesOverrides::from_path(path)
            .await
            .context("failed to load series overrides")?,
        None => SeriesOverrides::default(),
    };
    if !overrides.is_empty() {
        tracing::info!(series = overrides.len(), "series overrides enabled");
    }

    let searcher = Searcher::new(
        EpisodeRangeDetector::new(config.range, overrides),
        LinkBuilder::new(
            config.storage_base_url.clone(),
            config.torrent_pack_base_url.clone(),
        ),
    );

    // warm the cache; a failure here is retried on the first request
    if let Err(error) = dataset.snapshot().await {
        tracing::warn!(
            error = %error,
            source = %dataset.source(),
            "initial dataset load failed"
        );
    }

    let state = Arc::new(AppState {
        config,
        dataset,
        searcher,
    });
    let app = http::router(state.clone());

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {listen_addr}"))?;

    tracing::info!(
        "listening for subtitle requests on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app.into_make_service())
        .await
        .context("server terminated unexpectedly")?;

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().without_time())
        .init();
}
