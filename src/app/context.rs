use std::sync::Arc;

use crate::app::error::Result;
use crate::cache::ChapterCache;
use crate::config::Config;
use crate::domain::Manga;
use crate::download::DownloadManager;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::loader::ChapterLoader;
use crate::source::Source;

pub struct AppContext {
    pub config: Config,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub cache: Arc<ChapterCache>,
    pub downloads: Arc<DownloadManager>,
}

impl AppContext {
    /// Build from the user's config file. `workers` overrides
    /// `http.resolve_concurrency`.
    pub fn new(workers: Option<usize>) -> Result<Self> {
        let mut config = Config::load()?;
        if let Some(workers) = workers {
            config.http.resolve_concurrency = workers;
        }
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new(&config.http)?);
        let cache = Arc::new(ChapterCache::new(
            &config.cache_dir()?,
            config.cache.max_size_bytes(),
        )?);
        let downloads = Arc::new(DownloadManager::new(config.downloads_dir()?));

        Ok(Self {
            config,
            fetcher,
            cache,
            downloads,
        })
    }

    /// A chapter loader for `manga`, sharing this context's cache and
    /// downloads.
    pub fn chapter_loader(&self, manga: Manga, source: Arc<dyn Source>) -> ChapterLoader {
        ChapterLoader::new(
            self.downloads.clone(),
            manga,
            source,
            self.cache.clone(),
            self.config.http.clone(),
        )
    }
}
