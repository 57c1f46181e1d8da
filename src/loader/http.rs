use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::app::{ReaderError, Result};
use crate::cache::ChapterCache;
use crate::config::HttpConfig;
use crate::domain::{Chapter, Page, PageData, PageStatus};
use crate::fetcher::parallel::ParallelFetcher;
use crate::loader::{non_empty, PageLoader, RecycleFlag};
use crate::source::HttpSource;

/// Loader for chapters of a remote source.
///
/// The page list comes from the chapter cache when present. Pages are
/// resolved lazily: `get_page` queues the requested page plus the next
/// `preload_ahead` ones, and at most `resolve_concurrency` of them run at
/// once. A failed page affects nothing but itself.
pub struct HttpPageLoader {
    chapter: Chapter,
    source: Arc<dyn HttpSource>,
    cache: Arc<ChapterCache>,
    pool: ParallelFetcher,
    preload_ahead: usize,
    pages: Mutex<Vec<Arc<Page>>>,
    in_flight: Arc<Mutex<HashSet<usize>>>,
    recycled: Arc<RecycleFlag>,
}

impl HttpPageLoader {
    pub fn new(
        chapter: Chapter,
        source: Arc<dyn HttpSource>,
        cache: Arc<ChapterCache>,
        config: &HttpConfig,
    ) -> Self {
        Self {
            chapter,
            source,
            cache,
            pool: ParallelFetcher::with_workers(config.resolve_concurrency),
            preload_ahead: config.preload_ahead,
            pages: Mutex::new(Vec::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            recycled: Arc::new(RecycleFlag::default()),
        }
    }

    /// Start resolving `page` unless it is already ready or running.
    fn enqueue(&self, page: &Arc<Page>) {
        if !matches!(page.status(), PageStatus::Queued | PageStatus::Error) {
            return;
        }
        if !lock(&self.in_flight).insert(page.index()) {
            return;
        }
        // recycle() may have run since get_page looked at the flag.
        if self.recycled.is_recycled() {
            lock(&self.in_flight).remove(&page.index());
            page.set_status(PageStatus::Error);
            return;
        }
        if page.status() == PageStatus::Error {
            page.set_status(PageStatus::Queued);
        }

        let source = self.source.clone();
        let cache = self.cache.clone();
        let recycled = self.recycled.clone();
        let in_flight = self.in_flight.clone();
        let task_page = page.clone();

        let handle = self.pool.spawn(async move {
            let page = task_page;
            let result = resolve_page(&*source, &cache, &page, &recycled).await;
            // Leave the set before publishing so a retry right after an
            // Error can queue the page again.
            lock(&in_flight).remove(&page.index());

            match result.and_then(|path| recycled.check().map(|_| path)) {
                Ok(path) => {
                    page.set_data(PageData::File(path));
                    page.set_status(PageStatus::Ready);
                }
                Err(ReaderError::Recycled) => {
                    tracing::debug!("Dropped page {} of a recycled chapter", page.number());
                    page.set_status(PageStatus::Error);
                }
                Err(e) => {
                    tracing::warn!("Page {} failed: {}", page.number(), e);
                    page.set_status(PageStatus::Error);
                }
            }
        });

        // A closed pool never runs the task, so settle the page here.
        let in_flight = self.in_flight.clone();
        let page = page.clone();
        tokio::spawn(async move {
            if !matches!(handle.await, Ok(Some(()))) {
                lock(&in_flight).remove(&page.index());
                page.set_status(PageStatus::Error);
            }
        });
    }

    fn following(&self, index: usize) -> Vec<Arc<Page>> {
        lock(&self.pages)
            .iter()
            .skip(index + 1)
            .take(self.preload_ahead)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>> {
        self.recycled.check()?;
        let key = ChapterCache::cache_key(self.source.id(), &self.chapter.url);

        let remote = match self.cache.get_page_list_from_cache(&key) {
            Some(pages) => {
                tracing::debug!("Page list of {} served from cache", self.chapter.name);
                pages
            }
            None => {
                let pages = self.source.fetch_page_list(&self.chapter).await?;
                if !pages.is_empty() {
                    if let Err(e) = self.cache.put_page_list_to_cache(&key, &pages) {
                        tracing::warn!("Failed to cache page list of {}: {}", self.chapter.name, e);
                    }
                }
                pages
            }
        };
        self.recycled.check()?;

        let pages: Vec<Arc<Page>> = remote
            .into_iter()
            .enumerate()
            .map(|(index, mut remote)| {
                remote.index = index;
                Arc::new(remote.into_page())
            })
            .collect();

        *lock(&self.pages) = pages.clone();
        non_empty(pages)
    }

    async fn get_page(&self, page: &Arc<Page>) -> PageStatus {
        if self.recycled.is_recycled() {
            return PageStatus::Error;
        }

        self.enqueue(page);
        for next in self.following(page.index()) {
            self.enqueue(&next);
        }

        let mut rx = page.subscribe_status();
        let status = match rx.wait_for(|s| s.is_settled()).await {
            Ok(status) => *status,
            Err(_) => PageStatus::Error,
        };

        if self.recycled.is_recycled() {
            PageStatus::Error
        } else {
            status
        }
    }

    async fn retry_page(&self, page: &Arc<Page>) {
        if !self.recycled.is_recycled() && page.status() == PageStatus::Error {
            self.enqueue(page);
        }
    }

    fn recycle(&self) {
        if !self.recycled.recycle() {
            return;
        }
        self.pool.close();
        // Wake anyone still waiting on an unfinished page.
        for page in lock(&self.pages).iter() {
            if !page.status().is_settled() {
                page.set_status(PageStatus::Error);
            }
        }
        tracing::debug!("Recycled http loader of {}", self.chapter.name);
    }

    fn is_recycled(&self) -> bool {
        self.recycled.is_recycled()
    }
}

/// Resolve the image url if unknown and download it unless cached.
/// Returns the cached image path.
async fn resolve_page(
    source: &dyn HttpSource,
    cache: &Arc<ChapterCache>,
    page: &Arc<Page>,
    recycled: &RecycleFlag,
) -> Result<PathBuf> {
    recycled.check()?;

    if page.image_url().is_none() {
        page.set_status(PageStatus::Resolving);
        let image_url = source.fetch_image_url(page).await?;
        recycled.check()?;
        page.set_image_url(Some(image_url));
    }

    let image_url = page
        .image_url()
        .ok_or_else(|| ReaderError::Other(format!("Page {} has no image url", page.number())))?;

    let path = if cache.is_image_in_cache(&image_url) {
        cache.get_image_path(&image_url)
    } else {
        page.set_status(PageStatus::Downloading);
        let bytes = source.fetch_image(page).await?;
        recycled.check()?;
        let cache = cache.clone();
        tokio::task::spawn_blocking(move || cache.put_image(&image_url, &bytes)).await??
    };

    Ok(path)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
