use std::sync::Arc;

use crate::app::{ReaderError, Result};
use crate::cache::ChapterCache;
use crate::config::HttpConfig;
use crate::domain::{Chapter, ChapterState, Manga, Page};
use crate::download::DownloadManager;
use crate::loader::{
    DirectoryPageLoader, DownloadPageLoader, EpubPageLoader, HttpPageLoader, PageLoader,
    RarPageLoader, ZipPageLoader,
};
use crate::reader::chapter::LoadTicket;
use crate::reader::ReaderChapter;
use crate::source::{LocalFormat, Source};

/// Picks a page loader for each chapter of one manga and runs its load.
#[derive(Clone)]
pub struct ChapterLoader {
    download_manager: Arc<DownloadManager>,
    manga: Manga,
    source: Arc<dyn Source>,
    cache: Arc<ChapterCache>,
    http: HttpConfig,
}

impl ChapterLoader {
    pub fn new(
        download_manager: Arc<DownloadManager>,
        manga: Manga,
        source: Arc<dyn Source>,
        cache: Arc<ChapterCache>,
        http: HttpConfig,
    ) -> Self {
        Self {
            download_manager,
            manga,
            source,
            cache,
            http,
        }
    }

    pub fn manga(&self) -> &Manga {
        &self.manga
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    /// Load `chapter` and return the state it settled in.
    ///
    /// Concurrent calls share one load: pages are listed once and every
    /// caller waits for the same result.
    /// Failures come back as `ChapterState::Error`.
    pub async fn load_chapter(&self, chapter: &Arc<ReaderChapter>) -> ChapterState {
        let mut rx = chapter.subscribe();
        if let LoadTicket::Settled(state) = self.start_load(chapter) {
            return state;
        }
        let settled = match rx.wait_for(|s| !s.is_loading()).await {
            Ok(state) => state.clone(),
            Err(_) => chapter.state(),
        };
        settled
    }

    /// Move `chapter` to Loading and run the load on its own task.
    ///
    /// The state flips before this returns. The task settles the chapter
    /// even if nobody awaits it.
    pub(crate) fn start_load(&self, chapter: &Arc<ReaderChapter>) -> LoadTicket {
        let generation = match chapter.begin_load() {
            LoadTicket::Started(generation) => generation,
            other => return other,
        };

        let meta = chapter.chapter();
        tracing::info!("Loading {} ({})", meta.name, self.source.name());

        let this = self.clone();
        let chapter = chapter.clone();
        tokio::spawn(async move {
            match tokio::spawn(this.open_and_list(meta)).await {
                Ok(Ok((loader, pages))) => {
                    tracing::debug!(
                        "{} loader listed {} pages for {}",
                        loader.name(),
                        pages.len(),
                        chapter.name()
                    );
                    chapter.finish_load(generation, loader, pages);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Failed to load {}: {}", chapter.name(), e);
                    chapter.fail_load(generation, e);
                }
                Err(e) => {
                    tracing::error!("Load task of {} failed: {}", chapter.name(), e);
                    chapter.fail_load(generation, ReaderError::from(e));
                }
            }
        });

        LoadTicket::Started(generation)
    }

    async fn open_and_list(self, chapter: Chapter) -> Result<(Arc<dyn PageLoader>, Vec<Arc<Page>>)> {
        let selector = self.clone();
        let loader = tokio::task::spawn_blocking(move || selector.select_loader(&chapter)).await??;

        match loader.get_pages().await {
            Ok(pages) => Ok((loader, pages)),
            Err(e) => {
                loader.recycle();
                Err(e)
            }
        }
    }

    /// First match wins: downloaded copy, remote source, local library.
    fn select_loader(&self, chapter: &Chapter) -> Result<Arc<dyn PageLoader>> {
        if self.download_manager.is_chapter_downloaded(chapter, &self.manga) {
            let dir = self.download_manager.chapter_dir(&self.manga, chapter);
            return Ok(Arc::new(DownloadPageLoader::new(
                self.download_manager.clone(),
                dir,
            )));
        }

        if let Some(http) = self.source.clone().as_http() {
            return Ok(Arc::new(HttpPageLoader::new(
                chapter.clone(),
                http,
                self.cache.clone(),
                &self.http,
            )));
        }

        if let Some(local) = self.source.as_local() {
            let loader: Arc<dyn PageLoader> = match local.format(chapter)? {
                LocalFormat::Directory(dir) => Arc::new(DirectoryPageLoader::new(dir)),
                LocalFormat::Zip(path) => Arc::new(ZipPageLoader::open(&path)?),
                LocalFormat::Rar(path) => Arc::new(RarPageLoader::open(&path)?),
                LocalFormat::Epub(path) => Arc::new(EpubPageLoader::open(&path)?),
            };
            return Ok(loader);
        }

        Err(ReaderError::LoaderNotImplemented(self.source.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::archive::tests::{write_zip, JPG, PNG};
    use crate::loader::http::tests::FakeSource;
    use crate::source::LocalSource;
    use std::sync::atomic::Ordering;

    struct Unknown;

    impl Source for Unknown {
        fn id(&self) -> i64 {
            99
        }

        fn name(&self) -> &str {
            "Unknown"
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        library: std::path::PathBuf,
        downloads: Arc<DownloadManager>,
        cache: Arc<ChapterCache>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let library = dir.path().join("library");
            std::fs::create_dir_all(library.join("Series")).unwrap();
            let downloads = Arc::new(DownloadManager::new(dir.path().join("downloads")));
            let cache = Arc::new(ChapterCache::new(&dir.path().join("cache"), 1 << 20).unwrap());
            Self {
                _dir: dir,
                library,
                downloads,
                cache,
            }
        }

        fn loader(&self, source: Arc<dyn Source>) -> ChapterLoader {
            let manga = Manga::new(source.id(), "Series".into(), "Series".into());
            ChapterLoader::new(
                self.downloads.clone(),
                manga,
                source,
                self.cache.clone(),
                HttpConfig::default(),
            )
        }

        fn local(&self) -> ChapterLoader {
            self.loader(Arc::new(LocalSource::new(self.library.clone())))
        }

        fn image_dir(&self, name: &str, count: usize) -> Chapter {
            let dir = self.library.join("Series").join(name);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 1..=count {
                std::fs::write(dir.join(format!("{}.png", i)), PNG).unwrap();
            }
            Chapter::new(format!("Series/{}", name), name.to_string())
        }
    }

    #[tokio::test]
    async fn test_concurrent_loads_list_pages_once() {
        let fixture = Fixture::new();
        let source = Arc::new(FakeSource::new(3));
        let loader = fixture.loader(source.clone());
        let chapter = ReaderChapter::new(Chapter::new("/c/1".into(), "Chapter 1".into()));

        let (a, b) = tokio::join!(loader.load_chapter(&chapter), loader.load_chapter(&chapter));

        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.pages().unwrap().len(), 3);
        assert_eq!(b.pages().unwrap().len(), 3);
        assert!(Arc::ptr_eq(&a.pages().unwrap()[0], &b.pages().unwrap()[0]));
    }

    #[tokio::test]
    async fn test_loaded_chapter_returns_immediately() {
        let fixture = Fixture::new();
        let source = Arc::new(FakeSource::new(2));
        let loader = fixture.loader(source.clone());
        let chapter = ReaderChapter::new(Chapter::new("/c/1".into(), "Chapter 1".into()));

        assert!(loader.load_chapter(&chapter).await.is_loaded());
        assert!(loader.load_chapter(&chapter).await.is_loaded());
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_directory_resumes_at_last_page_read() {
        let fixture = Fixture::new();
        let mut meta = fixture.image_dir("Chapter 1", 8);
        meta.last_page_read = 5;
        let chapter = ReaderChapter::new(meta);

        let state = fixture.local().load_chapter(&chapter).await;

        let pages = state.pages().unwrap();
        assert_eq!(pages.len(), 8);
        assert_eq!(chapter.requested_page(), 5);
        assert!(Arc::ptr_eq(&pages[0].chapter().unwrap(), &chapter));
        assert_eq!(chapter.loader().unwrap().name(), "directory");
    }

    #[tokio::test]
    async fn test_local_zip_chapter() {
        let fixture = Fixture::new();
        write_zip(
            &fixture.library.join("Series").join("Chapter 2.cbz"),
            &[("page10.jpg", JPG), ("page2.jpg", JPG), ("page1.jpg", JPG)],
        );
        let chapter = ReaderChapter::new(Chapter::new(
            "Series/Chapter 2.cbz".into(),
            "Chapter 2".into(),
        ));

        let state = fixture.local().load_chapter(&chapter).await;

        let names: Vec<_> = state
            .pages()
            .unwrap()
            .iter()
            .map(|p| p.image_url().unwrap())
            .collect();
        assert_eq!(names, vec!["page1.jpg", "page2.jpg", "page10.jpg"]);
        assert_eq!(chapter.loader().unwrap().name(), "zip");
    }

    #[tokio::test]
    async fn test_empty_chapter_is_error_not_loaded() {
        let fixture = Fixture::new();
        let chapter = ReaderChapter::new(fixture.image_dir("Chapter 3", 0));

        let state = fixture.local().load_chapter(&chapter).await;

        assert!(matches!(
            state.error().map(|e| &**e),
            Some(ReaderError::EmptyPageList)
        ));
        assert!(chapter.loader().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_local_format() {
        let fixture = Fixture::new();
        let path = fixture.library.join("Series").join("Chapter 4.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let chapter = ReaderChapter::new(Chapter::new(
            "Series/Chapter 4.pdf".into(),
            "Chapter 4".into(),
        ));

        let state = fixture.local().load_chapter(&chapter).await;
        let err = state.error().unwrap();
        assert!(matches!(**err, ReaderError::UnsupportedFormat(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_source_without_loader() {
        let fixture = Fixture::new();
        let chapter = ReaderChapter::new(Chapter::new("/c/1".into(), "Chapter 1".into()));

        let state = fixture.loader(Arc::new(Unknown)).load_chapter(&chapter).await;
        assert!(matches!(
            state.error().map(|e| &**e),
            Some(ReaderError::LoaderNotImplemented(_))
        ));
    }

    #[tokio::test]
    async fn test_downloaded_copy_wins_over_source() {
        let fixture = Fixture::new();
        let source = Arc::new(FakeSource::new(2));
        let loader = fixture.loader(source.clone());
        let meta = Chapter::new("/c/1".into(), "Chapter 1".into());

        let dir = fixture.downloads.chapter_dir(loader.manga(), &meta);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("001.png"), PNG).unwrap();

        let chapter = ReaderChapter::new(meta);
        let state = loader.load_chapter(&chapter).await;

        assert_eq!(state.pages().unwrap().len(), 1);
        assert_eq!(chapter.loader().unwrap().name(), "download");
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_state_can_be_retried() {
        let fixture = Fixture::new();
        let chapter = ReaderChapter::new(fixture.image_dir("Chapter 5", 0));
        let loader = fixture.local();
        assert!(loader.load_chapter(&chapter).await.is_error());

        std::fs::write(
            fixture.library.join("Series").join("Chapter 5").join("1.png"),
            PNG,
        )
        .unwrap();
        assert!(loader.load_chapter(&chapter).await.is_loaded());
    }

    #[tokio::test]
    async fn test_recycle_during_load_discards_result() {
        let fixture = Fixture::new();
        let source = Arc::new(FakeSource::new(2));
        let loader = fixture.loader(source.clone());
        let chapter = ReaderChapter::new(Chapter::new("/c/1".into(), "Chapter 1".into()));

        let pending = {
            let loader = loader.clone();
            let chapter = chapter.clone();
            tokio::spawn(async move { loader.load_chapter(&chapter).await })
        };
        let mut rx = chapter.subscribe();
        rx.wait_for(|s| s.is_loading()).await.unwrap();
        chapter.recycle();

        let state = pending.await.unwrap();
        assert!(state.is_wait());
        assert!(chapter.state().is_wait());
        assert!(chapter.loader().is_none());
    }

    #[tokio::test]
    async fn test_dropped_caller_still_settles_chapter() {
        let fixture = Fixture::new();
        let source = Arc::new(FakeSource::new(2));
        let loader = fixture.loader(source.clone());
        let chapter = ReaderChapter::new(Chapter::new("/c/1".into(), "Chapter 1".into()));

        let first = tokio::time::timeout(
            std::time::Duration::from_millis(2),
            loader.load_chapter(&chapter),
        )
        .await;
        assert!(first.is_err());
        assert!(chapter.state().is_loading());

        let mut rx = chapter.subscribe();
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            rx.wait_for(|s| !s.is_loading()),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(chapter.state().is_loaded());

        let second = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            loader.load_chapter(&chapter),
        )
        .await
        .unwrap();
        assert_eq!(second.pages().unwrap().len(), 2);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
    }
}
