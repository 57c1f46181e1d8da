use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::app::{ReaderError, Result};
use crate::domain::{Chapter, ChapterState, Page};
use crate::loader::ChapterLoader;
use crate::reader::chapter::LoadTicket;
use crate::reader::transition::{ChapterTransition, Direction};
use crate::reader::window::{PendingWindow, ViewerChapters};
use crate::reader::ReaderChapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerKind {
    /// One page at a time.
    Paged,
    /// Vertical strip; chapter edges are reached by scrolling.
    Continuous,
}

struct Position {
    index: usize,
    window: ViewerChapters,
    last_page: Option<usize>,
}

/// Reading state over an ordered list of chapters.
///
/// The session owns the three-chapter window, moves it when the reader
/// crosses into a neighbor and starts neighbor loads ahead of time. Windows
/// are published on a watch channel; while the viewer reports it is busy
/// the newest one waits in a pending slot.
pub struct ReaderSession {
    loader: ChapterLoader,
    chapters: Vec<Arc<ReaderChapter>>,
    position: Mutex<Position>,
    window: watch::Sender<ViewerChapters>,
    pending: PendingWindow,
    kind: ViewerKind,
    preload_threshold: usize,
}

impl ReaderSession {
    pub fn new(
        loader: ChapterLoader,
        chapters: Vec<Chapter>,
        start: usize,
        kind: ViewerKind,
        preload_threshold: usize,
    ) -> Result<Self> {
        if chapters.is_empty() {
            return Err(ReaderError::Other("No chapters to read".to_string()));
        }
        let chapters: Vec<_> = chapters.into_iter().map(ReaderChapter::new).collect();
        let index = start.min(chapters.len() - 1);
        let window = window_at(&chapters, index);
        window.ref_all();
        // The published current chapter is never left in Wait.
        loader.start_load(&window.curr);

        Ok(Self {
            loader,
            position: Mutex::new(Position {
                index,
                window: window.clone(),
                last_page: None,
            }),
            window: watch::Sender::new(window),
            chapters,
            pending: PendingWindow::default(),
            kind,
            preload_threshold,
        })
    }

    pub fn kind(&self) -> ViewerKind {
        self.kind
    }

    pub fn chapters(&self) -> &[Arc<ReaderChapter>] {
        &self.chapters
    }

    /// The window the session is working with, published or not.
    pub fn window(&self) -> ViewerChapters {
        self.lock().window.clone()
    }

    /// Windows as the viewer should render them.
    pub fn subscribe_window(&self) -> watch::Receiver<ViewerChapters> {
        self.window.subscribe()
    }

    pub fn prev_transition(&self) -> ChapterTransition {
        self.window().prev_transition()
    }

    pub fn next_transition(&self) -> ChapterTransition {
        self.window().next_transition()
    }

    pub async fn load_current(&self) -> ChapterState {
        let curr = self.window().curr;
        self.loader.load_chapter(&curr).await
    }

    /// React to the viewer landing on `page`. Records progress, follows the
    /// reader into a neighbor chapter, and returns the chapter whose
    /// preload this started, if any.
    pub async fn on_page_selected(&self, page: &Arc<Page>) -> Option<Arc<ReaderChapter>> {
        let chapter = page.chapter()?;
        let window = self.window();

        if !Arc::ptr_eq(&chapter, &window.curr) {
            if window.next.as_ref().is_some_and(|c| Arc::ptr_eq(c, &chapter)) {
                self.shift(Direction::Next, false);
            } else if window.prev.as_ref().is_some_and(|c| Arc::ptr_eq(c, &chapter)) {
                self.shift(Direction::Prev, false);
            } else {
                tracing::debug!("Ignoring page of {} outside the window", chapter.name());
                return None;
            }
        }

        let count = chapter.pages()?.len();
        let index = page.index();
        chapter.record_progress(index, count);

        let backwards = {
            let mut position = self.lock();
            let backwards = position.last_page.is_some_and(|last| index < last);
            position.last_page = Some(index);
            backwards
        };

        let window = self.window();
        let (near_end, near_start) = match self.kind {
            ViewerKind::Paged => (
                index + self.preload_threshold >= count,
                index < self.preload_threshold,
            ),
            ViewerKind::Continuous => (index + 1 == count, index == 0),
        };

        if near_end {
            if let Some(next) = &window.next {
                if self.preload(next) {
                    return Some(next.clone());
                }
            }
        }
        if near_start && backwards {
            if let Some(prev) = &window.prev {
                if self.preload(prev) {
                    return Some(prev.clone());
                }
            }
        }
        None
    }

    /// A transition marker came into view: warm up the chapter behind it.
    pub fn on_transition_selected(
        &self,
        transition: &ChapterTransition,
    ) -> Option<Arc<ReaderChapter>> {
        let to = transition.to()?;
        self.preload(to).then(|| to.clone())
    }

    /// Move the window one chapter forward and load the new current one.
    /// `None` when there is no next chapter.
    pub async fn next_chapter(&self) -> Option<ChapterState> {
        let curr = self.shift(Direction::Next, false)?;
        Some(self.loader.load_chapter(&curr).await)
    }

    /// Move the window one chapter back and open it at its last page.
    pub async fn previous_chapter(&self) -> Option<ChapterState> {
        let curr = self.shift(Direction::Prev, true)?;
        Some(self.loader.load_chapter(&curr).await)
    }

    /// Load a chapter again after it failed.
    pub async fn retry(&self, chapter: &Arc<ReaderChapter>) -> ChapterState {
        match chapter.state() {
            ChapterState::Error(_) | ChapterState::Wait => self.loader.load_chapter(chapter).await,
            state => state,
        }
    }

    /// The viewer stopped or started scrolling. Going idle publishes the
    /// window that was held back meanwhile.
    pub fn set_idle(&self, idle: bool) {
        self.pending.set_idle(idle, |window| {
            self.window.send_replace(window);
        });
    }

    /// Release every chapter of the current window.
    pub fn close(&self) {
        self.lock().window.unref_all();
    }

    /// Slide the window and start loading its new current chapter before
    /// anyone sees it. `open_at_end` opens that chapter on its last page.
    fn shift(&self, direction: Direction, open_at_end: bool) -> Option<Arc<ReaderChapter>> {
        let (old, new) = {
            let mut position = self.lock();
            let index = match direction {
                Direction::Next if position.index + 1 < self.chapters.len() => position.index + 1,
                Direction::Prev if position.index > 0 => position.index - 1,
                _ => return None,
            };
            let new = window_at(&self.chapters, index);
            new.ref_all();
            let old = std::mem::replace(&mut position.window, new.clone());
            position.index = index;
            position.last_page = None;
            (old, new)
        };
        old.unref_all();

        if open_at_end {
            new.curr.set_requested_page(usize::MAX);
        }
        self.loader.start_load(&new.curr);

        tracing::debug!("Moved to {}", new.curr.name());
        self.publish(new.clone());
        Some(new.curr)
    }

    fn publish(&self, window: ViewerChapters) {
        self.pending.offer(window, |window| {
            self.window.send_replace(window);
        });
    }

    /// Start loading `chapter` in the background if it hasn't been.
    fn preload(&self, chapter: &Arc<ReaderChapter>) -> bool {
        if !chapter.state().is_wait() {
            return false;
        }
        let started = matches!(self.loader.start_load(chapter), LoadTicket::Started(_));
        if started {
            tracing::debug!("Preloading {}", chapter.name());
        }
        started
    }

    fn lock(&self) -> MutexGuard<'_, Position> {
        self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn window_at(chapters: &[Arc<ReaderChapter>], index: usize) -> ViewerChapters {
    ViewerChapters::new(
        index.checked_sub(1).map(|i| chapters[i].clone()),
        chapters[index].clone(),
        chapters.get(index + 1).cloned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChapterCache;
    use crate::config::HttpConfig;
    use crate::download::DownloadManager;
    use crate::domain::Manga;
    use crate::source::LocalSource;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";

    struct Library {
        _dir: tempfile::TempDir,
        loader: ChapterLoader,
        chapters: Vec<Chapter>,
    }

    /// `chapters` directories of `pages` images each.
    fn library(chapters: usize, pages: usize) -> Library {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        std::fs::create_dir_all(root.join("Series")).unwrap();
        for c in 1..=chapters {
            let chapter_dir = root.join("Series").join(format!("Chapter {}", c));
            std::fs::create_dir_all(&chapter_dir).unwrap();
            for p in 1..=pages {
                std::fs::write(chapter_dir.join(format!("{:03}.png", p)), PNG).unwrap();
            }
        }

        let source = Arc::new(LocalSource::new(root));
        let manga: Manga = source.manga("Series");
        let chapters = source.chapters(&manga).unwrap();
        let loader = ChapterLoader::new(
            Arc::new(DownloadManager::new(dir.path().join("downloads"))),
            manga,
            source,
            Arc::new(ChapterCache::new(&dir.path().join("cache"), 1 << 20).unwrap()),
            HttpConfig::default(),
        );
        Library {
            _dir: dir,
            loader,
            chapters,
        }
    }

    fn session(lib: &Library, start: usize, kind: ViewerKind) -> ReaderSession {
        ReaderSession::new(lib.loader.clone(), lib.chapters.clone(), start, kind, 2).unwrap()
    }

    async fn settled(chapter: &Arc<ReaderChapter>) -> ChapterState {
        let mut rx = chapter.subscribe();
        let state = rx
            .wait_for(|s| s.is_loaded() || s.is_error())
            .await
            .unwrap()
            .clone();
        state
    }

    fn page(state: &ChapterState, index: usize) -> Arc<Page> {
        state.pages().unwrap()[index].clone()
    }

    #[tokio::test]
    async fn test_window_is_built_around_start() {
        let lib = library(3, 1);
        let session = session(&lib, 1, ViewerKind::Paged);
        let window = session.window();

        assert_eq!(window.curr.name(), "Chapter 2");
        assert_eq!(window.prev.as_ref().unwrap().name(), "Chapter 1");
        assert_eq!(window.next.as_ref().unwrap().name(), "Chapter 3");
        assert!(window.iter().all(|c| c.ref_count() == 1));
        assert!(window.next.as_ref().unwrap().state().is_wait());
    }

    #[tokio::test]
    async fn test_paged_preloads_next_near_the_end() {
        let lib = library(2, 6);
        let session = session(&lib, 0, ViewerKind::Paged);
        let state = session.load_current().await;

        assert!(session.on_page_selected(&page(&state, 1)).await.is_none());
        let preloaded = session.on_page_selected(&page(&state, 4)).await.unwrap();
        assert_eq!(preloaded.name(), "Chapter 2");
        assert!(settled(&preloaded).await.is_loaded());

        // Already loading or loaded: nothing new starts.
        assert!(session.on_page_selected(&page(&state, 5)).await.is_none());
        assert!(session.window().curr.chapter().read);
    }

    #[tokio::test]
    async fn test_paged_preloads_prev_when_moving_back() {
        let lib = library(2, 6);
        let session = session(&lib, 1, ViewerKind::Paged);
        let state = session.load_current().await;

        // Landing on the first page without moving back doesn't count.
        assert!(session.on_page_selected(&page(&state, 0)).await.is_none());
        assert!(session.on_page_selected(&page(&state, 3)).await.is_none());
        let preloaded = session.on_page_selected(&page(&state, 1)).await.unwrap();
        assert_eq!(preloaded.name(), "Chapter 1");
    }

    #[tokio::test]
    async fn test_continuous_preloads_at_last_page_only() {
        let lib = library(2, 4);
        let session = session(&lib, 0, ViewerKind::Continuous);
        let state = session.load_current().await;

        assert!(session.on_page_selected(&page(&state, 2)).await.is_none());
        assert!(session.on_page_selected(&page(&state, 3)).await.is_some());
    }

    #[tokio::test]
    async fn test_transition_selection_preloads_neighbor() {
        let lib = library(2, 1);
        let session = session(&lib, 1, ViewerKind::Continuous);
        session.load_current().await;

        let prev = session.prev_transition();
        assert_eq!(prev.direction(), Direction::Prev);
        let preloaded = session.on_transition_selected(&prev).unwrap();
        assert!(settled(&preloaded).await.is_loaded());

        assert!(session.on_transition_selected(&session.next_transition()).is_none());
        assert_eq!(
            session.next_transition().marker().to_string(),
            "Finished: Chapter 2\nThere is no next chapter"
        );
    }

    #[tokio::test]
    async fn test_next_chapter_recycles_chapter_that_left() {
        let lib = library(4, 2);
        let session = session(&lib, 1, ViewerKind::Paged);
        let first = session.window().prev.unwrap();
        lib.loader.load_chapter(&first).await;
        session.load_current().await;
        assert!(first.state().is_loaded());

        let state = session.next_chapter().await.unwrap();
        assert!(state.is_loaded());

        let window = session.window();
        assert_eq!(window.curr.name(), "Chapter 3");
        assert_eq!(window.prev.as_ref().unwrap().name(), "Chapter 2");
        assert!(window.prev.as_ref().unwrap().state().is_loaded());
        assert_eq!(first.ref_count(), 0);
        assert!(first.state().is_wait());
    }

    #[tokio::test]
    async fn test_previous_chapter_opens_at_last_page() {
        let lib = library(2, 5);
        let session = session(&lib, 1, ViewerKind::Paged);
        session.load_current().await;

        assert!(session.previous_chapter().await.unwrap().is_loaded());
        assert_eq!(session.window().curr.requested_page(), 4);
        assert!(session.previous_chapter().await.is_none());
    }

    #[tokio::test]
    async fn test_selecting_neighbor_page_moves_window() {
        let lib = library(3, 2);
        let session = session(&lib, 0, ViewerKind::Continuous);
        session.load_current().await;
        let next = session.window().next.unwrap();
        let state = lib.loader.load_chapter(&next).await;

        session.on_page_selected(&page(&state, 0)).await;
        assert!(Arc::ptr_eq(&session.window().curr, &next));
    }

    #[tokio::test]
    async fn test_busy_viewer_defers_window() {
        let lib = library(3, 1);
        let session = session(&lib, 0, ViewerKind::Paged);
        let rx = session.subscribe_window();

        session.set_idle(false);
        session.next_chapter().await;
        session.next_chapter().await;
        assert_eq!(rx.borrow().curr.name(), "Chapter 1");
        assert_eq!(session.window().curr.name(), "Chapter 3");

        session.set_idle(true);
        assert_eq!(rx.borrow().curr.name(), "Chapter 3");
    }

    #[tokio::test]
    async fn test_published_current_chapter_is_never_waiting() {
        let lib = library(3, 2);
        let session = session(&lib, 0, ViewerKind::Paged);
        let rx = session.subscribe_window();
        assert!(!rx.borrow().curr.state().is_wait());

        let curr = session.shift(Direction::Next, false).unwrap();
        assert_eq!(rx.borrow().curr.name(), "Chapter 2");
        assert!(!rx.borrow().curr.state().is_wait());
        assert!(settled(&curr).await.is_loaded());

        let prev = session.shift(Direction::Prev, true).unwrap();
        assert!(!rx.borrow().curr.state().is_wait());
        assert!(settled(&prev).await.is_loaded());
        assert_eq!(prev.requested_page(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let lib = library(1, 0);
        let session = session(&lib, 0, ViewerKind::Paged);
        let curr = session.window().curr;
        assert!(session.load_current().await.is_error());

        let dir = lib._dir.path().join("library/Series/Chapter 1");
        std::fs::write(dir.join("001.png"), PNG).unwrap();
        assert!(session.retry(&curr).await.is_loaded());
    }

    #[test]
    fn test_empty_chapter_list_is_rejected() {
        let lib = library(0, 0);
        assert!(ReaderSession::new(lib.loader.clone(), Vec::new(), 0, ViewerKind::Paged, 2).is_err());
    }
}
