use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::app::ReaderError;
use crate::domain::{Chapter, ChapterState, Page, PageStatus};
use crate::loader::PageLoader;

/// Outcome of trying to start a load.
pub(crate) enum LoadTicket {
    /// This caller flipped the state to Loading and must finish the load.
    Started(u64),
    /// Another load is running.
    InFlight,
    /// Nothing to do.
    Settled(ChapterState),
}

/// A chapter as the reader sees it: library metadata plus the volatile
/// load state, the loader serving it, and how many windows hold it.
pub struct ReaderChapter {
    chapter: Mutex<Chapter>,
    state: watch::Sender<ChapterState>,
    loader: Mutex<Option<Arc<dyn PageLoader>>>,
    requested_page: Mutex<Option<usize>>,
    refs: AtomicUsize,
    generation: AtomicU64,
}

impl ReaderChapter {
    pub fn new(chapter: Chapter) -> Arc<Self> {
        Arc::new(Self {
            chapter: Mutex::new(chapter),
            state: watch::Sender::new(ChapterState::Wait),
            loader: Mutex::new(None),
            requested_page: Mutex::new(None),
            refs: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        })
    }

    /// Snapshot of the chapter metadata.
    pub fn chapter(&self) -> Chapter {
        lock(&self.chapter).clone()
    }

    pub fn name(&self) -> String {
        lock(&self.chapter).name.clone()
    }

    pub fn state(&self) -> ChapterState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChapterState> {
        self.state.subscribe()
    }

    pub fn pages(&self) -> Option<Arc<[Arc<Page>]>> {
        self.state.borrow().pages().cloned()
    }

    pub fn loader(&self) -> Option<Arc<dyn PageLoader>> {
        lock(&self.loader).clone()
    }

    /// Page the viewer should open at. Resolved to a valid index once the
    /// chapter is loaded.
    pub fn requested_page(&self) -> usize {
        lock(&self.requested_page).unwrap_or(0)
    }

    /// Clamped to the page count once loaded.
    pub fn set_requested_page(&self, index: usize) {
        let index = match self.pages() {
            Some(pages) => index.min(pages.len().saturating_sub(1)),
            None => index,
        };
        *lock(&self.requested_page) = Some(index);
    }

    /// Drive one page through this chapter's loader.
    pub async fn load_page(&self, page: &Arc<Page>) -> PageStatus {
        match self.loader() {
            Some(loader) => loader.get_page(page).await,
            None => PageStatus::Error,
        }
    }

    pub async fn retry_page(&self, page: &Arc<Page>) {
        if let Some(loader) = self.loader() {
            loader.retry_page(page).await;
        }
    }

    /// Remember the page being read; the last page marks the chapter read.
    pub fn record_progress(&self, index: usize, page_count: usize) {
        let mut chapter = lock(&self.chapter);
        chapter.last_page_read = index;
        if page_count > 0 && index + 1 >= page_count && !chapter.read {
            chapter.read = true;
            tracing::debug!("Marked {} as read", chapter.name);
        }
    }

    pub fn ref_chapter(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one reference; the last one recycles the chapter.
    pub fn unref_chapter(&self) {
        let previous = self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.recycle();
        }
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Close the loader, forget the pages and go back to Wait. A load that
    /// is still running will have its result discarded.
    pub fn recycle(&self) {
        let loader = {
            let mut slot = lock(&self.loader);
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.state.send_replace(ChapterState::Wait);
            slot.take()
        };
        if let Some(loader) = loader {
            tracing::debug!("Recycling {} loader of {}", loader.name(), self.name());
            loader.recycle();
        }
    }

    /// Swap Wait or Error to Loading in one step.
    pub(crate) fn begin_load(&self) -> LoadTicket {
        let slot = lock(&self.loader);
        let started = self.state.send_if_modified(|state| match state {
            ChapterState::Wait | ChapterState::Error(_) => {
                *state = ChapterState::Loading;
                true
            }
            _ => false,
        });
        if started {
            return LoadTicket::Started(self.generation.load(Ordering::SeqCst));
        }
        drop(slot);

        match self.state() {
            ChapterState::Loading => LoadTicket::InFlight,
            state => LoadTicket::Settled(state),
        }
    }

    /// Publish a finished load unless the chapter was recycled after it
    /// began, in which case the loader is closed and nothing changes.
    pub(crate) fn finish_load(
        self: &Arc<Self>,
        generation: u64,
        loader: Arc<dyn PageLoader>,
        pages: Vec<Arc<Page>>,
    ) -> ChapterState {
        let mut slot = lock(&self.loader);
        if self.generation.load(Ordering::SeqCst) != generation {
            drop(slot);
            tracing::debug!("Discarding stale load of {}", self.name());
            loader.recycle();
            return self.state();
        }

        for page in &pages {
            page.attach_chapter(self);
        }

        let start = self.start_page(pages.len());
        *lock(&self.requested_page) = Some(start);
        *slot = Some(loader);

        let state = ChapterState::Loaded(pages.into());
        self.state.send_replace(state.clone());
        state
    }

    pub(crate) fn fail_load(&self, generation: u64, error: ReaderError) -> ChapterState {
        let _slot = lock(&self.loader);
        if self.generation.load(Ordering::SeqCst) != generation {
            return self.state();
        }
        let state = ChapterState::Error(Arc::new(error));
        self.state.send_replace(state.clone());
        state
    }

    /// Resume where an unfinished chapter was left, otherwise open at the
    /// requested page.
    fn start_page(&self, page_count: usize) -> usize {
        let chapter = lock(&self.chapter);
        let page = if chapter.is_partially_read() {
            chapter.last_page_read
        } else {
            lock(&self.requested_page).unwrap_or(0)
        };
        page.min(page_count.saturating_sub(1))
    }
}

impl Drop for ReaderChapter {
    fn drop(&mut self) {
        let slot = self.loader.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(loader) = slot.take() {
            loader.recycle();
        }
    }
}

impl fmt::Debug for ReaderChapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderChapter")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("refs", &self.ref_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
