use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::reader::transition::{ChapterTransition, Direction};
use crate::reader::ReaderChapter;

/// The chapters a viewer holds at once: the one being read and its
/// neighbors.
#[derive(Debug, Clone)]
pub struct ViewerChapters {
    pub prev: Option<Arc<ReaderChapter>>,
    pub curr: Arc<ReaderChapter>,
    pub next: Option<Arc<ReaderChapter>>,
}

impl ViewerChapters {
    pub fn new(
        prev: Option<Arc<ReaderChapter>>,
        curr: Arc<ReaderChapter>,
        next: Option<Arc<ReaderChapter>>,
    ) -> Self {
        Self { prev, curr, next }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ReaderChapter>> {
        self.prev
            .iter()
            .chain(std::iter::once(&self.curr))
            .chain(self.next.iter())
    }

    pub fn contains(&self, chapter: &Arc<ReaderChapter>) -> bool {
        self.iter().any(|c| Arc::ptr_eq(c, chapter))
    }

    pub fn ref_all(&self) {
        for chapter in self.iter() {
            chapter.ref_chapter();
        }
    }

    pub fn unref_all(&self) {
        for chapter in self.iter() {
            chapter.unref_chapter();
        }
    }

    pub fn prev_transition(&self) -> ChapterTransition {
        ChapterTransition::new(Direction::Prev, self.curr.clone(), self.prev.clone())
    }

    pub fn next_transition(&self) -> ChapterTransition {
        ChapterTransition::new(Direction::Next, self.curr.clone(), self.next.clone())
    }
}

/// Holds the newest window until the viewer is idle. Each window offered
/// while busy replaces whatever was waiting.
///
/// The idle flag and the slot share one lock, and windows are handed out
/// while it is held, so a window can't be parked after the idle edge that
/// should have flushed it.
#[derive(Debug)]
pub struct PendingWindow {
    inner: Mutex<Slot>,
}

#[derive(Debug)]
struct Slot {
    idle: bool,
    window: Option<ViewerChapters>,
}

impl PendingWindow {
    /// Pass `window` to `publish` right away when idle, otherwise park it.
    pub fn offer(&self, window: ViewerChapters, publish: impl FnOnce(ViewerChapters)) {
        let mut slot = self.lock();
        if slot.idle {
            publish(window);
        } else {
            slot.window = Some(window);
        }
    }

    /// Going idle hands the parked window, if any, to `publish`.
    pub fn set_idle(&self, idle: bool, publish: impl FnOnce(ViewerChapters)) {
        let mut slot = self.lock();
        slot.idle = idle;
        if idle {
            if let Some(window) = slot.window.take() {
                publish(window);
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.lock().idle
    }

    pub fn is_pending(&self) -> bool {
        self.lock().window.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PendingWindow {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Slot {
                idle: true,
                window: None,
            }),
        }
    }
}
