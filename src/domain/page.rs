use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use tokio::sync::watch;

use crate::app::{ReaderError, Result};
use crate::reader::ReaderChapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Queued,
    Resolving,
    Downloading,
    Ready,
    Error,
}

impl PageStatus {
    /// Ready and Error end a `get_page` call.
    pub fn is_settled(self) -> bool {
        matches!(self, PageStatus::Ready | PageStatus::Error)
    }
}

/// Reads a single named entry out of an open container.
pub trait EntryReader: Send + Sync {
    fn read_entry(&self, name: &str) -> Result<Vec<u8>>;
}

/// Where a ready page's bytes come from.
#[derive(Clone)]
pub enum PageData {
    File(PathBuf),
    Entry {
        reader: Arc<dyn EntryReader>,
        name: String,
    },
}

impl PageData {
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            PageData::File(path) => Ok(std::fs::read(path)?),
            PageData::Entry { reader, name } => reader.read_entry(name),
        }
    }
}

impl fmt::Debug for PageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageData::File(path) => f.debug_tuple("File").field(path).finish(),
            PageData::Entry { name, .. } => f.debug_struct("Entry").field("name", name).finish(),
        }
    }
}

pub struct Page {
    index: usize,
    url: Option<String>,
    image_url: Mutex<Option<String>>,
    status: watch::Sender<PageStatus>,
    data: Mutex<Option<PageData>>,
    chapter: OnceLock<Weak<ReaderChapter>>,
}

impl Page {
    pub fn new(index: usize, url: Option<String>, image_url: Option<String>) -> Self {
        Self {
            index,
            url,
            image_url: Mutex::new(image_url),
            status: watch::Sender::new(PageStatus::Queued),
            data: Mutex::new(None),
            chapter: OnceLock::new(),
        }
    }

    /// A page whose bytes are already at hand.
    pub fn ready(index: usize, image_url: Option<String>, data: PageData) -> Self {
        let page = Self::new(index, None, image_url);
        page.set_data(data);
        page.set_status(PageStatus::Ready);
        page
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based page number for display.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn image_url(&self) -> Option<String> {
        lock(&self.image_url).clone()
    }

    pub fn set_image_url(&self, url: Option<String>) {
        *lock(&self.image_url) = url;
    }

    pub fn status(&self) -> PageStatus {
        *self.status.borrow()
    }

    pub fn set_status(&self, status: PageStatus) {
        self.status.send_replace(status);
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PageStatus> {
        self.status.subscribe()
    }

    pub fn data(&self) -> Option<PageData> {
        lock(&self.data).clone()
    }

    pub fn set_data(&self, data: PageData) {
        *lock(&self.data) = Some(data);
    }

    /// Owning chapter, if it is still alive.
    pub fn chapter(&self) -> Option<Arc<ReaderChapter>> {
        self.chapter.get().and_then(Weak::upgrade)
    }

    pub(crate) fn attach_chapter(&self, chapter: &Arc<ReaderChapter>) {
        let _ = self.chapter.set(Arc::downgrade(chapter));
    }

    /// Read the page's bytes off the async runtime.
    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        if self.status() != PageStatus::Ready {
            return Err(ReaderError::Other(format!(
                "Page {} is not ready",
                self.number()
            )));
        }
        let data = self
            .data()
            .ok_or_else(|| ReaderError::Other(format!("Page {} has no data", self.number())))?;
        tokio::task::spawn_blocking(move || data.read()).await?
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("url", &self.url)
            .field("image_url", &self.image_url())
            .field("status", &self.status())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
