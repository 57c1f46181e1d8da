//! Page loaders turn one chapter into its ordered list of pages.
//!
//! ```text
//! ChapterLoader ─┬─ DownloadPageLoader   (chapter already on disk)
//!                ├─ HttpPageLoader       (remote source)
//!                └─ local library ─┬─ DirectoryPageLoader
//!                                  ├─ ZipPageLoader   (.zip / .cbz)
//!                                  ├─ RarPageLoader   (.rar / .cbr)
//!                                  └─ EpubPageLoader
//! ```

pub mod archive;
pub mod chapter_loader;
pub mod directory;
pub mod download;
pub mod epub;
pub mod http;
pub mod image;
pub mod rar;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::{ReaderError, Result};
use crate::domain::{Page, PageStatus};

pub use archive::ZipPageLoader;
pub use chapter_loader::ChapterLoader;
pub use directory::DirectoryPageLoader;
pub use download::DownloadPageLoader;
pub use epub::EpubPageLoader;
pub use http::HttpPageLoader;
pub use rar::RarPageLoader;

#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Enumerate the chapter's pages. Called once per chapter load.
    async fn get_pages(&self) -> Result<Vec<Arc<Page>>>;

    /// Bring one page to Ready (or Error) and return where it ended up.
    async fn get_page(&self, page: &Arc<Page>) -> PageStatus;

    /// Fetch a failed page again. Loaders whose pages can't fail ignore it.
    async fn retry_page(&self, _page: &Arc<Page>) {}

    /// Release the underlying handle. Safe to call more than once.
    fn recycle(&self);

    fn is_recycled(&self) -> bool;
}

/// One-way switch flipped by `recycle`.
#[derive(Debug, Default)]
pub struct RecycleFlag(AtomicBool);

impl RecycleFlag {
    /// Returns true only for the call that flipped the flag.
    pub fn recycle(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_recycled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_recycled() {
            Err(ReaderError::Recycled)
        } else {
            Ok(())
        }
    }
}

/// Status for pages whose bytes are local: ready unless the loader is gone.
pub(crate) fn local_page_status(flag: &RecycleFlag) -> PageStatus {
    if flag.is_recycled() {
        PageStatus::Error
    } else {
        PageStatus::Ready
    }
}

/// An empty page list is a failed load, never an empty chapter.
pub(crate) fn non_empty(pages: Vec<Arc<Page>>) -> Result<Vec<Arc<Page>>> {
    if pages.is_empty() {
        Err(ReaderError::EmptyPageList)
    } else {
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recycle_flag_flips_once() {
        let flag = RecycleFlag::default();
        assert!(!flag.is_recycled());
        assert!(flag.check().is_ok());
        assert!(flag.recycle());
        assert!(!flag.recycle());
        assert!(flag.is_recycled());
        assert!(matches!(flag.check(), Err(ReaderError::Recycled)));
    }

    #[test]
    fn test_local_page_status() {
        let flag = RecycleFlag::default();
        assert_eq!(local_page_status(&flag), PageStatus::Ready);
        flag.recycle();
        assert_eq!(local_page_status(&flag), PageStatus::Error);
    }

    #[test]
    fn test_non_empty_rejects_empty() {
        assert!(matches!(non_empty(Vec::new()), Err(ReaderError::EmptyPageList)));
        let pages = vec![Arc::new(Page::new(0, None, None))];
        assert_eq!(non_empty(pages).unwrap().len(), 1);
    }
}
