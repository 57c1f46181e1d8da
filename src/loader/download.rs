use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::Result;
use crate::domain::{Page, PageStatus};
use crate::download::DownloadManager;
use crate::loader::{local_page_status, non_empty, PageLoader, RecycleFlag};

/// Loader for chapters the download manager already stored on disk.
pub struct DownloadPageLoader {
    manager: Arc<DownloadManager>,
    chapter_dir: PathBuf,
    recycled: RecycleFlag,
}

impl DownloadPageLoader {
    pub fn new(manager: Arc<DownloadManager>, chapter_dir: PathBuf) -> Self {
        Self {
            manager,
            chapter_dir,
            recycled: RecycleFlag::default(),
        }
    }
}

#[async_trait]
impl PageLoader for DownloadPageLoader {
    fn name(&self) -> &'static str {
        "download"
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>> {
        self.recycled.check()?;
        let manager = self.manager.clone();
        let dir = self.chapter_dir.clone();
        let pages = tokio::task::spawn_blocking(move || manager.build_page_list(&dir)).await??;
        non_empty(pages)
    }

    async fn get_page(&self, _page: &Arc<Page>) -> PageStatus {
        local_page_status(&self.recycled)
    }

    fn recycle(&self) {
        self.recycled.recycle();
    }

    fn is_recycled(&self) -> bool {
        self.recycled.is_recycled()
    }
}
