use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::Result;
use crate::domain::{Page, PageData, PageStatus};
use crate::loader::image::{natural_cmp, sniff_file};
use crate::loader::{local_page_status, non_empty, PageLoader, RecycleFlag};

/// Loader for a chapter stored as a plain folder of images.
pub struct DirectoryPageLoader {
    dir: PathBuf,
    recycled: RecycleFlag,
}

impl DirectoryPageLoader {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            recycled: RecycleFlag::default(),
        }
    }
}

#[async_trait]
impl PageLoader for DirectoryPageLoader {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>> {
        self.recycled.check()?;
        let dir = self.dir.clone();
        let files = tokio::task::spawn_blocking(move || list_image_files(&dir)).await??;
        non_empty(pages_from_files(files))
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

/// Regular files in `dir` whose content sniffs as an image, in natural
/// name order.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        match sniff_file(&path) {
            Ok(Some(_)) => files.push(path),
            Ok(None) => tracing::trace!("Skipping non-image {}", path.display()),
            Err(e) => tracing::warn!("Could not read {}: {}", path.display(), e),
        }
    }

    files.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    Ok(files)
}

pub(crate) fn pages_from_files(files: Vec<PathBuf>) -> Vec<Arc<Page>> {
    files
        .into_iter()
        .enumerate()
        .map(|(i, path)| {
            let image_url = path.to_string_lossy().into_owned();
            Arc::new(Page::ready(i, Some(image_url), PageData::File(path)))
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
