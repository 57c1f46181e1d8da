use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use unrar::Archive;

use crate::app::{ReaderError, Result};
use crate::domain::{EntryReader, Page, PageData, PageStatus};
use crate::loader::image::{find_image_type, natural_cmp};
use crate::loader::{local_page_status, non_empty, PageLoader, RecycleFlag};

/// A rar file opened for reading. unrar only walks entries forward, so
/// every read starts a pass over the headers and stops at the wanted entry;
/// only that entry's bytes are kept.
pub struct RarHandle {
    path: PathBuf,
    closed: RecycleFlag,
}

impl RarHandle {
    pub fn open(path: &Path) -> Result<Self> {
        // Listing validates the signature and headers up front.
        Archive::new(path).open_for_listing().map_err(corrupt)?;
        Ok(Self {
            path: path.to_path_buf(),
            closed: RecycleFlag::default(),
        })
    }

    pub fn close(&self) {
        self.closed.recycle();
    }

    /// File entries whose content sniffs as an image, in natural order.
    fn image_entries(&self) -> Result<Vec<String>> {
        self.closed.check()?;
        let mut names = Vec::new();
        let mut archive = Archive::new(&self.path)
            .open_for_processing()
            .map_err(corrupt)?;

        while let Some(header) = archive.read_header().map_err(corrupt)? {
            let entry = header.entry();
            let name = entry.filename.to_string_lossy().into_owned();
            let is_dir = entry.is_directory();

            archive = if is_dir {
                header.skip().map_err(corrupt)?
            } else {
                let (data, rest) = header.read().map_err(corrupt)?;
                if find_image_type(&data).is_some() {
                    names.push(name);
                } else {
                    tracing::trace!("Skipping non-image entry {}", name);
                }
                rest
            };
        }

        names.sort_by(|a, b| natural_cmp(a, b));
        Ok(names)
    }
}

impl EntryReader for RarHandle {
    fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        self.closed.check()?;
        let mut archive = Archive::new(&self.path)
            .open_for_processing()
            .map_err(corrupt)?;

        while let Some(header) = archive.read_header().map_err(corrupt)? {
            if header.entry().filename.to_string_lossy() == name {
                let (data, _) = header.read().map_err(corrupt)?;
                return Ok(data);
            }
            archive = header.skip().map_err(corrupt)?;
        }

        Err(ReaderError::CorruptArchive(format!(
            "Entry {} not found in {}",
            name,
            self.path.display()
        )))
    }
}

/// Loader for `.rar` and `.cbr` chapters.
pub struct RarPageLoader {
    handle: Arc<RarHandle>,
    recycled: RecycleFlag,
}

impl RarPageLoader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            handle: Arc::new(RarHandle::open(path)?),
            recycled: RecycleFlag::default(),
        })
    }
}

#[async_trait]
impl PageLoader for RarPageLoader {
    fn name(&self) -> &'static str {
        "rar"
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>> {
        self.recycled.check()?;
        let handle = self.handle.clone();
        let names = tokio::task::spawn_blocking(move || handle.image_entries()).await??;

        let reader: Arc<dyn EntryReader> = self.handle.clone();
        let pages = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let data = PageData::Entry {
                    reader: reader.clone(),
                    name: name.clone(),
                };
                Arc::new(Page::ready(i, Some(name), data))
            })
            .collect();

        non_empty(pages)
    }

    async fn get_page(&self, _page: &Arc<Page>) -> PageStatus {
        local_page_status(&self.recycled)
    }

    fn recycle(&self) {
        if self.recycled.recycle() {
            self.handle.close();
        }
    }

    fn is_recycled(&self) -> bool {
        self.recycled.is_recycled()
    }
}

fn corrupt(e: impl std::fmt::Display) -> ReaderError {
    ReaderError::CorruptArchive(e.to_string())
}
