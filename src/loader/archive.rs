use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use zip::ZipArchive;

use crate::app::{ReaderError, Result};
use crate::domain::{EntryReader, Page, PageData, PageStatus};
use crate::loader::image::{natural_cmp, sniff_reader};
use crate::loader::{local_page_status, non_empty, PageLoader, RecycleFlag};

/// Upper bound on the buffer reserved up front for one entry.
const MAX_RESERVE: u64 = 64 << 20;

/// An open zip file. Closing it drops the archive and its file descriptor;
/// pages still holding the handle then fail to read instead of reopening.
pub struct ZipHandle {
    path: PathBuf,
    archive: Mutex<Option<ZipArchive<File>>>,
}

impl ZipHandle {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(file)?;
        Ok(Self {
            path: path.to_path_buf(),
            archive: Mutex::new(Some(archive)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    pub fn close(&self) {
        if self.lock().take().is_some() {
            tracing::debug!("Closed archive {}", self.path.display());
        }
    }

    /// Run `f` against the archive while holding the lock.
    pub fn with_archive<T>(&self, f: impl FnOnce(&mut ZipArchive<File>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let archive = guard.as_mut().ok_or(ReaderError::Recycled)?;
        f(archive)
    }

    /// Names of every file entry, directories excluded.
    pub fn file_names(&self) -> Result<HashSet<String>> {
        self.with_archive(|archive| {
            Ok(archive
                .file_names()
                .filter(|name| !name.ends_with('/'))
                .map(String::from)
                .collect())
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<ZipArchive<File>>> {
        self.archive.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EntryReader for ZipHandle {
    fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        self.with_archive(|archive| {
            let mut entry = archive.by_name(name)?;
            let mut buf = Vec::with_capacity(reservation(entry.size()));
            entry
                .read_to_end(&mut buf)
                .map_err(|e| ReaderError::CorruptArchive(format!("{}: {}", name, e)))?;
            Ok(buf)
        })
    }
}

/// Buffer size to reserve for an entry declaring `size` bytes. The header
/// is untrusted input, so the reservation is capped.
fn reservation(size: u64) -> usize {
    size.min(MAX_RESERVE) as usize
}

/// Loader for `.zip` and `.cbz` chapters.
pub struct ZipPageLoader {
    handle: Arc<ZipHandle>,
    recycled: RecycleFlag,
}

impl ZipPageLoader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            handle: Arc::new(ZipHandle::open(path)?),
            recycled: RecycleFlag::default(),
        })
    }
}

#[async_trait]
impl PageLoader for ZipPageLoader {
    fn name(&self) -> &'static str {
        "zip"
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>> {
        self.recycled.check()?;
        let handle = self.handle.clone();
        let names = tokio::task::spawn_blocking(move || image_entries(&handle)).await??;

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

/// Entry names whose leading bytes sniff as an image, in natural order.
fn image_entries(handle: &ZipHandle) -> Result<Vec<String>> {
    let mut names = handle.with_archive(|archive| {
        let mut names = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            match sniff_reader(&mut entry) {
                Ok(Some(_)) => names.push(name),
                Ok(None) => tracing::trace!("Skipping non-image entry {}", name),
                Err(e) => {
                    return Err(ReaderError::CorruptArchive(format!("{}: {}", name, e)));
                }
            }
        }
        Ok(names)
    })?;

    names.sort_by(|a, b| natural_cmp(a, b));
    Ok(names)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    pub(crate) const PNG: &[u8] = b"\x89PNG\r\n\x1a\npixels";
    pub(crate) const JPG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];

    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, data) in entries {
            if name.ends_with('/') {
                zip.add_directory(name.trim_end_matches('/'), options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_declared_entry_size_is_capped() {
        assert_eq!(reservation(12), 12);
        assert_eq!(reservation(u64::MAX), MAX_RESERVE as usize);
    }

    #[tokio::test]
    async fn test_zip_pages_sniffed_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch1.cbz");
        write_zip(
            &path,
            &[
                ("page10.jpg", JPG),
                ("images/", b""),
                ("page2.png", PNG),
                ("ComicInfo.xml", b"<ComicInfo/>"),
                ("page1.jpg", JPG),
                ("fake.png", b"text"),
            ],
        );

        let loader = ZipPageLoader::open(&path).unwrap();
        let pages = loader.get_pages().await.unwrap();

        let names: Vec<_> = pages.iter().map(|p| p.image_url().unwrap()).collect();
        assert_eq!(names, vec!["page1.jpg", "page2.png", "page10.jpg"]);
        let indices: Vec<_> = pages.iter().map(|p| p.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_zip_reads_pages_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch1.zip");
        write_zip(&path, &[("a.png", PNG), ("b.jpg", JPG)]);

        let loader = ZipPageLoader::open(&path).unwrap();
        let pages = loader.get_pages().await.unwrap();

        assert_eq!(pages[1].read_bytes().await.unwrap(), JPG);
        assert_eq!(pages[0].read_bytes().await.unwrap(), PNG);
    }

    #[tokio::test]
    async fn test_zip_without_images_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch1.zip");
        write_zip(&path, &[("readme.txt", b"hello"), ("data/", b"")]);

        let loader = ZipPageLoader::open(&path).unwrap();
        let err = loader.get_pages().await.unwrap_err();
        assert!(matches!(err, ReaderError::EmptyPageList));
    }

    #[tokio::test]
    async fn test_recycle_closes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch1.zip");
        write_zip(&path, &[("a.png", PNG)]);

        let loader = ZipPageLoader::open(&path).unwrap();
        let pages = loader.get_pages().await.unwrap();
        assert_eq!(loader.get_page(&pages[0]).await, PageStatus::Ready);

        loader.recycle();
        assert!(!loader.handle.is_open());
        assert_eq!(loader.get_page(&pages[0]).await, PageStatus::Error);
        assert!(pages[0].read_bytes().await.is_err());
        assert!(matches!(loader.get_pages().await, Err(ReaderError::Recycled)));
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.cbz");
        std::fs::write(&path, b"definitely not a zip").unwrap();

        let err = ZipPageLoader::open(&path).err().unwrap();
        assert!(matches!(err, ReaderError::CorruptArchive(_)));
    }
}
