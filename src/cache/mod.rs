//! Disk cache for remote chapters: page lists as JSON, images as raw bytes.
//!
//! ```text
//! <dir>/pages/<sha256>.json   page list per (source, chapter url)
//! <dir>/images/<sha256>       image per image url
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::app::Result;
use crate::source::RemotePage;

/// Eviction stops once the image cache is back under this share of the cap.
const EVICT_TARGET_PERCENT: u64 = 80;

pub struct ChapterCache {
    pages_dir: PathBuf,
    images_dir: PathBuf,
    max_size: u64,
}

impl ChapterCache {
    pub fn new(dir: &Path, max_size: u64) -> Result<Self> {
        let pages_dir = dir.join("pages");
        let images_dir = dir.join("images");
        fs::create_dir_all(&pages_dir)?;
        fs::create_dir_all(&images_dir)?;

        Ok(Self {
            pages_dir,
            images_dir,
            max_size,
        })
    }

    /// Key under which a chapter's page list is stored.
    pub fn cache_key(source_id: i64, chapter_url: &str) -> String {
        hash(&format!("{}{}", source_id, chapter_url))
    }

    /// Cached page list, or `None` when absent or unreadable.
    pub fn get_page_list_from_cache(&self, key: &str) -> Option<Vec<RemotePage>> {
        let bytes = fs::read(self.page_list_path(key)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(pages) => Some(pages),
            Err(e) => {
                tracing::warn!("Discarding unreadable page list {}: {}", key, e);
                None
            }
        }
    }

    pub fn put_page_list_to_cache(&self, key: &str, pages: &[RemotePage]) -> Result<()> {
        let json = serde_json::to_vec(pages)?;
        write_atomic(&self.page_list_path(key), &json)
    }

    pub fn is_image_in_cache(&self, image_url: &str) -> bool {
        self.get_image_path(image_url).is_file()
    }

    pub fn get_image_path(&self, image_url: &str) -> PathBuf {
        self.images_dir.join(hash(image_url))
    }

    /// Store an image and evict the oldest ones if the cache grew past its
    /// cap. Returns the stored file's path.
    pub fn put_image(&self, image_url: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.get_image_path(image_url);
        write_atomic(&path, bytes)?;
        self.evict_images(&path);
        Ok(path)
    }

    /// Remove every cached page list and image. Returns the number of
    /// files deleted.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in [&self.pages_dir, &self.images_dir] {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_file() && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        tracing::info!("Cleared {} cached files", removed);
        Ok(removed)
    }

    /// Total bytes held by cached images.
    pub fn image_cache_size(&self) -> u64 {
        self.image_entries().iter().map(|(_, size, _)| size).sum()
    }

    fn page_list_path(&self, key: &str) -> PathBuf {
        self.pages_dir.join(format!("{}.json", key))
    }

    fn image_entries(&self) -> Vec<(PathBuf, u64, std::time::SystemTime)> {
        fs::read_dir(&self.images_dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let meta = e.metadata().ok()?;
                        if !meta.is_file() {
                            return None;
                        }
                        let modified = meta.modified().ok()?;
                        Some((e.path(), meta.len(), modified))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Oldest first, never the file just written.
    fn evict_images(&self, keep: &Path) {
        let mut entries = self.image_entries();
        let total: u64 = entries.iter().map(|(_, size, _)| size).sum();
        if total <= self.max_size {
            return;
        }

        entries.sort_by_key(|(_, _, modified)| *modified);
        let target = self.max_size * EVICT_TARGET_PERCENT / 100;
        let mut current = total;
        for (path, size, _) in entries {
            if current <= target {
                break;
            }
            if path == keep {
                continue;
            }
            if fs::remove_file(&path).is_ok() {
                current -= size;
            }
        }
        tracing::debug!("Image cache evicted down to {} bytes", current);
    }
}

fn hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Write to a temporary sibling then rename, so readers never see a
/// partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(index: usize, image_url: Option<&str>) -> RemotePage {
        RemotePage {
            index,
            url: Some(format!("/p/{}", index)),
            image_url: image_url.map(String::from),
        }
    }

    #[test]
    fn test_cache_key_is_stable_and_distinct() {
        let a = ChapterCache::cache_key(1, "/chapter/1");
        assert_eq!(a, ChapterCache::cache_key(1, "/chapter/1"));
        assert_ne!(a, ChapterCache::cache_key(2, "/chapter/1"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_page_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChapterCache::new(dir.path(), 1024).unwrap();
        let key = ChapterCache::cache_key(1, "/chapter/1");
        assert!(cache.get_page_list_from_cache(&key).is_none());

        let pages = vec![remote(0, Some("https://x/0.jpg")), remote(1, None)];
        cache.put_page_list_to_cache(&key, &pages).unwrap();
        assert_eq!(cache.get_page_list_from_cache(&key).unwrap(), pages);
    }

    #[test]
    fn test_corrupt_page_list_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChapterCache::new(dir.path(), 1024).unwrap();
        fs::write(cache.page_list_path("bad"), b"{not json").unwrap();
        assert!(cache.get_page_list_from_cache("bad").is_none());
    }

    #[test]
    fn test_put_image() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChapterCache::new(dir.path(), 1024).unwrap();
        assert!(!cache.is_image_in_cache("https://x/1.png"));

        let path = cache.put_image("https://x/1.png", b"\x89PNG").unwrap();
        assert!(cache.is_image_in_cache("https://x/1.png"));
        assert_eq!(path, cache.get_image_path("https://x/1.png"));
        assert_eq!(fs::read(path).unwrap(), b"\x89PNG");
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChapterCache::new(dir.path(), 250).unwrap();

        cache.put_image("a", &[0; 100]).unwrap();
        cache.put_image("b", &[0; 100]).unwrap();
        cache.put_image("c", &[0; 100]).unwrap();

        assert!(cache.is_image_in_cache("c"));
        assert!(cache.image_cache_size() <= 250);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChapterCache::new(dir.path(), 1024).unwrap();
        cache.put_image("a", b"1").unwrap();
        cache.put_page_list_to_cache("k", &[remote(0, None)]).unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(!cache.is_image_in_cache("a"));
        assert!(cache.get_page_list_from_cache("k").is_none());
    }
}
