//! On-disk layout of downloaded chapters.
//!
//! ```text
//! <root>/<source id>/<manga title>/<chapter name>/001.jpg …
//! ```
//!
//! Directory names are made safe for FAT filesystems.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app::Result;
use crate::domain::{Chapter, Manga, Page};
use crate::loader::directory::{list_image_files, pages_from_files};

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct DownloadManager {
    root: PathBuf,
}

impl DownloadManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manga_dir(&self, manga: &Manga) -> PathBuf {
        self.root
            .join(manga.source_id.to_string())
            .join(valid_fat_filename(manga.title.trim_matches(['.', ' '])))
    }

    pub fn chapter_dir(&self, manga: &Manga, chapter: &Chapter) -> PathBuf {
        self.manga_dir(manga)
            .join(valid_fat_filename(chapter.name.trim_matches(['.', ' '])))
    }

    pub fn is_chapter_downloaded(&self, chapter: &Chapter, manga: &Manga) -> bool {
        self.chapter_dir(manga, chapter).is_dir()
    }

    /// Ready pages for every image in a downloaded chapter directory.
    pub fn build_page_list(&self, chapter_dir: &Path) -> Result<Vec<Arc<Page>>> {
        let files = list_image_files(chapter_dir)?;
        Ok(pages_from_files(files))
    }
}

/// Replace characters FAT rejects with `_` and cap the length at
/// `MAX_NAME_LEN` bytes, cutting on a char boundary.
pub fn valid_fat_filename(name: &str) -> String {
    if name.trim().is_empty() {
        return "(invalid)".to_string();
    }
    let mut out = String::with_capacity(name.len().min(MAX_NAME_LEN));
    for c in name.chars() {
        let c = if is_valid_fat_char(c) { c } else { '_' };
        if out.len() + c.len_utf8() > MAX_NAME_LEN {
            break;
        }
        out.push(c);
    }
    out
}

fn is_valid_fat_char(c: char) -> bool {
    !matches!(
        c,
        '\u{00}'..='\u{1f}' | '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|' | '\u{7f}'
    )
}
