use std::path::{Path, PathBuf};

use crate::app::{ReaderError, Result};
use crate::domain::{Chapter, Manga};
use crate::loader::image::natural_cmp;
use crate::source::Source;

/// Source id reserved for the local library.
pub const LOCAL_SOURCE_ID: i64 = 0;

/// Container a local chapter is stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalFormat {
    Directory(PathBuf),
    Zip(PathBuf),
    Rar(PathBuf),
    Epub(PathBuf),
}

impl LocalFormat {
    /// Classify `path`: directories as-is, files by extension.
    pub fn detect(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(LocalFormat::Directory(path.to_path_buf()));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let path = path.to_path_buf();
        match extension.as_str() {
            "zip" | "cbz" => Ok(LocalFormat::Zip(path)),
            "rar" | "cbr" => Ok(LocalFormat::Rar(path)),
            "epub" => Ok(LocalFormat::Epub(path)),
            _ => Err(ReaderError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            LocalFormat::Directory(p)
            | LocalFormat::Zip(p)
            | LocalFormat::Rar(p)
            | LocalFormat::Epub(p) => p,
        }
    }
}

/// Manga stored under a library root, one directory per manga and one
/// directory or archive per chapter. Chapter URLs are relative to the root.
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self, chapter: &Chapter) -> Result<LocalFormat> {
        LocalFormat::detect(&self.root.join(&chapter.url))
    }

    /// A manga for a directory directly under the root.
    pub fn manga(&self, dir_name: &str) -> Manga {
        Manga::new(LOCAL_SOURCE_ID, dir_name.to_string(), dir_name.to_string())
    }

    /// Chapters of `manga` in reading order. Entries that are neither a
    /// directory nor a known archive are left out.
    pub fn chapters(&self, manga: &Manga) -> Result<Vec<Chapter>> {
        let manga_dir = self.root.join(&manga.url);
        let mut entries = Vec::new();

        for entry in std::fs::read_dir(&manga_dir)? {
            let path = entry?.path();
            if LocalFormat::detect(&path).is_err() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = if path.is_dir() {
                file_name.to_string()
            } else {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(file_name)
                    .to_string()
            };
            entries.push((file_name.to_string(), name));
        }

        entries.sort_by(|a, b| natural_cmp(&a.0, &b.0));

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(order, (file_name, name))| {
                let mut chapter = Chapter::new(format!("{}/{}", manga.url, file_name), name);
                chapter.manga_id = manga.id;
                chapter.source_order = order as i32;
                chapter
            })
            .collect())
    }
}

impl Source for LocalSource {
    fn id(&self) -> i64 {
        LOCAL_SOURCE_ID
    }

    fn name(&self) -> &str {
        "Local library"
    }

    fn as_local(&self) -> Option<&LocalSource> {
        Some(self)
    }
}
