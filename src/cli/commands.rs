use std::path::Path;
use std::sync::Arc;

use crate::app::{AppContext, ReaderError, Result};
use crate::domain::{Chapter, ChapterState, Manga, Page, PageStatus};
use crate::fetcher::parallel::ParallelFetcher;
use crate::loader::image::find_image_type;
use crate::loader::ChapterLoader;
use crate::reader::{ReaderChapter, ReaderSession, ViewerKind};
use crate::source::local::LOCAL_SOURCE_ID;
use crate::source::{JsonHttpSource, LocalSource, Source};

/// Source id given to the API passed to `remote`.
const REMOTE_SOURCE_ID: i64 = 1;

pub async fn list_pages(ctx: &AppContext, path: &Path) -> Result<()> {
    let (chapter, pages) = load_local_chapter(ctx, path).await?;
    println!("{} ({} pages)", chapter.name(), pages.len());

    for page in pages.iter() {
        let kind = match page.read_bytes().await {
            Ok(bytes) => find_image_type(&bytes).map_or("unknown", |t| t.mime()),
            Err(_) => "unreadable",
        };
        println!(
            "  {:>3}  {:<10}  {}",
            page.index(),
            kind,
            page.image_url().unwrap_or_default()
        );
    }

    chapter.recycle();
    Ok(())
}

pub async fn extract_page(ctx: &AppContext, path: &Path, index: usize, out: &Path) -> Result<()> {
    let (chapter, pages) = load_local_chapter(ctx, path).await?;
    let page = pages.get(index).cloned().ok_or_else(|| {
        ReaderError::Other(format!(
            "{} has {} pages, no index {}",
            chapter.name(),
            pages.len(),
            index
        ))
    })?;

    if chapter.load_page(&page).await != PageStatus::Ready {
        return Err(ReaderError::Other(format!("Page {} failed to load", page.number())));
    }
    let bytes = page.read_bytes().await?;

    let target = if out.is_dir() {
        let extension = find_image_type(&bytes).map_or("bin", |t| t.extension());
        out.join(format!("{:03}.{}", page.number(), extension))
    } else {
        out.to_path_buf()
    };
    tokio::fs::write(&target, &bytes).await?;
    println!("Wrote page {} to {}", page.number(), target.display());

    chapter.recycle();
    Ok(())
}

/// Walk every chapter of a local manga through a reader session, printing
/// preloads and chapter transitions along the way.
pub async fn read_manga(ctx: &AppContext, dir: &Path) -> Result<()> {
    let dir = dir.canonicalize()?;
    let (root, name) = split_path(&dir)?;

    let source = Arc::new(LocalSource::new(root.to_path_buf()));
    let manga = source.manga(name);
    let chapters = source.chapters(&manga)?;
    if chapters.is_empty() {
        println!("No chapters in {}", dir.display());
        return Ok(());
    }
    println!("{}: {} chapters", manga.title, chapters.len());

    let loader = ctx.chapter_loader(manga, source);
    let session = ReaderSession::new(
        loader,
        chapters,
        0,
        ViewerKind::Paged,
        ctx.config.reader.preload_threshold,
    )?;

    let mut state = session.load_current().await;
    loop {
        let curr = session.window().curr;
        match &state {
            ChapterState::Loaded(pages) => {
                println!("{} ({} pages)", curr.name(), pages.len());
                for page in pages.iter().skip(curr.requested_page()) {
                    if let Some(preloaded) = session.on_page_selected(page).await {
                        println!("  page {}: preloading {}", page.number(), preloaded.name());
                    }
                }
            }
            ChapterState::Error(e) => println!("{}: {}", curr.name(), e),
            ChapterState::Wait | ChapterState::Loading => {}
        }

        for line in session.next_transition().marker().to_string().lines() {
            println!("  | {}", line);
        }

        match session.next_chapter().await {
            Some(next) => state = next,
            None => break,
        }
    }

    session.close();
    Ok(())
}

/// Load a chapter from a JSON page-list API and bring every page to Ready.
pub async fn read_remote(ctx: &AppContext, base_url: &str, chapter_url: &str) -> Result<()> {
    let source = Arc::new(JsonHttpSource::new(
        REMOTE_SOURCE_ID,
        base_url,
        base_url,
        ctx.fetcher.clone(),
    )?);
    let manga = Manga::new(source.id(), String::new(), source.name().to_string());
    let loader = ctx.chapter_loader(manga, source);

    let chapter = ReaderChapter::new(Chapter::new(chapter_url.to_string(), chapter_url.to_string()));
    let pages = loaded_pages(&loader, &chapter).await?;
    println!("{} ({} pages)", chapter.name(), pages.len());

    // Waiting on every page at once lets the loader keep its pool busy.
    let waiters = ParallelFetcher::with_workers(pages.len());
    let results = waiters
        .fetch_all(pages.iter().cloned(), |page| {
            let chapter = chapter.clone();
            async move {
                let status = chapter.load_page(&page).await;
                (page, status)
            }
        })
        .await;

    let mut failed = 0;
    for (page, status) in results {
        if status != PageStatus::Ready {
            failed += 1;
        }
        println!(
            "  {:>3}  {:?}  {}",
            page.index(),
            status,
            page.image_url().unwrap_or_default()
        );
    }

    println!("Done: {} pages, {} failed", pages.len(), failed);
    chapter.recycle();
    Ok(())
}

pub fn clear_cache(ctx: &AppContext) -> Result<()> {
    let removed = ctx.cache.clear()?;
    println!("Removed {} cached files", removed);
    Ok(())
}

/// Treat `path` as a chapter of a manga rooted at its parent directory.
async fn load_local_chapter(
    ctx: &AppContext,
    path: &Path,
) -> Result<(Arc<ReaderChapter>, Arc<[Arc<Page>]>)> {
    let path = path.canonicalize()?;
    let (root, file_name) = split_path(&path)?;

    let source = Arc::new(LocalSource::new(root.to_path_buf()));
    let title = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let manga = Manga::new(LOCAL_SOURCE_ID, String::new(), title);
    let loader = ctx.chapter_loader(manga, source);

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string();
    let chapter = ReaderChapter::new(Chapter::new(file_name.to_string(), name));
    let pages = loaded_pages(&loader, &chapter).await?;
    Ok((chapter, pages))
}

async fn loaded_pages(
    loader: &ChapterLoader,
    chapter: &Arc<ReaderChapter>,
) -> Result<Arc<[Arc<Page>]>> {
    match loader.load_chapter(chapter).await {
        ChapterState::Loaded(pages) => Ok(pages),
        ChapterState::Error(e) => Err(ReaderError::Other(format!("{}: {}", chapter.name(), e))),
        state => Err(ReaderError::Other(format!(
            "{} did not load ({:?})",
            chapter.name(),
            state
        ))),
    }
}

fn split_path(path: &Path) -> Result<(&Path, &str)> {
    let parent = path.parent();
    let name = path.file_name().and_then(|n| n.to_str());
    match (parent, name) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(ReaderError::Other(format!(
            "{} is not a chapter path",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::loader::archive::tests::{write_zip, JPG, PNG};

    fn context(dir: &Path) -> AppContext {
        let mut config = Config::default();
        config.cache.dir = Some(dir.join("cache"));
        config.downloads.dir = Some(dir.join("downloads"));
        AppContext::with_config(config).unwrap()
    }

    #[tokio::test]
    async fn test_extract_page_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let chapter = dir.path().join("Chapter 1.cbz");
        write_zip(&chapter, &[("2.jpg", JPG), ("1.png", PNG)]);
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        extract_page(&ctx, &chapter, 1, &out).await.unwrap();
        assert_eq!(std::fs::read(out.join("002.jpg")).unwrap(), JPG);

        assert!(extract_page(&ctx, &chapter, 5, &out).await.is_err());
    }

    #[tokio::test]
    async fn test_list_pages_of_unsupported_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let chapter = dir.path().join("notes.txt");
        std::fs::write(&chapter, b"hello").unwrap();

        let err = list_pages(&ctx, &chapter).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported chapter format"));
    }

    #[tokio::test]
    async fn test_read_manga_walks_all_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let manga = dir.path().join("library").join("Series");
        for c in 1..=3 {
            let chapter = manga.join(format!("Chapter {}", c));
            std::fs::create_dir_all(&chapter).unwrap();
            std::fs::write(chapter.join("001.png"), PNG).unwrap();
        }

        read_manga(&ctx, &manga).await.unwrap();
    }
}
