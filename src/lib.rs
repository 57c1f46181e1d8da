//! # chapterline
//!
//! The chapter and page loading pipeline of a manga reader.
//!
//! ## Architecture
//!
//! ```text
//! ReaderSession → ChapterLoader → PageLoader → Page
//!                                      │
//!                      Source / DownloadManager / ChapterCache
//! ```
//!
//! A chapter is turned into an ordered list of pages by whichever loader
//! fits it: a downloaded copy on disk, a remote HTTP source, or a local
//! library entry (directory, zip/cbz, rar/cbr, epub). The reader session
//! keeps the previous, current and next chapters warm as the reader moves.
//!
//! ## Quick Start
//!
//! ```bash
//! # List the pages of a local chapter
//! chapterline pages "Series/Chapter 1.cbz"
//!
//! # Save page 3 of it
//! chapterline extract "Series/Chapter 1.cbz" 2 ./out
//!
//! # Read through a whole manga directory
//! chapterline read Series
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`cli`]: Command-line interface definitions
//! - [`domain`]: Chapters, pages and load state
//! - [`loader`]: Page loaders and the chapter loader
//! - [`reader`]: Reader chapters, windows and transitions

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together config,
/// fetcher, chapter cache and download manager.
pub mod app;

/// Disk cache for remote page lists and images.
pub mod cache;

/// Command-line interface using clap.
///
/// - `pages <path>` - List a local chapter's pages
/// - `extract <path> <index> <out>` - Write one page to disk
/// - `read <dir>` - Walk a local manga chapter by chapter
/// - `remote <base-url> <chapter>` - Load a chapter from a JSON API
/// - `cache clear` - Empty the page cache
pub mod cli;

/// Configuration loaded from `~/.config/chapterline/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Chapter`](domain::Chapter): Chapter metadata from the library
/// - [`Page`](domain::Page): One displayable page and its load status
/// - [`ChapterState`](domain::ChapterState): Wait, Loading, Loaded or Error
pub mod domain;

/// Layout of downloaded chapters on disk.
pub mod download;

/// HTTP fetching.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for fetching a URL
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
/// - [`ParallelFetcher`](fetcher::parallel::ParallelFetcher): Bounded fan-out with a semaphore
pub mod fetcher;

/// Page loaders, one per chapter format, and the
/// [`ChapterLoader`](loader::ChapterLoader) choosing between them.
pub mod loader;

/// Reader-side state: [`ReaderChapter`](reader::ReaderChapter),
/// [`ViewerChapters`](reader::ViewerChapters) and
/// [`ReaderSession`](reader::ReaderSession).
pub mod reader;

/// Chapter sources: remote HTTP sources and the local library.
pub mod source;
