pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chapterline")]
#[command(about = "Load manga chapters page by page", long_about = None)]
pub struct Cli {
    /// Pages resolved in parallel for remote chapters
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the pages of a local chapter (directory, zip/cbz, rar/cbr, epub)
    Pages {
        /// Chapter file or directory
        path: PathBuf,
    },
    /// Write one page of a local chapter to disk
    Extract {
        /// Chapter file or directory
        path: PathBuf,
        /// 0-based page index
        index: usize,
        /// Output file, or a directory to write `<page>.<ext>` into
        out: PathBuf,
    },
    /// Read through a local manga directory chapter by chapter
    Read {
        /// Directory holding one entry per chapter
        dir: PathBuf,
    },
    /// Load a chapter from a JSON page-list API and download its pages
    Remote {
        /// Base URL of the API
        base_url: String,
        /// Chapter path, relative to the base URL
        chapter: String,
    },
    /// Manage the page cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Delete all cached page lists and images
    Clear,
}
