use std::fmt;
use std::sync::Arc;

use crate::app::ReaderError;
use crate::domain::Page;

/// Load state of a chapter.
#[derive(Clone)]
pub enum ChapterState {
    Wait,
    Loading,
    Loaded(Arc<[Arc<Page>]>),
    Error(Arc<ReaderError>),
}

impl ChapterState {
    pub fn is_wait(&self) -> bool {
        matches!(self, ChapterState::Wait)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ChapterState::Loading)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ChapterState::Loaded(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ChapterState::Error(_))
    }

    pub fn pages(&self) -> Option<&Arc<[Arc<Page>]>> {
        match self {
            ChapterState::Loaded(pages) => Some(pages),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Arc<ReaderError>> {
        match self {
            ChapterState::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Debug for ChapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChapterState::Wait => write!(f, "Wait"),
            ChapterState::Loading => write!(f, "Loading"),
            ChapterState::Loaded(pages) => write!(f, "Loaded({} pages)", pages.len()),
            ChapterState::Error(e) => write!(f, "Error({})", e),
        }
    }
}
