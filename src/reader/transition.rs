use std::fmt;
use std::sync::Arc;

use crate::domain::{Chapter, ChapterState};
use crate::reader::ReaderChapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

/// The boundary between the current chapter and one of its neighbors.
#[derive(Debug, Clone)]
pub struct ChapterTransition {
    direction: Direction,
    from: Arc<ReaderChapter>,
    to: Option<Arc<ReaderChapter>>,
}

impl ChapterTransition {
    pub fn new(
        direction: Direction,
        from: Arc<ReaderChapter>,
        to: Option<Arc<ReaderChapter>>,
    ) -> Self {
        Self {
            direction,
            from,
            to,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn from(&self) -> &Arc<ReaderChapter> {
        &self.from
    }

    pub fn to(&self) -> Option<&Arc<ReaderChapter>> {
        self.to.as_ref()
    }

    /// Chapters skipped between `from` and `to`.
    pub fn missing_chapters(&self) -> usize {
        let Some(to) = &self.to else {
            return 0;
        };
        let (from, to) = (self.from.chapter(), to.chapter());
        match self.direction {
            Direction::Next => missing_chapters(&to, &from),
            Direction::Prev => missing_chapters(&from, &to),
        }
    }

    /// What the viewer shows at this boundary right now.
    pub fn marker(&self) -> TransitionMarker {
        let neighbor = match &self.to {
            None => NeighborStatus::Absent,
            Some(to) => NeighborStatus::from_state(&to.state()),
        };
        TransitionMarker {
            direction: self.direction,
            from_name: self.from.name(),
            to_name: self.to.as_ref().map(|c| c.name()),
            neighbor,
            missing_chapters: self.missing_chapters(),
        }
    }
}

/// Load status of the chapter a transition leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeighborStatus {
    Absent,
    Wait,
    Loading,
    Loaded,
    Failed { message: String, retryable: bool },
}

impl NeighborStatus {
    fn from_state(state: &ChapterState) -> Self {
        match state {
            ChapterState::Wait => NeighborStatus::Wait,
            ChapterState::Loading => NeighborStatus::Loading,
            ChapterState::Loaded(_) => NeighborStatus::Loaded,
            ChapterState::Error(e) => NeighborStatus::Failed {
                message: e.to_string(),
                retryable: e.is_retryable(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionMarker {
    pub direction: Direction,
    pub from_name: String,
    pub to_name: Option<String>,
    pub neighbor: NeighborStatus,
    pub missing_chapters: usize,
}

impl TransitionMarker {
    pub fn is_loading(&self) -> bool {
        self.neighbor == NeighborStatus::Loading
    }

    pub fn can_retry(&self) -> bool {
        matches!(
            self.neighbor,
            NeighborStatus::Failed {
                retryable: true,
                ..
            }
        )
    }
}

impl fmt::Display for TransitionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (edge, label, none) = match self.direction {
            Direction::Next => ("Finished", "Next", "There is no next chapter"),
            Direction::Prev => ("Current", "Previous", "There is no previous chapter"),
        };

        write!(f, "{}: {}", edge, self.from_name)?;
        let Some(to_name) = &self.to_name else {
            return write!(f, "\n{}", none);
        };
        write!(f, "\n{}: {}", label, to_name)?;

        if self.missing_chapters > 0 {
            let plural = if self.missing_chapters == 1 { "" } else { "s" };
            write!(
                f,
                "\n{} missing chapter{}",
                self.missing_chapters, plural
            )?;
        }

        match &self.neighbor {
            NeighborStatus::Loading => write!(f, "\nLoading..."),
            NeighborStatus::Failed { message, retryable } => {
                write!(f, "\nFailed to load: {}", message)?;
                if *retryable {
                    write!(f, " (retry)")?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// `floor(higher) - floor(lower) - 1` when both numbers are recognized,
/// otherwise 0.
pub fn calculate_chapter_difference(higher: &Chapter, lower: &Chapter) -> f32 {
    if higher.is_recognized_number() && lower.is_recognized_number() {
        higher.chapter_number.floor() - lower.chapter_number.floor() - 1.0
    } else {
        0.0
    }
}

pub fn missing_chapters(higher: &Chapter, lower: &Chapter) -> usize {
    calculate_chapter_difference(higher, lower).max(0.0) as usize
}
