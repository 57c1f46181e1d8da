//! Reader-side state: chapters with their load state, the three-chapter
//! window and the session that slides it.

pub mod chapter;
pub mod session;
pub mod transition;
pub mod window;

pub use chapter::ReaderChapter;
pub use session::{ReaderSession, ViewerKind};
pub use transition::{
    calculate_chapter_difference, missing_chapters, ChapterTransition, Direction, NeighborStatus,
    TransitionMarker,
};
pub use window::{PendingWindow, ViewerChapters};
