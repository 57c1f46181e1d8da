pub mod chapter;
pub mod page;
pub mod state;

pub use chapter::{Chapter, Manga};
pub use page::{EntryReader, Page, PageData, PageStatus};
pub use state::ChapterState;
