use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manga {
    pub id: i64,
    pub source_id: i64,
    pub url: String,
    pub title: String,
}

impl Manga {
    pub fn new(source_id: i64, url: String, title: String) -> Self {
        Self {
            id: 0,
            source_id,
            url,
            title,
        }
    }
}

/// Persisted chapter metadata as handed over by the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub manga_id: i64,
    pub url: String,
    pub name: String,
    /// Negative when no number could be recognized.
    pub chapter_number: f32,
    pub source_order: i32,
    pub read: bool,
    pub bookmark: bool,
    pub last_page_read: usize,
    pub date_upload: Option<DateTime<Utc>>,
}

impl Chapter {
    pub fn new(url: String, name: String) -> Self {
        let chapter_number = Self::parse_number(&name);
        Self {
            id: 0,
            manga_id: 0,
            url,
            name,
            chapter_number,
            source_order: 0,
            read: false,
            bookmark: false,
            last_page_read: 0,
            date_upload: None,
        }
    }

    pub fn is_recognized_number(&self) -> bool {
        self.chapter_number >= 0.0
    }

    /// Started but not finished.
    pub fn is_partially_read(&self) -> bool {
        !self.read && self.last_page_read > 0
    }

    /// Extract the first decimal number found in a chapter name, e.g.
    /// `"Vol.2 Ch.10.5 - Title"` gives `2.0`, `"Chapter 10.5"` gives `10.5`.
    /// Returns `-1.0` when the name has no digits.
    pub fn parse_number(name: &str) -> f32 {
        let bytes = name.as_bytes();
        let Some(start) = bytes.iter().position(|b| b.is_ascii_digit()) else {
            return -1.0;
        };

        let mut end = start;
        let mut seen_dot = false;
        while end < bytes.len() {
            let b = bytes[end];
            if b.is_ascii_digit() {
                end += 1;
            } else if b == b'.'
                && !seen_dot
                && bytes.get(end + 1).is_some_and(|n| n.is_ascii_digit())
            {
                seen_dot = true;
                end += 1;
            } else {
                break;
            }
        }

        name[start..end].parse().unwrap_or(-1.0)
    }
}
