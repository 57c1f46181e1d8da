//! Where chapters come from: remote HTTP sources and the local library.

pub mod json;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::Result;
use crate::domain::{Chapter, Page};

pub use json::JsonHttpSource;
pub use local::{LocalFormat, LocalSource};

pub trait Source: Send + Sync {
    fn id(&self) -> i64;

    fn name(&self) -> &str;

    /// The HTTP face of this source, if it has one.
    fn as_http(self: Arc<Self>) -> Option<Arc<dyn HttpSource>> {
        None
    }

    fn as_local(&self) -> Option<&LocalSource> {
        None
    }
}

/// A page as listed by a remote source. This is also the shape stored in
/// the page-list cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePage {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl RemotePage {
    pub fn into_page(self) -> Page {
        Page::new(self.index, self.url, self.image_url)
    }
}

#[async_trait]
pub trait HttpSource: Source {
    async fn fetch_page_list(&self, chapter: &Chapter) -> Result<Vec<RemotePage>>;

    /// Resolve the image URL of a page that was listed without one.
    async fn fetch_image_url(&self, page: &Page) -> Result<String>;

    async fn fetch_image(&self, page: &Page) -> Result<Vec<u8>>;
}
