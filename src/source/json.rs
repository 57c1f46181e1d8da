use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::app::{ReaderError, Result};
use crate::domain::{Chapter, Page};
use crate::fetcher::Fetcher;
use crate::loader::image::find_image_type;
use crate::source::{HttpSource, RemotePage, Source};

#[derive(Debug, Deserialize)]
struct PageListResponse {
    pages: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageUrlResponse {
    image_url: String,
}

/// HTTP source backed by a JSON API.
///
/// `GET <base>/<chapter url>` answers `{"pages": [{"url": …, "image_url": …}]}`;
/// a page listed without `image_url` is resolved by fetching its `url`,
/// which answers `{"image_url": …}`. Relative URLs resolve against the
/// document they appear in.
pub struct JsonHttpSource {
    id: i64,
    name: String,
    base_url: Url,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
}

impl JsonHttpSource {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        base_url: &str,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
    ) -> Result<Self> {
        Ok(Self {
            id,
            name: name.into(),
            base_url: Url::parse(base_url)?,
            fetcher,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn referer(&self) -> Option<&str> {
        Some(self.base_url.as_str())
    }
}

impl Source for JsonHttpSource {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_http(self: Arc<Self>) -> Option<Arc<dyn HttpSource>> {
        Some(self)
    }
}

#[async_trait]
impl HttpSource for JsonHttpSource {
    async fn fetch_page_list(&self, chapter: &Chapter) -> Result<Vec<RemotePage>> {
        let list_url = self.base_url.join(&chapter.url)?;
        let result = self.fetcher.fetch(list_url.as_str(), self.referer()).await?;
        let response: PageListResponse = serde_json::from_slice(&result.body)?;

        let resolve = |u: Option<String>| -> Result<Option<String>> {
            match u {
                Some(u) => Ok(Some(list_url.join(&u)?.to_string())),
                None => Ok(None),
            }
        };

        let mut pages = Vec::with_capacity(response.pages.len());
        for (index, entry) in response.pages.into_iter().enumerate() {
            pages.push(RemotePage {
                index,
                url: resolve(entry.url)?,
                image_url: resolve(entry.image_url)?,
            });
        }

        tracing::debug!("{} listed {} pages for {}", self.name, pages.len(), chapter.name);
        Ok(pages)
    }

    async fn fetch_image_url(&self, page: &Page) -> Result<String> {
        let page_url = page
            .url()
            .ok_or_else(|| ReaderError::Other(format!("Page {} has no url", page.number())))?;
        let page_url = self.base_url.join(page_url)?;

        let result = self.fetcher.fetch(page_url.as_str(), self.referer()).await?;
        let response: ImageUrlResponse = serde_json::from_slice(&result.body)?;
        Ok(page_url.join(&response.image_url)?.to_string())
    }

    async fn fetch_image(&self, page: &Page) -> Result<Vec<u8>> {
        let image_url = page.image_url().ok_or_else(|| {
            ReaderError::Other(format!("Page {} has no image url", page.number()))
        })?;

        let result = self.fetcher.fetch(&image_url, self.referer()).await?;
        if !result.is_image() && find_image_type(&result.body).is_none() {
            return Err(ReaderError::Other(format!(
                "{} did not return an image",
                image_url
            )));
        }
        Ok(result.body)
    }
}
