pub mod http_fetcher;
pub mod parallel;

use async_trait::async_trait;

use crate::app::Result;

#[derive(Debug)]
pub struct FetchResult {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchResult {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|t| t.starts_with("image/"))
    }
}

#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<FetchResult>;
}
