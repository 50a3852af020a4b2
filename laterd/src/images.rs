use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::sync::store::{StoreError, StoreHandle};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("image fetch returned {0}")]
    Status(StatusCode),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Downloads lead images and caches their bytes on the item row. Only a
/// successful download overwrites previously cached bytes.
#[derive(Clone)]
pub struct ImageFetcher {
    http: Client,
}

impl ImageFetcher {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    pub async fn fetch_into_store(
        &self,
        store: &StoreHandle,
        item_id: i64,
        href: &str,
    ) -> Result<(), ImageError> {
        let url = Url::parse(href)?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ImageError::Status(response.status()));
        }
        let bytes = response.bytes().await?;
        store.save_image_data(item_id, &bytes).await?;
        debug!(item_id, bytes = bytes.len(), "cached lead image");
        Ok(())
    }

    /// Fetches every advertised lead image whose bytes are not cached
    /// yet. Individual failures are logged and skipped; the pass never
    /// aborts on one bad image.
    pub async fn fetch_missing(&self, store: &StoreHandle) -> Result<usize, StoreError> {
        let mut fetched = 0;
        for (item_id, href) in store.list_missing_image_items().await? {
            match self.fetch_into_store(store, item_id, &href).await {
                Ok(()) => fetched += 1,
                Err(err) => warn!(item_id, %err, "lead image fetch failed"),
            }
        }
        Ok(fetched)
    }
}

impl Default for ImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}
