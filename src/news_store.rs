//! NewsStore: fetches article bodies for news items, extracts readable
//! text, uploads them to the object store, and forwards the enriched item
//! to TSWriter. Each item is handled independently — one fetch failure
//! does not block the rest of the batch.

use crate::config::Config;
use crate::model::NewsItem;
use crate::object_store::ObjectStore;
use crate::sanitize::sanitize_object_metadata;
use crate::tswriter::TSWriter;
use anyhow::Result;
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_CONTENT_LEN: usize = 100;
const MAX_CONTENT_LEN: usize = 50_000;
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub struct NewsStore {
    client: Client,
    object_store: Option<Arc<dyn ObjectStore>>,
    writer: Arc<TSWriter>,
    data_bucket: String,
    fetch_content: bool,
    tag_stripper: Regex,
}

impl NewsStore {
    pub fn new(config: &Config, object_store: Option<Arc<dyn ObjectStore>>, writer: Arc<TSWriter>) -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .expect("building news-fetch HTTP client");
        Self {
            client,
            object_store,
            writer,
            data_bucket: config.data_bucket.clone(),
            fetch_content: config.fetch_news_content,
            tag_stripper: Regex::new(r"(?s)<[^>]+>").expect("valid tag-strip regex"),
        }
    }

    /// Processes a batch of freshly-fetched news metadata: optionally
    /// fetches + extracts body content, uploads bodies to object storage,
    /// then forwards each item to TSWriter individually. Per-record, not
    /// batched: sanitisation can drop a record, and one bad record must not
    /// hold back the rest.
    pub async fn ingest(&self, mut items: Vec<NewsItem>) -> Result<usize> {
        if self.fetch_content {
            for item in items.iter_mut() {
                if let Err(e) = self.enrich_one(item).await {
                    warn!(id = %item.id, url = %item.url, error = %e, "news content fetch failed, continuing without body");
                }
            }
        }

        let mut written = 0;
        for item in &items {
            match self.writer.write_news(std::slice::from_ref(item)).await {
                Ok(n) => written += n,
                Err(e) => warn!(id = %item.id, error = %e, "news record write failed, continuing"),
            }
        }
        Ok(written)
    }

    async fn enrich_one(&self, item: &mut NewsItem) -> Result<()> {
        let html = self
            .client
            .get(&item.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let extracted = self.extract_content(&html, &item.url);
        let content = extracted.filter(|c| c.chars().count() >= MIN_CONTENT_LEN);
        let has_content = content.is_some();
        if !has_content {
            debug!(id = %item.id, "extracted content missing or too short, uploading metadata only");
        }
        let capped: Option<String> = content.map(|c| c.chars().take(MAX_CONTENT_LEN).collect());

        if let Some(store) = &self.object_store {
            if !self.data_bucket.is_empty() {
                let key = item.object_key();
                let mut metadata = HashMap::new();
                metadata.insert("news-id".to_string(), sanitize_object_metadata(&item.id));
                metadata.insert("ticker".to_string(), sanitize_object_metadata(item.ticker.as_str()));
                metadata.insert("source".to_string(), sanitize_object_metadata(&item.source));
                metadata.insert(
                    "published-at".to_string(),
                    sanitize_object_metadata(&item.time.to_rfc3339()),
                );
                if let Some(sentiment) = item.sentiment {
                    metadata.insert(
                        "sentiment".to_string(),
                        format!("{sentiment:?}").to_lowercase(),
                    );
                }
                metadata.insert("has-content".to_string(), has_content.to_string());

                let body = serde_json::json!({ "content": capped });
                store
                    .put(
                        &self.data_bucket,
                        &key,
                        serde_json::to_vec(&body).unwrap_or_default(),
                        metadata,
                    )
                    .await?;
                item.s3_path = Some(format!("s3://{}/{}", self.data_bucket, key));
            }
        }
        Ok(())
    }

    /// `readability` first; falls back to a blunt tag-strip when the
    /// extractor can't find an article body (non-article pages, paywalls).
    fn extract_content(&self, html: &str, url: &str) -> Option<String> {
        if let Ok(parsed_url) = url::Url::parse(url) {
            if let Ok(article) = readability::extractor::extract(
                &mut std::io::Cursor::new(html.as_bytes()),
                &parsed_url,
            ) {
                let text = article.text.trim().to_string();
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }

        let stripped = self.tag_stripper.replace_all(html, " ");
        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        }
    }
}
