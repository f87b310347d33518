//! Object store client: PUT `bucket/key` with body + ASCII metadata.
//! Used by NewsStore to persist article bodies. Optional: if `DATA_BUCKET`
//! is unset, callers skip this entirely and the news record is written
//! with metadata only, no recoverable body.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()>;
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub async fn from_config(region: &str) -> Self {
        let cfg = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_s3::Client::new(&cfg),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .set_metadata(Some(metadata))
            .content_type("application/json")
            .send()
            .await
            .context("S3 put_object failed")?;
        Ok(())
    }
}

/// In-memory fake for tests: records every put so assertions can inspect
/// what was written without touching S3.
#[derive(Default, Clone)]
pub struct InMemoryObjectStore {
    inner: std::sync::Arc<parking_lot::Mutex<Vec<(String, String, Vec<u8>, HashMap<String, String>)>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> Vec<(String, String, Vec<u8>, HashMap<String, String>)> {
        self.inner.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.inner
            .lock()
            .push((bucket.to_string(), key.to_string(), body, metadata));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_records_puts() {
        let store = InMemoryObjectStore::new();
        store
            .put("bucket", "raw/news/AAPL/2025-01-15/n1.json", b"{}".to_vec(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(store.puts().len(), 1);
        assert_eq!(store.puts()[0].1, "raw/news/AAPL/2025-01-15/n1.json");
    }
}
