//! Secret store client: `get_secret(arn) -> flat JSON object` mapping
//! names (`ALPACA_API_KEY`, `ALPACA_API_SECRET`, `MASSIVE_API_KEY`,
//! `token`/`password`) to values.
//!
//! `SecretStore` is a small trait so TSWriter/Scheduler/RealtimeFeed
//! tests can substitute an in-memory fake instead of talking to AWS.

use crate::error::IngestError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch and parse the JSON object stored at `arn`, or return
    /// `IngestError::AuthFail` if the secret cannot be retrieved.
    async fn get_secret(&self, arn: &str) -> Result<HashMap<String, String>>;
}

pub struct AwsSecretsManagerStore {
    client: aws_sdk_secretsmanager::Client,
}

impl AwsSecretsManagerStore {
    pub async fn from_config(region: &str) -> Self {
        let cfg = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_secretsmanager::config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_secretsmanager::Client::new(&cfg),
        }
    }
}

#[async_trait]
impl SecretStore for AwsSecretsManagerStore {
    async fn get_secret(&self, arn: &str) -> Result<HashMap<String, String>> {
        debug!(arn, "fetching secret");
        let resp = self
            .client
            .get_secret_value()
            .secret_id(arn)
            .send()
            .await
            .map_err(|e| IngestError::AuthFail(format!("secret fetch {arn}: {e}")))?;

        let raw = resp
            .secret_string()
            .ok_or_else(|| IngestError::AuthFail(format!("secret {arn} has no string value")))?;

        let parsed: HashMap<String, String> =
            serde_json::from_str(raw).context("secret payload is not a flat JSON object")?;
        Ok(parsed)
    }
}

/// In-memory fake used by tests and by any component configured without a
/// secret ARN (a missing-config path that logs a warning and degrades
/// rather than failing startup).
#[derive(Clone, Default)]
pub struct StaticSecretStore {
    values: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, _arn: &str) -> Result<HashMap<String, String>> {
        Ok(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_store_returns_configured_values() {
        let mut values = HashMap::new();
        values.insert("token".to_string(), "abc123".to_string());
        let store = StaticSecretStore::new(values);
        let secret = store.get_secret("arbitrary/arn").await.unwrap();
        assert_eq!(secret.get("token"), Some(&"abc123".to_string()));
    }
}
