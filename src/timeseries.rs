//! Line-protocol wire format and HTTP write endpoint used by TSWriter.
//! A thin `reqwest::Client` wrapper with one write method per measurement
//! family.

use crate::sanitize::{sanitize_general_field, sanitize_tag};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use std::fmt::Write as _;
use std::sync::Arc;

/// One row destined for a measurement, built incrementally then rendered
/// to a single line-protocol line.
#[derive(Debug, Clone)]
pub struct TimeseriesPoint {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl TimeseriesPoint {
    pub fn new(measurement: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            time,
        }
    }

    pub fn tag(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.tags.push((key.to_string(), sanitize_tag(value.as_ref())));
        self
    }

    pub fn field(mut self, key: &str, value: FieldValue) -> Self {
        self.fields.push((key.to_string(), value));
        self
    }

    pub fn field_str(self, key: &str, value: impl AsRef<str>) -> Self {
        self.field(key, FieldValue::Str(sanitize_general_field(value.as_ref())))
    }

    /// Renders the point to a single line-protocol line. Exposed so other
    /// `TimeseriesSink` implementations (and tests asserting on wire
    /// content) don't need to reimplement the escaping rules.
    pub fn render(&self) -> String {
        let mut line = self.measurement.replace(' ', "\\ ").replace(',', "\\,");
        for (k, v) in &self.tags {
            let _ = write!(line, ",{}={}", k, v);
        }
        line.push(' ');
        let mut first = true;
        for (k, v) in &self.fields {
            if !first {
                line.push(',');
            }
            first = false;
            match v {
                FieldValue::Float(f) => {
                    let _ = write!(line, "{}={}", k, f);
                }
                FieldValue::Int(i) => {
                    let _ = write!(line, "{}={}i", k, i);
                }
                FieldValue::Bool(b) => {
                    let _ = write!(line, "{}={}", k, b);
                }
                FieldValue::Str(s) => {
                    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
                    let _ = write!(line, "{}=\"{}\"", k, escaped);
                }
            }
        }
        let _ = write!(line, " {}", self.time.timestamp_nanos_opt().unwrap_or(0));
        line
    }
}

/// Abstraction over "send a batch of line-protocol points to the
/// time-series store", so TSWriter can be exercised with an in-memory
/// fake in tests.
#[async_trait]
pub trait TimeseriesSink: Send + Sync {
    async fn write_batch(&self, points: &[TimeseriesPoint]) -> Result<()>;
}

pub struct HttpLineProtocolSink {
    client: Client,
    write_url: String,
    token: Arc<parking_lot::Mutex<Option<String>>>,
}

impl HttpLineProtocolSink {
    pub fn new(client: Client, endpoint: &str, port: u16, database: &str) -> Self {
        Self {
            client,
            write_url: format!("{}:{}/api/v3/write_lp?db={}", endpoint, port, database),
            token: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    pub fn set_token(&self, token: String) {
        *self.token.lock() = Some(token);
    }
}

#[async_trait]
impl TimeseriesSink for HttpLineProtocolSink {
    async fn write_batch(&self, points: &[TimeseriesPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = points
            .iter()
            .map(TimeseriesPoint::render)
            .collect::<Vec<_>>()
            .join("\n");

        let mut req = self.client.post(&self.write_url).body(body);
        if let Some(token) = self.token.lock().clone() {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.context("timeseries write request failed")?;
        match resp.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::TOO_MANY_REQUESTS => {
                bail!(crate::error::IngestError::RateLimit("write_lp 429".into()))
            }
            status if status.is_server_error() => {
                bail!(crate::error::IngestError::Transient(format!(
                    "write_lp {status}"
                )))
            }
            status => {
                bail!(crate::error::IngestError::InvalidInput(format!(
                    "write_lp rejected batch: {status}"
                )))
            }
        }
    }
}

/// In-memory fake: records every batch it was handed, in order.
#[derive(Default, Clone)]
pub struct InMemoryTimeseriesSink {
    batches: Arc<parking_lot::Mutex<Vec<Vec<TimeseriesPoint>>>>,
}

impl InMemoryTimeseriesSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<TimeseriesPoint>> {
        self.batches.lock().clone()
    }

    pub fn total_points(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl TimeseriesSink for InMemoryTimeseriesSink {
    async fn write_batch(&self, points: &[TimeseriesPoint]) -> Result<()> {
        self.batches.lock().push(points.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_escapes_and_appends_timestamp() {
        let point = TimeseriesPoint::new("stock_quotes_raw", "2025-01-15T10:00:00Z".parse().unwrap())
            .tag("ticker", "AAPL")
            .field("close", FieldValue::Float(150.25))
            .field("volume", FieldValue::Int(1000));
        let rendered = point.render();
        assert!(rendered.starts_with("stock_quotes_raw,ticker=AAPL "));
        assert!(rendered.contains("close=150.25"));
        assert!(rendered.contains("volume=1000i"));
    }

    #[tokio::test]
    async fn in_memory_sink_records_batches_in_order() {
        let sink = InMemoryTimeseriesSink::new();
        let p1 = TimeseriesPoint::new("m", Utc::now());
        sink.write_batch(&[p1.clone()]).await.unwrap();
        sink.write_batch(&[p1.clone(), p1]).await.unwrap();
        assert_eq!(sink.batches().len(), 2);
        assert_eq!(sink.total_points(), 3);
    }
}
