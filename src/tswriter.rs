//! TSWriter: the single write path into the time-series store. Normalises
//! domain records into line-protocol points, drops invalid ones with a
//! warning, batches in groups of 1000, and retries transient failures with
//! a linear backoff.

use crate::config::Config;
use crate::error::IngestError;
use crate::model::{Bar, DailyBar, Fundamentals, NewsItem};
use crate::sanitize::sanitize_general_field;
use crate::secrets::SecretStore;
use crate::timeseries::{FieldValue, HttpLineProtocolSink, TimeseriesPoint, TimeseriesSink};
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

const BATCH_SIZE: usize = 1000;
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

pub const MEASUREMENT_QUOTES: &str = "stock_quotes_raw";
pub const MEASUREMENT_DAILY: &str = "stock_quotes_aggregated";
pub const MEASUREMENT_NEWS: &str = "news";
pub const MEASUREMENT_FUNDAMENTALS: &str = "fundamentals";

/// Lazily initialised: the sink isn't built until `initialize()` runs, so
/// the health server can start and answer 200 before a slow or failing
/// secret fetch / connectivity check blocks anything else.
pub struct TSWriter {
    config: Config,
    secrets: Arc<dyn SecretStore>,
    sink: Mutex<Option<Arc<dyn TimeseriesSink>>>,
}

impl TSWriter {
    pub fn new(config: Config, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            config,
            secrets,
            sink: Mutex::new(None),
        }
    }

    /// Test/alternate-backend constructor: skips secret resolution and HTTP
    /// sink construction, writing straight through an arbitrary sink.
    pub fn with_sink(config: Config, sink: Arc<dyn TimeseriesSink>) -> Self {
        Self {
            config,
            secrets: Arc::new(crate::secrets::StaticSecretStore::new(Default::default())),
            sink: Mutex::new(Some(sink)),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        let mut guard = self.sink.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        if !self.config.has_timeseries_store() {
            return Err(IngestError::ConfigMissing("INFLUXDB_ENDPOINT not set".into()).into());
        }

        let client = Client::builder()
            .timeout(crate::config::HTTP_TIMEOUT)
            .build()
            .context("building timeseries HTTP client")?;
        let http_sink = HttpLineProtocolSink::new(
            client,
            &self.config.influxdb_endpoint,
            self.config.influxdb_port,
            &self.config.influxdb_database,
        );

        if !self.config.influxdb_secret_arn.is_empty() {
            match self.secrets.get_secret(&self.config.influxdb_secret_arn).await {
                Ok(secret) => {
                    if let Some(token) = secret.get("token").or_else(|| secret.get("password")) {
                        http_sink.set_token(token.clone());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "timeseries secret fetch failed, continuing unauthenticated");
                }
            }
        }

        *guard = Some(Arc::new(http_sink));
        info!("TSWriter initialized");
        Ok(())
    }

    async fn sink(&self) -> Result<Arc<dyn TimeseriesSink>> {
        self.sink
            .lock()
            .await
            .clone()
            .ok_or_else(|| IngestError::ConfigMissing("TSWriter not initialized".into()).into())
    }

    pub async fn write_quotes(&self, bars: &[Bar]) -> Result<usize> {
        let points = bars
            .iter()
            .filter_map(|bar| {
                if !bar.is_valid() {
                    warn!(ticker = %bar.ticker, time = %bar.time, "dropping invalid bar");
                    return None;
                }
                Some(bar_to_point(bar))
            })
            .collect::<Vec<_>>();
        self.write_batched(points).await
    }

    pub async fn write_daily_data(&self, bars: &[DailyBar]) -> Result<usize> {
        let points = bars
            .iter()
            .filter_map(|bar| {
                if !bar.is_valid() {
                    warn!(ticker = %bar.ticker, date = %bar.date, "dropping invalid daily bar");
                    return None;
                }
                Some(daily_bar_to_point(bar))
            })
            .collect::<Vec<_>>();
        self.write_batched(points).await
    }

    pub async fn write_news(&self, items: &[NewsItem]) -> Result<usize> {
        let points = items.iter().map(news_item_to_point).collect::<Vec<_>>();
        self.write_batched(points).await
    }

    pub async fn write_fundamentals(&self, items: &[Fundamentals]) -> Result<usize> {
        let points = items
            .iter()
            .map(fundamentals_to_point)
            .collect::<Vec<_>>();
        self.write_batched(points).await
    }

    async fn write_batched(&self, points: Vec<TimeseriesPoint>) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        let sink = self.sink().await?;
        let mut written = 0;
        for chunk in points.chunks(BATCH_SIZE) {
            write_with_retry(sink.as_ref(), chunk).await?;
            written += chunk.len();
        }
        Ok(written)
    }

    pub async fn close(&self) {
        *self.sink.lock().await = None;
        info!("TSWriter closed");
    }
}

async fn write_with_retry(sink: &dyn TimeseriesSink, batch: &[TimeseriesPoint]) -> Result<()> {
    let mut attempt = 1;
    loop {
        match sink.write_batch(batch).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let retryable = e
                    .downcast_ref::<IngestError>()
                    .map(IngestError::is_retryable)
                    .unwrap_or(false);
                if !retryable || attempt >= RETRY_ATTEMPTS {
                    return Err(e);
                }
                warn!(attempt, error = %e, "timeseries write failed, retrying");
                sleep(RETRY_BASE_DELAY * attempt).await;
                attempt += 1;
            }
        }
    }
}

fn bar_to_point(bar: &Bar) -> TimeseriesPoint {
    let mut point = TimeseriesPoint::new(MEASUREMENT_QUOTES, bar.time)
        .tag("ticker", bar.ticker.as_str())
        .tag("market", bar.market.as_str())
        .field("open", FieldValue::Float(decimal_f64(bar.open)))
        .field("high", FieldValue::Float(decimal_f64(bar.high)))
        .field("low", FieldValue::Float(decimal_f64(bar.low)))
        .field("close", FieldValue::Float(decimal_f64(bar.close)))
        .field("volume", FieldValue::Int(bar.volume));
    if let Some(vwap) = bar.vwap {
        point = point.field("vwap", FieldValue::Float(decimal_f64(vwap)));
    }
    if let Some(trades) = bar.trades {
        point = point.field("trades", FieldValue::Int(trades));
    }
    point
}

fn daily_bar_to_point(bar: &DailyBar) -> TimeseriesPoint {
    let time = bar
        .date
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    let mut point = TimeseriesPoint::new(MEASUREMENT_DAILY, time)
        .tag("ticker", bar.ticker.as_str())
        .tag("market", bar.market.as_str())
        .field("open", FieldValue::Float(decimal_f64(bar.open)))
        .field("high", FieldValue::Float(decimal_f64(bar.high)))
        .field("low", FieldValue::Float(decimal_f64(bar.low)))
        .field("close", FieldValue::Float(decimal_f64(bar.close)))
        .field("volume", FieldValue::Int(bar.volume));
    if let Some(vwap) = bar.vwap {
        point = point.field("vwap", FieldValue::Float(decimal_f64(vwap)));
    }
    if let Some(trades) = bar.trades {
        point = point.field("trades", FieldValue::Int(trades));
    }
    if let Some(pct) = bar.change_percent() {
        point = point.field("change_percent", FieldValue::Float(decimal_f64(pct)));
    }
    point
}

fn news_item_to_point(item: &NewsItem) -> TimeseriesPoint {
    let mut point = TimeseriesPoint::new(MEASUREMENT_NEWS, item.time)
        .tag("ticker", item.ticker.as_str())
        .tag("market", item.market.as_str())
        .tag("source", &item.source)
        .field_str("id", &item.id)
        .field_str("title", sanitize_general_field(&item.title))
        .field_str("url", &item.url)
        .field_str("source", &item.source);
    if let Some(author) = &item.author {
        point = point.field_str("author", sanitize_general_field(author));
    }
    if let Some(description) = &item.description {
        point = point.field_str("description", sanitize_general_field(description));
    }
    if let Some(sentiment) = item.sentiment {
        point = point.field_str("sentiment", format!("{sentiment:?}").to_lowercase());
    }
    if let Some(s3_path) = &item.s3_path {
        point = point.field_str("s3_path", s3_path);
    }
    if !item.keywords.is_empty() {
        point = point.field_str("keywords", item.keywords.join(","));
    }
    point
}

fn fundamentals_to_point(item: &Fundamentals) -> TimeseriesPoint {
    let time = item.end_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let mut point = TimeseriesPoint::new(MEASUREMENT_FUNDAMENTALS, time)
        .tag("ticker", item.ticker.as_str())
        .tag("market", item.market.as_str())
        .tag("period_type", format!("{:?}", item.period_type).to_lowercase())
        .field_str("income_statement", item.income_statement.to_string())
        .field_str("balance_sheet", item.balance_sheet.to_string())
        .field_str("cash_flow_statement", item.cash_flow_statement.to_string());
    if let Some(name) = &item.company_name {
        point = point.field_str("company_name", sanitize_general_field(name));
    }
    point
}

fn decimal_f64(value: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticker::{Market, Ticker};
    use crate::timeseries::InMemoryTimeseriesSink;
    use rust_decimal::Decimal;

    fn test_config() -> Config {
        let mut cfg = Config::from_env().unwrap();
        cfg.influxdb_endpoint = "http://localhost".into();
        cfg
    }

    fn valid_bar(ticker: &str) -> Bar {
        Bar {
            ticker: Ticker::new(ticker),
            market: Market::Us,
            time: "2025-01-15T10:00:00Z".parse().unwrap(),
            open: Decimal::new(10000, 2),
            high: Decimal::new(10100, 2),
            low: Decimal::new(9900, 2),
            close: Decimal::new(10050, 2),
            volume: 1000,
            vwap: None,
            trades: None,
            change: None,
            change_percent: None,
            previous_close: None,
        }
    }

    #[tokio::test]
    async fn write_quotes_drops_invalid_bars() {
        let sink = InMemoryTimeseriesSink::new();
        let writer = TSWriter::with_sink(test_config(), Arc::new(sink.clone()));

        let mut invalid = valid_bar("BAD");
        invalid.open = Decimal::ZERO;

        let written = writer
            .write_quotes(&[valid_bar("AAPL"), invalid])
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(sink.total_points(), 1);
    }

    #[tokio::test]
    async fn write_quotes_batches_at_one_thousand() {
        let sink = InMemoryTimeseriesSink::new();
        let writer = TSWriter::with_sink(test_config(), Arc::new(sink.clone()));

        let bars: Vec<Bar> = (0..2500).map(|i| valid_bar(&format!("T{i}"))).collect();
        let written = writer.write_quotes(&bars).await.unwrap();

        assert_eq!(written, 2500);
        assert_eq!(sink.batches().len(), 3);
        assert_eq!(sink.batches()[0].len(), 1000);
        assert_eq!(sink.batches()[2].len(), 500);
    }

    #[tokio::test]
    async fn uninitialized_writer_returns_config_missing() {
        let writer = TSWriter::new(test_config(), Arc::new(crate::secrets::StaticSecretStore::default()));
        let err = writer.write_quotes(&[valid_bar("AAPL")]).await.unwrap_err();
        assert!(err.downcast_ref::<IngestError>().is_some());
    }
}
