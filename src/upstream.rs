//! Upstream market-data REST contracts (fast-feed bars, delayed-feed
//! snapshot/grouped-daily/news/financials) behind one trait, so the
//! scheduler and realtime backfill paths can be tested against an
//! in-memory double instead of a live vendor API.

use crate::config::Config;
use crate::error::IngestError;
use crate::model::{Bar, DailyBar, Fundamentals, NewsItem, PeriodType};
use crate::ticker::{Market, Ticker};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait MarketDataApi: Send + Sync {
    async fn fetch_fast_bars(&self, ticker: &Ticker, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Bar>>;
    async fn fetch_minute_bar(&self, ticker: &Ticker, at: DateTime<Utc>) -> Result<Option<Bar>>;
    async fn fetch_snapshot(&self) -> Result<Vec<DailyBar>>;
    async fn fetch_grouped_daily(&self, date: NaiveDate) -> Result<Vec<DailyBar>>;
    async fn fetch_minute_range(&self, ticker: &Ticker, from: DateTime<Utc>, to: DateTime<Utc>, limit: u32) -> Result<Vec<Bar>>;
    async fn fetch_daily_range(&self, ticker: &Ticker, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<DailyBar>>;
    async fn fetch_news(&self, ticker: &Ticker, limit: u32) -> Result<Vec<NewsItem>>;
    /// `Ok(None)` is the soft "not available" (403/404) path; other errors propagate.
    async fn fetch_financials(&self, ticker: &Ticker, period: PeriodType, limit: u32) -> Result<Vec<Fundamentals>>;
}

pub struct MassiveRestClient {
    client: Client,
    base_url: String,
    api_key: Arc<parking_lot::Mutex<Option<String>>>,
}

impl MassiveRestClient {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(crate::config::HTTP_TIMEOUT)
            .build()
            .expect("building upstream REST client");
        Self {
            client,
            base_url: config.massive_base_url.clone(),
            api_key: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    pub fn set_api_key(&self, key: String) {
        *self.api_key.lock() = Some(key);
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(key) = self.api_key.lock().clone() {
            req = req.query(&[("apiKey", key)]);
        }
        req
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let resp = self.request(path).send().await.context("upstream REST request failed")?;
        match resp.status() {
            StatusCode::OK => resp.json::<T>().await.context("upstream REST response decode failed"),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                Err(IngestError::NotAvailable(format!("{path} not available")).into())
            }
            StatusCode::TOO_MANY_REQUESTS => Err(IngestError::RateLimit(path.to_string()).into()),
            status if status.is_server_error() => Err(IngestError::Transient(format!("{path}: {status}")).into()),
            status => Err(IngestError::InvalidInput(format!("{path}: unexpected status {status}")).into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RestBar {
    #[serde(alias = "Symbol", alias = "T")]
    symbol: Option<String>,
    #[serde(alias = "Timestamp", alias = "t")]
    timestamp: Option<i64>,
    #[serde(alias = "OpenPrice", alias = "o")]
    open: f64,
    #[serde(alias = "HighPrice", alias = "h")]
    high: f64,
    #[serde(alias = "LowPrice", alias = "l")]
    low: f64,
    #[serde(alias = "ClosePrice", alias = "c")]
    close: f64,
    #[serde(alias = "Volume", alias = "v")]
    volume: i64,
    #[serde(alias = "VWAP", alias = "vw")]
    vwap: Option<f64>,
    #[serde(alias = "TradeCount", alias = "n")]
    trades: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Vec<RestBar>,
}

#[derive(Debug, Deserialize)]
struct GroupedDailyResponse {
    results: Vec<RestBar>,
}

#[derive(Debug, Deserialize)]
struct SnapshotTicker {
    ticker: String,
    day: SnapshotDay,
}

#[derive(Debug, Deserialize)]
struct SnapshotDay {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: i64,
    #[serde(default)]
    vw: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(alias = "results")]
    tickers: Vec<SnapshotTicker>,
}

fn bar_from_rest(ticker: &Ticker, time: DateTime<Utc>, raw: &RestBar) -> Bar {
    use rust_decimal::Decimal;
    Bar {
        ticker: ticker.clone(),
        market: Market::Us,
        time,
        open: Decimal::try_from(raw.open).unwrap_or(Decimal::ZERO),
        high: Decimal::try_from(raw.high).unwrap_or(Decimal::ZERO),
        low: Decimal::try_from(raw.low).unwrap_or(Decimal::ZERO),
        close: Decimal::try_from(raw.close).unwrap_or(Decimal::ZERO),
        volume: raw.volume,
        vwap: raw.vwap.and_then(|v| Decimal::try_from(v).ok()),
        trades: raw.trades,
        change: None,
        change_percent: None,
        previous_close: None,
    }
}

#[async_trait]
impl MarketDataApi for MassiveRestClient {
    async fn fetch_fast_bars(&self, ticker: &Ticker, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Bar>> {
        let path = format!(
            "/v2/stocks/bars?symbol={}&from={}&to={}&timeframe=1Min&feed=iex",
            ticker, from.to_rfc3339(), to.to_rfc3339()
        );
        let resp: BarsResponse = self.get_json(&path).await?;
        Ok(resp
            .bars
            .iter()
            .filter_map(|b| b.timestamp.map(|ts| bar_from_rest(ticker, timestamp_to_utc(ts), b)))
            .collect())
    }

    async fn fetch_minute_bar(&self, ticker: &Ticker, at: DateTime<Utc>) -> Result<Option<Bar>> {
        let to = at + chrono::Duration::minutes(1);
        let bars = self.fetch_minute_range(ticker, at, to, 1).await?;
        Ok(bars.into_iter().next())
    }

    async fn fetch_snapshot(&self) -> Result<Vec<DailyBar>> {
        let resp: SnapshotResponse = self
            .get_json("/v2/snapshot/locale/us/markets/stocks/tickers")
            .await?;
        let today = Utc::now().date_naive();
        Ok(resp
            .tickers
            .iter()
            .map(|t| DailyBar {
                ticker: Ticker::new(&t.ticker),
                market: Market::Us,
                date: today,
                open: rust_decimal::Decimal::try_from(t.day.o).unwrap_or_default(),
                high: rust_decimal::Decimal::try_from(t.day.h).unwrap_or_default(),
                low: rust_decimal::Decimal::try_from(t.day.l).unwrap_or_default(),
                close: rust_decimal::Decimal::try_from(t.day.c).unwrap_or_default(),
                volume: t.day.v,
                vwap: t.day.vw.and_then(|v| rust_decimal::Decimal::try_from(v).ok()),
                trades: None,
            })
            .collect())
    }

    async fn fetch_grouped_daily(&self, date: NaiveDate) -> Result<Vec<DailyBar>> {
        let path = format!("/v2/aggs/grouped/locale/us/market/stocks/{date}");
        let resp: GroupedDailyResponse = self.get_json(&path).await?;
        Ok(resp
            .results
            .iter()
            .filter_map(|r| {
                let symbol = r.symbol.clone()?;
                Some(DailyBar {
                    ticker: Ticker::new(symbol),
                    market: Market::Us,
                    date,
                    open: rust_decimal::Decimal::try_from(r.open).unwrap_or_default(),
                    high: rust_decimal::Decimal::try_from(r.high).unwrap_or_default(),
                    low: rust_decimal::Decimal::try_from(r.low).unwrap_or_default(),
                    close: rust_decimal::Decimal::try_from(r.close).unwrap_or_default(),
                    volume: r.volume,
                    vwap: r.vwap.and_then(|v| rust_decimal::Decimal::try_from(v).ok()),
                    trades: r.trades,
                })
            })
            .collect())
    }

    async fn fetch_minute_range(&self, ticker: &Ticker, from: DateTime<Utc>, to: DateTime<Utc>, limit: u32) -> Result<Vec<Bar>> {
        let path = format!(
            "/v2/aggs/ticker/{}/range/1/minute/{}/{}?limit={}",
            ticker, from.timestamp_millis(), to.timestamp_millis(), limit
        );
        let resp: GroupedDailyResponse = self.get_json(&path).await?;
        Ok(resp
            .results
            .iter()
            .filter_map(|r| r.timestamp.map(|ts| bar_from_rest(ticker, timestamp_to_utc(ts), r)))
            .collect())
    }

    async fn fetch_daily_range(&self, ticker: &Ticker, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<DailyBar>> {
        let path = format!(
            "/v2/aggs/ticker/{}/range/1/day/{}/{}",
            ticker, from.timestamp_millis(), to.timestamp_millis()
        );
        let resp: GroupedDailyResponse = self.get_json(&path).await?;
        Ok(resp
            .results
            .iter()
            .filter_map(|r| {
                r.timestamp.map(|ts| DailyBar {
                    ticker: ticker.clone(),
                    market: Market::Us,
                    date: timestamp_to_utc(ts).date_naive(),
                    open: rust_decimal::Decimal::try_from(r.open).unwrap_or_default(),
                    high: rust_decimal::Decimal::try_from(r.high).unwrap_or_default(),
                    low: rust_decimal::Decimal::try_from(r.low).unwrap_or_default(),
                    close: rust_decimal::Decimal::try_from(r.close).unwrap_or_default(),
                    volume: r.volume,
                    vwap: r.vwap.and_then(|v| rust_decimal::Decimal::try_from(v).ok()),
                    trades: r.trades,
                })
            })
            .collect())
    }

    async fn fetch_news(&self, ticker: &Ticker, limit: u32) -> Result<Vec<NewsItem>> {
        #[derive(Deserialize)]
        struct Publisher {
            name: String,
        }
        #[derive(Deserialize)]
        struct Insight {
            ticker: String,
            sentiment: Option<crate::model::Sentiment>,
            sentiment_reasoning: Option<String>,
        }
        #[derive(Deserialize)]
        struct RawNews {
            id: String,
            publisher: Publisher,
            title: String,
            author: Option<String>,
            published_utc: DateTime<Utc>,
            article_url: String,
            #[serde(default)]
            tickers: Vec<String>,
            image_url: Option<String>,
            description: Option<String>,
            #[serde(default)]
            keywords: Vec<String>,
            #[serde(default)]
            insights: Vec<Insight>,
        }
        #[derive(Deserialize)]
        struct NewsResponse {
            results: Vec<RawNews>,
        }

        let path = format!("/v2/reference/news?ticker={ticker}&limit={limit}&sort=published_utc");
        let resp: NewsResponse = self.get_json(&path).await?;
        Ok(resp
            .results
            .into_iter()
            .map(|raw| {
                let primary = raw.insights.iter().find(|i| i.ticker == ticker.to_string());
                NewsItem {
                    id: raw.id,
                    ticker: ticker.clone(),
                    market: Market::Us,
                    time: raw.published_utc,
                    title: raw.title,
                    url: raw.article_url,
                    source: raw.publisher.name,
                    author: raw.author,
                    description: raw.description,
                    image_url: raw.image_url,
                    keywords: raw.keywords,
                    tickers: raw.tickers.into_iter().map(Ticker::new).collect(),
                    sentiment: primary.and_then(|i| i.sentiment),
                    sentiment_reasoning: primary.and_then(|i| i.sentiment_reasoning.clone()),
                    s3_path: None,
                }
            })
            .collect())
    }

    async fn fetch_financials(&self, ticker: &Ticker, period: PeriodType, limit: u32) -> Result<Vec<Fundamentals>> {
        #[derive(Deserialize)]
        struct Financials {
            income_statement: serde_json::Value,
            balance_sheet: serde_json::Value,
            cash_flow_statement: serde_json::Value,
        }
        #[derive(Deserialize)]
        struct RawFinancials {
            end_date: NaiveDate,
            start_date: Option<NaiveDate>,
            filing_date: Option<NaiveDate>,
            fiscal_period: Option<String>,
            fiscal_year: Option<String>,
            company_name: Option<String>,
            cik: Option<String>,
            sic: Option<String>,
            financials: Financials,
        }
        #[derive(Deserialize)]
        struct FinancialsResponse {
            results: Vec<RawFinancials>,
        }

        let path = format!("/vX/reference/financials?ticker={ticker}&limit={limit}");
        match self.get_json::<FinancialsResponse>(&path).await {
            Ok(resp) => Ok(resp
                .results
                .into_iter()
                .map(|raw| Fundamentals {
                    ticker: ticker.clone(),
                    market: Market::Us,
                    period_type: period,
                    end_date: raw.end_date,
                    start_date: raw.start_date,
                    filing_date: raw.filing_date,
                    fiscal_period: raw.fiscal_period,
                    fiscal_year: raw.fiscal_year,
                    company_name: raw.company_name,
                    cik: raw.cik,
                    sic: raw.sic,
                    income_statement: raw.financials.income_statement,
                    balance_sheet: raw.financials.balance_sheet,
                    cash_flow_statement: raw.financials.cash_flow_statement,
                })
                .collect()),
            Err(e) if matches!(e.downcast_ref::<IngestError>(), Some(IngestError::NotAvailable(_))) => Ok(vec![]),
            Err(e) => Err(e),
        }
    }
}

fn timestamp_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// In-memory double: pre-seeded per-endpoint responses, for unit/integration
/// tests that exercise the scheduler and realtime backfill paths without a
/// live vendor API.
#[derive(Default, Clone)]
pub struct FakeMarketDataApi {
    pub fast_bars: Arc<parking_lot::Mutex<HashMap<String, Vec<Bar>>>>,
    pub minute_bars: Arc<parking_lot::Mutex<HashMap<String, Bar>>>,
    pub snapshot: Arc<parking_lot::Mutex<Vec<DailyBar>>>,
    pub grouped_daily: Arc<parking_lot::Mutex<Vec<DailyBar>>>,
    pub daily_range: Arc<parking_lot::Mutex<HashMap<String, Vec<DailyBar>>>>,
    pub news: Arc<parking_lot::Mutex<HashMap<String, Vec<NewsItem>>>>,
    pub financials_available: Arc<parking_lot::Mutex<bool>>,
}

impl FakeMarketDataApi {
    pub fn new() -> Self {
        Self {
            financials_available: Arc::new(parking_lot::Mutex::new(true)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MarketDataApi for FakeMarketDataApi {
    async fn fetch_fast_bars(&self, ticker: &Ticker, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Result<Vec<Bar>> {
        Ok(self.fast_bars.lock().get(ticker.as_str()).cloned().unwrap_or_default())
    }

    async fn fetch_minute_bar(&self, ticker: &Ticker, _at: DateTime<Utc>) -> Result<Option<Bar>> {
        Ok(self.minute_bars.lock().get(ticker.as_str()).cloned())
    }

    async fn fetch_snapshot(&self) -> Result<Vec<DailyBar>> {
        Ok(self.snapshot.lock().clone())
    }

    async fn fetch_grouped_daily(&self, _date: NaiveDate) -> Result<Vec<DailyBar>> {
        Ok(self.grouped_daily.lock().clone())
    }

    async fn fetch_minute_range(&self, ticker: &Ticker, _from: DateTime<Utc>, _to: DateTime<Utc>, _limit: u32) -> Result<Vec<Bar>> {
        Ok(self.fast_bars.lock().get(ticker.as_str()).cloned().unwrap_or_default())
    }

    async fn fetch_daily_range(&self, ticker: &Ticker, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Result<Vec<DailyBar>> {
        Ok(self.daily_range.lock().get(ticker.as_str()).cloned().unwrap_or_default())
    }

    async fn fetch_news(&self, ticker: &Ticker, _limit: u32) -> Result<Vec<NewsItem>> {
        Ok(self.news.lock().get(ticker.as_str()).cloned().unwrap_or_default())
    }

    async fn fetch_financials(&self, ticker: &Ticker, period: PeriodType, _limit: u32) -> Result<Vec<Fundamentals>> {
        if !*self.financials_available.lock() {
            return Ok(vec![]);
        }
        Ok(vec![Fundamentals {
            ticker: ticker.clone(),
            market: Market::Us,
            period_type: period,
            end_date: Utc::now().date_naive(),
            start_date: None,
            filing_date: None,
            fiscal_period: None,
            fiscal_year: None,
            company_name: None,
            cik: None,
            sic: None,
            income_statement: serde_json::json!({}),
            balance_sheet: serde_json::json!({}),
            cash_flow_statement: serde_json::json!({}),
        }])
    }
}
