//! Core record types. Identity fields are documented on each struct;
//! TSWriter is the only place that turns these into storage points.

use crate::ticker::{Market, Ticker};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A one-minute bar. Identity = `(ticker, market, time)`; `time` is the
/// bar's start. Overwritten in place by a later producer at the same
/// identity (SIP overwrites IEX).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: Ticker,
    pub market: Market,
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub vwap: Option<Decimal>,
    pub trades: Option<i64>,
    pub change: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub previous_close: Option<Decimal>,
}

impl Bar {
    /// Bars with sentinel-invalid fields (missing open/close, or a
    /// nonsensical time) are dropped before write, not written.
    pub fn is_valid(&self) -> bool {
        self.open > Decimal::ZERO && self.close > Decimal::ZERO
    }
}

/// A daily bar. Identity = `(ticker, market, date)`. Created by snapshot
/// (intraday, best-effort) or grouped-daily (EOD, authoritative); EOD
/// overwrites intraday by identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub ticker: Ticker,
    pub market: Market,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub vwap: Option<Decimal>,
    pub trades: Option<i64>,
}

impl DailyBar {
    pub fn change(&self) -> Decimal {
        self.close - self.open
    }

    pub fn change_percent(&self) -> Option<Decimal> {
        if self.open.is_zero() {
            None
        } else {
            Some((self.close - self.open) / self.open * Decimal::ONE_HUNDRED)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.open > Decimal::ZERO && self.close > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// A news item. Identity = `(id, ticker)`. The object-store body (if
/// fetched) is the single source of truth for article text; the
/// time-series record carries only metadata plus `s3_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: String,
    pub ticker: Ticker,
    pub market: Market,
    pub time: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub source: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub keywords: Vec<String>,
    pub tickers: Vec<Ticker>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_reasoning: Option<String>,
    pub s3_path: Option<String>,
}

impl NewsItem {
    /// `raw/news/<ticker>/<YYYY-MM-DD>/<id>.json`.
    pub fn object_key(&self) -> String {
        format!(
            "raw/news/{}/{}/{}.json",
            self.ticker,
            self.time.format("%Y-%m-%d"),
            self.id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Quarterly,
    Annual,
}

/// Identity = `(ticker, market, periodType, end_date)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fundamentals {
    pub ticker: Ticker,
    pub market: Market,
    pub period_type: PeriodType,
    pub end_date: NaiveDate,
    pub start_date: Option<NaiveDate>,
    pub filing_date: Option<NaiveDate>,
    pub fiscal_period: Option<String>,
    pub fiscal_year: Option<String>,
    pub company_name: Option<String>,
    pub cik: Option<String>,
    pub sic: Option<String>,
    /// Flattened income-statement / balance-sheet / cash-flow scalars,
    /// keyed by the upstream field name. Kept generic because the upstream
    /// schema's line items vary by filer.
    pub income_statement: serde_json::Value,
    pub balance_sheet: serde_json::Value,
    pub cash_flow_statement: serde_json::Value,
}

/// Process-local ordered, case-normalised set of tickers. Persistence is
/// out of scope; initialised from `Config::default_watchlist`.
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    tickers: BTreeSet<Ticker>,
}

impl Watchlist {
    pub fn from_iter(tickers: impl IntoIterator<Item = impl Into<Ticker>>) -> Self {
        Self {
            tickers: tickers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add(&mut self, ticker: impl Into<Ticker>) -> bool {
        self.tickers.insert(ticker.into())
    }

    pub fn remove(&mut self, ticker: &Ticker) -> bool {
        self.tickers.remove(ticker)
    }

    pub fn contains(&self, ticker: &Ticker) -> bool {
        self.tickers.contains(ticker)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ticker> {
        self.tickers.iter()
    }

    pub fn as_vec(&self) -> Vec<Ticker> {
        self.tickers.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn news_object_key_layout() {
        let item = NewsItem {
            id: "n1".into(),
            ticker: Ticker::new("AAPL"),
            market: Market::Us,
            time: "2025-01-15T10:00:00Z".parse().unwrap(),
            title: "t".into(),
            url: "https://x/y".into(),
            source: "S".into(),
            author: None,
            description: None,
            image_url: None,
            keywords: vec![],
            tickers: vec![],
            sentiment: None,
            sentiment_reasoning: None,
            s3_path: None,
        };
        assert_eq!(item.object_key(), "raw/news/AAPL/2025-01-15/n1.json");
    }

    #[test]
    fn watchlist_add_is_idempotent_and_uppercases() {
        let mut wl = Watchlist::default();
        assert!(wl.add("tsla"));
        assert!(!wl.add("TSLA"));
        assert_eq!(wl.len(), 1);
        assert!(wl.contains(&Ticker::new("tsla")));
    }

    #[test]
    fn daily_bar_change_percent() {
        let bar = DailyBar {
            ticker: Ticker::new("AAPL"),
            market: Market::Us,
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            open: Decimal::new(10000, 2),
            high: Decimal::new(10100, 2),
            low: Decimal::new(9900, 2),
            close: Decimal::new(10050, 2),
            volume: 100,
            vwap: None,
            trades: None,
        };
        assert_eq!(bar.change(), Decimal::new(50, 2));
        assert_eq!(bar.change_percent(), Some(Decimal::new(50, 2)));
    }
}
