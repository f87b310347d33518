//! Ticker symbols, markets, and the `common`-stock filter applied before
//! any all-tickers bulk write.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An uppercase ASCII ticker symbol (1-5 letters for mainboard names).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticker(String);

impl Ticker {
    /// Normalise to uppercase; does not validate shape (the filter below
    /// handles rejecting non-mainboard/non-common symbols at write time).
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ticker {
    fn from(s: &str) -> Self {
        Ticker::new(s)
    }
}

impl From<String> for Ticker {
    fn from(s: String) -> Self {
        Ticker::new(s)
    }
}

/// Markets this worker is aware of; only `US` is driven end-to-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Us,
    Cn,
    Hk,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Us => "US",
            Market::Cn => "CN",
            Market::Hk => "HK",
        }
    }
}

impl Default for Market {
    fn default() -> Self {
        Market::Us
    }
}

/// Filter policy applied to all-tickers bulk jobs (snapshot, grouped daily).
/// Watchlist-driven writes never go through this filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerFilter {
    All,
    Mainboard,
    Common,
}

/// `true` iff `ticker` passes `filter`. Watchlist callers should not call
/// this at all — they always pass — but it is total over any input.
pub fn passes_filter(ticker: &Ticker, filter: TickerFilter) -> bool {
    match filter {
        TickerFilter::All => true,
        TickerFilter::Mainboard => is_mainboard(ticker.as_str()),
        TickerFilter::Common => is_mainboard(ticker.as_str()) && !is_warrant_unit_or_right(ticker.as_str()),
    }
}

fn is_mainboard(symbol: &str) -> bool {
    let len = symbol.chars().count();
    (1..=5).contains(&len) && symbol.chars().all(|c| c.is_ascii_uppercase())
}

/// Excludes warrants/units/rights: `[A-Z]{4}(W|U|R)` and `[A-Z]{3}WS`.
fn is_warrant_unit_or_right(symbol: &str) -> bool {
    let chars: Vec<char> = symbol.chars().collect();
    if chars.len() == 5 {
        let (head, tail) = (&chars[..4], chars[4]);
        if head.iter().all(|c| c.is_ascii_uppercase()) && matches!(tail, 'W' | 'U' | 'R') {
            return true;
        }
    }
    if chars.len() == 5 && chars[3] == 'W' && chars[4] == 'S' {
        let head = &chars[..3];
        if head.iter().all(|c| c.is_ascii_uppercase()) {
            return true;
        }
    }
    false
}
