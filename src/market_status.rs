//! Market-hour gating. Authoritative source is the upstream market-status
//! API; falls back to time-of-day rules in US/Eastern when the API call
//! fails. Cached for 60s.

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::US::Eastern;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketStatus {
    pub is_open: bool,
    pub early_hours: bool,
    pub after_hours: bool,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    market: String,
    #[serde(default)]
    after_hours: Option<bool>,
    #[serde(default)]
    early_hours: Option<bool>,
}

struct CacheEntry {
    status: MarketStatus,
    fetched_at: Instant,
}

/// Fetches `/v1/marketstatus/now` with a 60s TTL cache; falls back to the
/// time-of-day rule table when the upstream call errors.
pub struct MarketStatusChecker {
    client: Client,
    base_url: String,
    cache: Mutex<Option<CacheEntry>>,
}

impl MarketStatusChecker {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            cache: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> MarketStatus {
        if let Some(cached) = self.cached() {
            return cached;
        }

        let status = match self.fetch().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "market-status API unavailable, using time-of-day fallback");
                time_of_day_status(Utc::now())
            }
        };

        *self.cache.lock() = Some(CacheEntry {
            status,
            fetched_at: Instant::now(),
        });
        status
    }

    fn cached(&self) -> Option<MarketStatus> {
        let guard = self.cache.lock();
        let entry = guard.as_ref()?;
        if entry.fetched_at.elapsed() < CACHE_TTL {
            Some(entry.status)
        } else {
            None
        }
    }

    async fn fetch(&self) -> Result<MarketStatus> {
        let url = format!("{}/v1/marketstatus/now", self.base_url);
        let raw: RawStatus = self.client.get(url).send().await?.json().await?;
        debug!(market = %raw.market, "fetched market status");
        Ok(MarketStatus {
            is_open: raw.market == "open",
            early_hours: raw.early_hours.unwrap_or(false) || raw.market == "extended-hours",
            after_hours: raw.after_hours.unwrap_or(false),
        })
    }
}

/// Time-of-day fallback: `earlyHours [04:00, 09:30)`, `isOpen [09:30,
/// 16:00)`, `afterHours [16:00, 20:00)`, weekends closed. US/Eastern,
/// DST-aware via `chrono_tz`.
pub fn time_of_day_status(now_utc: DateTime<Utc>) -> MarketStatus {
    let eastern = now_utc.with_timezone(&Eastern);

    if matches!(eastern.weekday(), Weekday::Sat | Weekday::Sun) {
        return MarketStatus {
            is_open: false,
            early_hours: false,
            after_hours: false,
        };
    }

    let t = eastern.time();
    let early_open = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
    let market_open = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let market_close = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
    let after_close = NaiveTime::from_hms_opt(20, 0, 0).unwrap();

    let early_hours = t >= early_open && t < market_open;
    let is_open = t >= market_open && t < market_close;
    let after_hours = t >= market_close && t < after_close;

    MarketStatus {
        is_open,
        early_hours,
        after_hours,
    }
}

/// Convenience: current minute boundary in US/Eastern, used by the
/// scheduler for cron-adjacent math without pulling in a full tz library
/// at every call site.
pub fn eastern_hour_minute(now_utc: DateTime<Utc>) -> (u32, u32) {
    let eastern = now_utc.with_timezone(&Eastern);
    (eastern.hour(), eastern.minute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn et(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Eastern
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn weekday_regular_hours() {
        // 2025-01-15 is a Wednesday.
        let status = time_of_day_status(et(2025, 1, 15, 10, 0));
        assert!(status.is_open);
        assert!(!status.early_hours);
        assert!(!status.after_hours);
    }

    #[test]
    fn weekday_early_hours() {
        let status = time_of_day_status(et(2025, 1, 15, 5, 0));
        assert!(!status.is_open);
        assert!(status.early_hours);
    }

    #[test]
    fn weekday_after_hours() {
        let status = time_of_day_status(et(2025, 1, 15, 17, 0));
        assert!(!status.is_open);
        assert!(status.after_hours);
    }

    #[test]
    fn weekend_is_always_closed() {
        // 2025-01-18 is a Saturday.
        let status = time_of_day_status(et(2025, 1, 18, 10, 0));
        assert!(!status.is_open);
        assert!(!status.early_hours);
        assert!(!status.after_hours);
    }

    #[test]
    fn boundary_open_is_inclusive() {
        let status = time_of_day_status(et(2025, 1, 15, 9, 30));
        assert!(status.is_open);
    }

    #[test]
    fn boundary_close_is_exclusive_of_open() {
        let status = time_of_day_status(et(2025, 1, 15, 16, 0));
        assert!(!status.is_open);
        assert!(status.after_hours);
    }
}
