//! End-of-day batching and worker lifecycle: idempotent subscribe and
//! shutdown completeness.

use equity_ingest_worker::config::Config;
use equity_ingest_worker::market_status::MarketStatusChecker;
use equity_ingest_worker::model::{DailyBar, Market};
use equity_ingest_worker::news_store::NewsStore;
use equity_ingest_worker::object_store::InMemoryObjectStore;
use equity_ingest_worker::realtime::{FeedKind, RealtimeFeed};
use equity_ingest_worker::scheduler::Scheduler;
use equity_ingest_worker::ticker::Ticker;
use equity_ingest_worker::timeseries::InMemoryTimeseriesSink;
use equity_ingest_worker::tswriter::TSWriter;
use equity_ingest_worker::upstream::{FakeMarketDataApi, MarketDataApi};
use reqwest::Client;
use rust_decimal::Decimal;
use std::sync::Arc;

fn test_config() -> Config {
    let mut cfg = Config::from_env().unwrap();
    cfg.influxdb_endpoint = "http://localhost".into();
    cfg
}

fn daily_bar(ticker: &str) -> DailyBar {
    DailyBar {
        ticker: Ticker::new(ticker),
        market: Market::Us,
        date: chrono::Utc::now().date_naive(),
        open: Decimal::new(100, 0),
        high: Decimal::new(101, 0),
        low: Decimal::new(99, 0),
        close: Decimal::new(100, 0),
        volume: 1000,
        vwap: None,
        trades: None,
    }
}

/// Base-26 uppercase-letter code of the given width, so generated test
/// tickers stay within the mainboard shape (`[A-Z]{1,5}`).
fn letter_code(mut i: usize, width: usize) -> String {
    let mut chars = vec!['A'; width];
    for slot in chars.iter_mut().rev() {
        *slot = (b'A' + (i % 26) as u8) as char;
        i /= 26;
    }
    chars.into_iter().collect()
}

fn minute_bars(ticker: &str, count: usize) -> Vec<equity_ingest_worker::model::Bar> {
    let start = chrono::Utc::now().date_naive().and_hms_opt(9, 30, 0).unwrap().and_utc();
    (0..count)
        .map(|i| equity_ingest_worker::model::Bar {
            ticker: Ticker::new(ticker),
            market: Market::Us,
            time: start + chrono::Duration::minutes(i as i64),
            open: Decimal::new(100, 0),
            high: Decimal::new(101, 0),
            low: Decimal::new(99, 0),
            close: Decimal::new(100, 0),
            volume: 10,
            vwap: None,
            trades: None,
            change: None,
            change_percent: None,
            previous_close: None,
        })
        .collect()
}

/// 7 000 grouped-daily rows pass the common filter, written in 7 batches
/// of 1 000; watchlist minute bars are written unfiltered.
#[tokio::test]
async fn eod_writes_daily_in_thousand_row_batches_and_minutes_unfiltered() {
    let sink = InMemoryTimeseriesSink::new();
    let cfg = test_config();
    let writer = Arc::new(TSWriter::with_sink(cfg.clone(), Arc::new(sink.clone())));
    let news_store = Arc::new(NewsStore::new(&cfg, Some(Arc::new(InMemoryObjectStore::new())), writer.clone()));
    let market = Arc::new(MarketStatusChecker::new(Client::new(), "http://localhost"));
    let upstream = FakeMarketDataApi::new();

    let mut grouped = Vec::new();
    for i in 0..7_000 {
        grouped.push(daily_bar(&letter_code(i, 4)));
    }
    for i in 0..2_000 {
        grouped.push(daily_bar(&format!("{}W", letter_code(i, 4))));
    }
    upstream.grouped_daily.lock().extend(grouped);

    let watchlist: Vec<String> = (0..5).map(|i| format!("W{i}")).collect();
    for w in &watchlist {
        upstream.fast_bars.lock().insert(w.clone(), minute_bars(w, 390));
    }

    let upstream: Arc<dyn MarketDataApi> = Arc::new(upstream);
    let scheduler = Scheduler::new(watchlist.clone(), market, writer, news_store, upstream);
    scheduler.run_task("eod").await.unwrap();

    let batches = sink.batches();
    let daily_batches: Vec<_> = batches
        .iter()
        .filter(|b| !b.is_empty() && b[0].render().contains("stock_quotes_aggregated"))
        .collect();
    let daily_points: usize = daily_batches.iter().map(|b| b.len()).sum();
    assert_eq!(daily_points, 7_000);
    assert_eq!(daily_batches.len(), 7);
    assert!(daily_batches.iter().all(|b| b.len() == 1_000));

    let minute_points: usize = batches
        .iter()
        .flatten()
        .filter(|p| p.render().starts_with("stock_quotes_raw"))
        .count();
    assert_eq!(minute_points, 5 * 390);
}

/// Subscribing a ticker already in-flight (subscribed but not yet
/// wire-confirmed) does not re-trigger its Stage-2 backfill fetch — the
/// dedup set must cover both confirmed and pending tickers, not just the
/// former.
#[tokio::test]
async fn resubscribing_a_pending_ticker_does_not_repeat_backfill() {
    let sink = InMemoryTimeseriesSink::new();
    let cfg = test_config();
    let writer = Arc::new(TSWriter::with_sink(cfg, Arc::new(sink.clone())));
    let market = Arc::new(MarketStatusChecker::new(Client::new(), "http://localhost"));
    let upstream = FakeMarketDataApi::new();
    let now = chrono::Utc::now();
    let recent_bar = equity_ingest_worker::model::Bar {
        ticker: Ticker::new("AAPL"),
        market: Market::Us,
        time: now - chrono::Duration::minutes(5),
        open: Decimal::new(100, 0),
        high: Decimal::new(101, 0),
        low: Decimal::new(99, 0),
        close: Decimal::new(100, 0),
        volume: 10,
        vwap: None,
        trades: None,
        change: None,
        change_percent: None,
        previous_close: None,
    };
    upstream.fast_bars.lock().insert("AAPL".to_string(), vec![recent_bar]);
    let upstream: Arc<dyn MarketDataApi> = Arc::new(upstream);
    // Never connected, so each subscribe() call leaves AAPL in `pending`
    // rather than `subscriptions` — exactly the state this dedup covers.
    let feed = RealtimeFeed::new(FeedKind::Fast, "wss://localhost", market, writer, upstream);

    feed.subscribe(vec![Ticker::new("AAPL")]).await;
    let after_first = sink.total_points();
    assert!(after_first > 0, "first subscribe should backfill");

    feed.subscribe(vec![Ticker::new("AAPL"), Ticker::new("TSLA")]).await;
    let after_second = sink.total_points();
    assert_eq!(
        after_second - after_first,
        0,
        "AAPL is already pending; only TSLA's backfill (which returns no bars) should run"
    );
}

/// After shutdown, both feeds report no outstanding intent to reconnect
/// and the scheduler reports stopped.
#[tokio::test]
async fn shutdown_stops_scheduler_and_drains_feeds() {
    let sink = InMemoryTimeseriesSink::new();
    let cfg = test_config();
    let writer = Arc::new(TSWriter::with_sink(cfg.clone(), Arc::new(sink)));
    let news_store = Arc::new(NewsStore::new(&cfg, None, writer.clone()));
    let market = Arc::new(MarketStatusChecker::new(Client::new(), "http://localhost"));
    let upstream: Arc<dyn MarketDataApi> = Arc::new(FakeMarketDataApi::new());

    let fast_feed = RealtimeFeed::new(FeedKind::Fast, "wss://localhost", market.clone(), writer.clone(), upstream.clone());
    let delayed_feed = RealtimeFeed::new(FeedKind::Delayed, "wss://localhost", market.clone(), writer.clone(), upstream.clone());
    let scheduler = Scheduler::new(vec!["AAPL".into()], market, writer, news_store, upstream);

    scheduler.start().await.unwrap();
    assert!(scheduler.is_running());

    fast_feed.shutdown().await;
    delayed_feed.shutdown().await;
    scheduler.stop().await.unwrap();

    assert!(!scheduler.is_running());
    // stop()/start() must remain safely callable again (idempotent).
    scheduler.stop().await.unwrap();
}
