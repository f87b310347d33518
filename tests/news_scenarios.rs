//! News ingestion scenarios: fetch-disabled metadata-only writes, and
//! fetch-enabled writes where extracted content is too short to keep.

use equity_ingest_worker::config::Config;
use equity_ingest_worker::model::{NewsItem, Sentiment};
use equity_ingest_worker::news_store::NewsStore;
use equity_ingest_worker::object_store::InMemoryObjectStore;
use equity_ingest_worker::ticker::{Market, Ticker};
use equity_ingest_worker::timeseries::InMemoryTimeseriesSink;
use equity_ingest_worker::tswriter::TSWriter;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn item(url: String) -> NewsItem {
    NewsItem {
        id: "n1".into(),
        ticker: Ticker::new("AAPL"),
        market: Market::Us,
        time: "2025-01-15T10:00:00Z".parse().unwrap(),
        title: "t".into(),
        url,
        source: "S".into(),
        author: None,
        description: None,
        image_url: None,
        keywords: vec![],
        tickers: vec![],
        sentiment: Some(Sentiment::Positive),
        sentiment_reasoning: None,
        s3_path: None,
    }
}

/// Fetch disabled, no bucket configured — metadata-only write, no
/// object-store PUT, `s3_path` absent from the rendered record.
#[tokio::test]
async fn fetch_disabled_writes_metadata_only_no_object_put() {
    let mut cfg = Config::from_env().unwrap();
    cfg.influxdb_endpoint = "http://localhost".into();
    cfg.data_bucket = "".into();
    cfg.fetch_news_content = false;

    let sink = InMemoryTimeseriesSink::new();
    let writer = Arc::new(TSWriter::with_sink(cfg.clone(), Arc::new(sink.clone())));
    let object_store = InMemoryObjectStore::new();
    let store = NewsStore::new(&cfg, Some(Arc::new(object_store.clone())), writer);

    let count = store.ingest(vec![item("https://x/y".into())]).await.unwrap();

    assert_eq!(count, 1);
    assert!(object_store.puts().is_empty());
    assert_eq!(sink.total_points(), 1);
    let line = sink.batches()[0][0].render();
    assert!(line.contains("ticker=AAPL"));
    assert!(line.contains("market=US"));
    assert!(line.contains("source=\"S\""));
    assert!(!line.contains("s3_path"));
}

/// Fetch enabled, extracted content under the minimum length — body
/// still uploaded (without a `content` field), metadata carries
/// `has-content=false`, and the time-series record still gets `s3_path`.
#[tokio::test]
async fn fetch_enabled_short_content_still_uploads_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/short"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>too short</body></html>"))
        .mount(&server)
        .await;

    let mut cfg = Config::from_env().unwrap();
    cfg.influxdb_endpoint = "http://localhost".into();
    cfg.data_bucket = "bucket".into();
    cfg.fetch_news_content = true;

    let sink = InMemoryTimeseriesSink::new();
    let writer = Arc::new(TSWriter::with_sink(cfg.clone(), Arc::new(sink.clone())));
    let object_store = InMemoryObjectStore::new();
    let store = NewsStore::new(&cfg, Some(Arc::new(object_store.clone())), writer);

    let count = store.ingest(vec![item(format!("{}/short", server.uri()))]).await.unwrap();

    assert_eq!(count, 1);
    let puts = object_store.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].3.get("has-content"), Some(&"false".to_string()));

    let line = sink.batches()[0][0].render();
    assert!(line.contains("s3_path=\"s3://bucket/"));
}

/// Per-record write path: sanitisation or transport failure on one record
/// does not block the rest of the batch from reaching the store.
#[tokio::test]
async fn one_record_per_write_keeps_unrelated_items_independent() {
    let mut cfg = Config::from_env().unwrap();
    cfg.influxdb_endpoint = "http://localhost".into();
    cfg.fetch_news_content = false;

    let sink = InMemoryTimeseriesSink::new();
    let writer = Arc::new(TSWriter::with_sink(cfg.clone(), Arc::new(sink.clone())));
    let store = NewsStore::new(&cfg, None, writer);

    let mut first = item("https://x/y".into());
    first.id = "n1".into();
    let mut second = item("https://x/z".into());
    second.id = "n2".into();

    let count = store.ingest(vec![first, second]).await.unwrap();

    assert_eq!(count, 2);
    assert_eq!(sink.batches().len(), 2, "news writes go one record per batch, not one combined batch");
}
