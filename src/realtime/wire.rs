//! Per-feed wire encoding: auth/subscribe message bodies and bar event
//! parsing. The fast feed speaks the vendor streaming SDK's JSON actions;
//! the delayed feed speaks the documented `auth`/`subscribe` + `AM` event
//! protocol.

use super::FeedKind;
use crate::model::Bar;
use crate::ticker::{Market, Ticker};
use anyhow::Result;
use futures_util::SinkExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

pub fn auth_message(kind: FeedKind, api_key: Option<String>) -> Option<String> {
    let key = api_key?;
    let payload = match kind {
        FeedKind::Fast => serde_json::json!({ "action": "auth", "key": key }),
        FeedKind::Delayed => serde_json::json!({ "action": "auth", "params": key }),
    };
    Some(payload.to_string())
}

pub async fn send_subscribe<S>(kind: FeedKind, write: &mut S, tickers: &[Ticker]) -> Result<()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    if tickers.is_empty() {
        return Ok(());
    }
    let payload = match kind {
        FeedKind::Fast => serde_json::json!({
            "action": "subscribe",
            "bars": tickers.iter().map(Ticker::to_string).collect::<Vec<_>>(),
        }),
        FeedKind::Delayed => {
            let params = tickers
                .iter()
                .map(|t| format!("AM.{t}"))
                .collect::<Vec<_>>()
                .join(",");
            serde_json::json!({ "action": "subscribe", "params": params })
        }
    };
    write.send(Message::Text(payload.to_string())).await?;
    Ok(())
}

pub async fn send_unsubscribe<S>(kind: FeedKind, write: &mut S, tickers: &[Ticker]) -> Result<()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    if tickers.is_empty() {
        return Ok(());
    }
    let payload = match kind {
        FeedKind::Fast => serde_json::json!({
            "action": "unsubscribe",
            "bars": tickers.iter().map(Ticker::to_string).collect::<Vec<_>>(),
        }),
        FeedKind::Delayed => {
            let params = tickers
                .iter()
                .map(|t| format!("AM.{t}"))
                .collect::<Vec<_>>()
                .join(",");
            serde_json::json!({ "action": "unsubscribe", "params": params })
        }
    };
    write.send(Message::Text(payload.to_string())).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct FastBarEvent {
    #[serde(rename = "T")]
    event_type: String,
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: i64,
    #[serde(rename = "t")]
    time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct DelayedAggEvent {
    ev: String,
    #[serde(default)]
    sym: Option<String>,
    #[serde(default)]
    s: Option<i64>,
    #[serde(default)]
    o: Option<f64>,
    #[serde(default)]
    h: Option<f64>,
    #[serde(default)]
    l: Option<f64>,
    #[serde(default)]
    c: Option<f64>,
    #[serde(default)]
    v: Option<i64>,
    #[serde(default)]
    vw: Option<f64>,
    #[serde(default)]
    z: Option<i64>,
}

/// `Ok(None)` for non-bar messages (status/ack frames); `Err` only for
/// genuinely malformed JSON, which the caller logs and drops.
pub fn parse_bar(kind: FeedKind, text: &str) -> Result<Option<Bar>> {
    match kind {
        FeedKind::Fast => parse_fast_bar(text),
        FeedKind::Delayed => parse_delayed_bars(text).map(|mut v| v.pop()),
    }
}

fn parse_fast_bar(text: &str) -> Result<Option<Bar>> {
    let event: FastBarEvent = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(_) => return Ok(None),
    };
    if event.event_type != "b" {
        return Ok(None);
    }
    Ok(Some(Bar {
        ticker: Ticker::new(event.symbol),
        market: Market::Us,
        time: event.time,
        open: Decimal::try_from(event.open).unwrap_or_default(),
        high: Decimal::try_from(event.high).unwrap_or_default(),
        low: Decimal::try_from(event.low).unwrap_or_default(),
        close: Decimal::try_from(event.close).unwrap_or_default(),
        volume: event.volume,
        vwap: None,
        trades: None,
        change: None,
        change_percent: None,
        previous_close: None,
    }))
}

fn parse_delayed_bars(text: &str) -> Result<Vec<Bar>> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Ok(vec![]),
    };
    let events: Vec<DelayedAggEvent> = if value.is_array() {
        serde_json::from_value(value).unwrap_or_default()
    } else {
        serde_json::from_value(value).map(|e| vec![e]).unwrap_or_default()
    };

    Ok(events
        .into_iter()
        .filter(|e| e.ev == "AM")
        .filter_map(|e| {
            let (Some(sym), Some(s), Some(o), Some(h), Some(l), Some(c), Some(v)) =
                (e.sym, e.s, e.o, e.h, e.l, e.c, e.v)
            else {
                tracing::warn!("delayed-feed AM event missing required field, dropping");
                return None;
            };
            Some(Bar {
                ticker: Ticker::new(sym),
                market: Market::Us,
                time: chrono::DateTime::from_timestamp_millis(s).unwrap_or_else(chrono::Utc::now),
                open: Decimal::try_from(o).unwrap_or_default(),
                high: Decimal::try_from(h).unwrap_or_default(),
                low: Decimal::try_from(l).unwrap_or_default(),
                close: Decimal::try_from(c).unwrap_or_default(),
                volume: v,
                vwap: e.vw.and_then(|x| Decimal::try_from(x).ok()),
                trades: e.z,
                change: None,
                change_percent: None,
                previous_close: None,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delayed_am_event_maps_fields() {
        let text = r#"{"ev":"AM","sym":"AAPL","s":1700000000000,"o":100.0,"h":101.0,"l":99.5,"c":100.8,"v":1000,"vw":100.4,"z":50}"#;
        let bar = parse_bar(FeedKind::Delayed, text).unwrap().unwrap();
        assert_eq!(bar.ticker, Ticker::new("AAPL"));
        assert_eq!(bar.trades, Some(50));
    }

    #[test]
    fn delayed_status_event_is_not_a_bar() {
        let text = r#"{"ev":"status","message":"connected"}"#;
        assert!(parse_bar(FeedKind::Delayed, text).unwrap().is_none());
    }

    #[test]
    fn delayed_am_missing_field_drops_with_warning() {
        let text = r#"{"ev":"AM","sym":"AAPL","s":1700000000000,"o":100.0}"#;
        assert!(parse_bar(FeedKind::Delayed, text).unwrap().is_none());
    }

    #[test]
    fn fast_bar_event_maps_fields() {
        let text = r#"{"T":"b","S":"TSLA","o":200.0,"h":201.0,"l":199.0,"c":200.5,"v":500,"t":"2025-01-15T10:00:00Z"}"#;
        let bar = parse_bar(FeedKind::Fast, text).unwrap().unwrap();
        assert_eq!(bar.ticker, Ticker::new("TSLA"));
        assert_eq!(bar.volume, 500);
    }
}
