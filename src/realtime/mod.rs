//! RealtimeFeed: the streaming connection manager. Both the fast (IEX)
//! and delayed (SIP) feeds share one state machine and differ only in
//! wire protocol and subscription channel — see `FeedKind`.

mod wire;

use crate::error::IngestError;
use crate::market_status::{MarketStatus, MarketStatusChecker};
use crate::model::Bar;
use crate::stitching;
use crate::ticker::Ticker;
use crate::tswriter::TSWriter;
use crate::upstream::MarketDataApi;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const MARKET_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PONG_DEADLINE: Duration = Duration::from_secs(10);
const DELAYED_CLOSE_GRACE: chrono::Duration = chrono::Duration::minutes(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticated,
    Connected,
    Closing,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Fast,
    Delayed,
}

impl FeedKind {
    fn label(self) -> &'static str {
        match self {
            FeedKind::Fast => "fastFeed",
            FeedKind::Delayed => "delayedFeed",
        }
    }

    /// Fast feed connects only during regular hours; the delayed feed
    /// stays up through `close + 15 min` so the tail of delayed bars
    /// arrives before disconnect.
    fn should_connect(self, status: MarketStatus, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self {
            FeedKind::Fast => status.is_open,
            FeedKind::Delayed => {
                status.is_open
                    || (status.after_hours
                        && crate::market_status::eastern_hour_minute(now).0 < 16 + (DELAYED_CLOSE_GRACE.num_minutes() / 60) as u32 + 1)
            }
        }
    }
}

#[derive(Debug)]
enum Command {
    Subscribe(Vec<Ticker>),
    Unsubscribe(Vec<Ticker>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct FeedStatus {
    pub state: ConnectionState,
    pub subscriptions: Vec<Ticker>,
}

pub struct RealtimeFeed {
    kind: FeedKind,
    ws_url: String,
    market: Arc<MarketStatusChecker>,
    writer: Arc<TSWriter>,
    upstream: Arc<dyn MarketDataApi>,
    api_key: SyncMutex<Option<String>>,
    state: SyncMutex<ConnectionState>,
    subscriptions: SyncMutex<HashSet<Ticker>>,
    pending: SyncMutex<HashSet<Ticker>>,
    should_be_connected: AtomicBool,
    reconnect_attempts: AtomicU32,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: AsyncMutex<Option<mpsc::Receiver<Command>>>,
}

impl RealtimeFeed {
    pub fn new(
        kind: FeedKind,
        ws_url: impl Into<String>,
        market: Arc<MarketStatusChecker>,
        writer: Arc<TSWriter>,
        upstream: Arc<dyn MarketDataApi>,
    ) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        Arc::new(Self {
            kind,
            ws_url: ws_url.into(),
            market,
            writer,
            upstream,
            api_key: SyncMutex::new(None),
            state: SyncMutex::new(ConnectionState::Idle),
            subscriptions: SyncMutex::new(HashSet::new()),
            pending: SyncMutex::new(HashSet::new()),
            should_be_connected: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            cmd_tx,
            cmd_rx: AsyncMutex::new(Some(cmd_rx)),
        })
    }

    pub fn set_api_key(&self, key: String) {
        *self.api_key.lock() = Some(key);
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            state: *self.state.lock(),
            subscriptions: self.subscriptions.lock().iter().cloned().collect(),
        }
    }

    /// Sets the connect intent and starts the market monitor. Does not
    /// itself open a socket — the monitor drives that.
    pub fn connect(self: &Arc<Self>) {
        self.should_be_connected.store(true, Ordering::SeqCst);
        let this = self.clone();
        tokio::spawn(async move { this.market_monitor_loop().await });
    }

    pub async fn subscribe(&self, tickers: Vec<Ticker>) {
        let new: Vec<Ticker> = {
            let subs = self.subscriptions.lock();
            let pending = self.pending.lock();
            tickers
                .into_iter()
                .filter(|t| !subs.contains(t) && !pending.contains(t))
                .collect()
        };
        if new.is_empty() {
            return;
        }
        let connected = *self.state.lock() == ConnectionState::Connected;
        if connected {
            self.subscriptions.lock().extend(new.iter().cloned());
            let _ = self.cmd_tx.send(Command::Subscribe(new.clone())).await;
        } else {
            self.pending.lock().extend(new.iter().cloned());
        }

        if self.kind == FeedKind::Fast {
            for ticker in new {
                self.backfill_stage2(&ticker).await;
            }
        }
    }

    pub fn unsubscribe(&self, tickers: &[Ticker]) {
        for t in tickers {
            self.subscriptions.lock().remove(t);
            self.pending.lock().remove(t);
        }
        let _ = self.cmd_tx.try_send(Command::Unsubscribe(tickers.to_vec()));
    }

    pub async fn shutdown(&self) {
        self.should_be_connected.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    /// GET `[now-15min, now]` 1-minute bars for a newly subscribed ticker,
    /// re-clip defensively, and write through TSWriter.
    async fn backfill_stage2(&self, ticker: &Ticker) {
        let now = chrono::Utc::now();
        let (from, to) = stitching::stage2_window(now);
        match self.upstream.fetch_fast_bars(ticker, from, to).await {
            Ok(bars) => {
                let clipped = stitching::clip_stage2(bars, now, |b: &Bar| b.time);
                if let Err(e) = self.writer.write_quotes(&clipped).await {
                    warn!(ticker = %ticker, error = %e, "stage-2 backfill write failed");
                }
            }
            Err(e) => warn!(ticker = %ticker, error = %e, "stage-2 backfill fetch failed"),
        }
    }

    async fn market_monitor_loop(self: Arc<Self>) {
        let mut tick = interval(MARKET_CHECK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            if !self.should_be_connected.load(Ordering::SeqCst) {
                return;
            }
            self.evaluate_connection().await;
            tick.tick().await;
        }
    }

    async fn evaluate_connection(self: &Arc<Self>) {
        let status = self.market.get().await;
        let now = chrono::Utc::now();
        let should = self.kind.should_connect(status, now);
        let state = *self.state.lock();

        match state {
            ConnectionState::Idle if should && self.should_be_connected.load(Ordering::SeqCst) => {
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                let this = self.clone();
                tokio::spawn(async move { this.connect_and_run().await });
            }
            ConnectionState::Connected if !should => {
                info!(feed = self.kind.label(), "market closed for this feed, closing intentionally");
                *self.state.lock() = ConnectionState::Idle;
            }
            _ => debug!(feed = self.kind.label(), ?state, should, "monitor tick, holding"),
        }
    }

    async fn connect_and_run(self: Arc<Self>) {
        *self.state.lock() = ConnectionState::Connecting;
        match self.run_connection().await {
            Ok(()) => {
                info!(feed = self.kind.label(), "connection closed cleanly");
            }
            Err(e) => {
                if e.downcast_ref::<IngestError>().map(IngestError::is_retryable) == Some(false) {
                    error!(feed = self.kind.label(), error = %e, "fatal feed error, not reconnecting");
                    *self.state.lock() = ConnectionState::Idle;
                    return;
                }
                warn!(feed = self.kind.label(), error = %e, "connection error");
            }
        }
        *self.state.lock() = ConnectionState::Idle;
        self.maybe_reconnect().await;
    }

    async fn maybe_reconnect(self: Arc<Self>) {
        if !self.should_be_connected.load(Ordering::SeqCst) {
            return;
        }
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            error!(feed = self.kind.label(), "max reconnect attempts exhausted, giving up");
            return;
        }
        *self.state.lock() = ConnectionState::Reconnecting;
        let delay = RECONNECT_BASE_DELAY * attempt;
        info!(feed = self.kind.label(), attempt, delay_secs = delay.as_secs(), "scheduling reconnect");
        sleep(delay).await;

        let status = self.market.get().await;
        if !self.kind.should_connect(status, chrono::Utc::now()) {
            info!(feed = self.kind.label(), "market closed before reconnect fired, cancelling");
            self.reconnect_attempts.store(0, Ordering::SeqCst);
            *self.state.lock() = ConnectionState::Idle;
            return;
        }
        *self.state.lock() = ConnectionState::Idle;
        let this = self.clone();
        tokio::spawn(async move { this.connect_and_run().await });
    }

    async fn run_connection(self: &Arc<Self>) -> Result<()> {
        let (ws_stream, _resp) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        if let Some(auth_msg) = wire::auth_message(self.kind, self.api_key.lock().clone()) {
            write.send(Message::Text(auth_msg)).await?;
        }

        *self.state.lock() = ConnectionState::Authenticated;
        self.resubscribe_all(&mut write).await?;
        *self.state.lock() = ConnectionState::Connected;
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        let mut cmd_rx_guard = self.cmd_rx.lock().await;
        let cmd_rx = cmd_rx_guard.as_mut().expect("command channel taken twice");

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut awaiting_pong = false;
        let mut pong_timer = Box::pin(sleep(Duration::from_secs(u64::MAX)));

        loop {
            tokio::select! {
                _ = heartbeat.tick(), if self.kind == FeedKind::Delayed && !awaiting_pong => {
                    write.send(Message::Ping(vec![])).await?;
                    awaiting_pong = true;
                    pong_timer.as_mut().reset(tokio::time::Instant::now() + PONG_DEADLINE);
                }
                _ = &mut pong_timer, if awaiting_pong => {
                    anyhow::bail!(IngestError::Transient("pong deadline exceeded".into()));
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Subscribe(tickers)) => {
                            wire::send_subscribe(self.kind, &mut write, &tickers).await?;
                        }
                        Some(Command::Unsubscribe(tickers)) => {
                            wire::send_unsubscribe(self.kind, &mut write, &tickers).await?;
                        }
                        Some(Command::Shutdown) | None => {
                            *self.state.lock() = ConnectionState::Closing;
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        anyhow::bail!(IngestError::Transient("stream ended".into()));
                    };
                    match msg {
                        Ok(Message::Text(text)) => self.handle_message(&text).await,
                        Ok(Message::Pong(_)) => { awaiting_pong = false; }
                        Ok(Message::Ping(payload)) => { write.send(Message::Pong(payload)).await?; }
                        Ok(Message::Close(_)) => anyhow::bail!(IngestError::Transient("peer closed".into())),
                        Ok(_) => {}
                        Err(e) => anyhow::bail!(IngestError::Transient(format!("ws error: {e}"))),
                    }
                }
            }
        }
    }

    async fn resubscribe_all<S>(&self, write: &mut S) -> Result<()>
    where
        S: futures_util::Sink<Message> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let union: Vec<Ticker> = {
            let subs = self.subscriptions.lock();
            let pending: Vec<Ticker> = self.pending.lock().drain().collect();
            subs.iter().cloned().chain(pending).collect()
        };
        self.subscriptions.lock().extend(union.iter().cloned());
        if !union.is_empty() {
            wire::send_subscribe(self.kind, write, &union).await?;
        }
        Ok(())
    }

    async fn handle_message(&self, text: &str) {
        match wire::parse_bar(self.kind, text) {
            Ok(Some(bar)) => {
                if let Err(e) = self.writer.write_quotes(std::slice::from_ref(&bar)).await {
                    warn!(feed = self.kind.label(), error = %e, "failed to write streamed bar");
                }
            }
            Ok(None) => {}
            Err(e) => debug!(feed = self.kind.label(), error = %e, "dropping unparseable message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn fast_feed_connects_only_during_regular_hours() {
        let open = MarketStatus { is_open: true, early_hours: false, after_hours: false };
        let closed = MarketStatus { is_open: false, early_hours: false, after_hours: true };
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 15, 0, 0).unwrap();
        assert!(FeedKind::Fast.should_connect(open, now));
        assert!(!FeedKind::Fast.should_connect(closed, now));
    }

    #[test]
    fn delayed_feed_stays_connected_through_after_hours_tail() {
        let after_hours = MarketStatus { is_open: false, early_hours: false, after_hours: true };
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 16, 10, 0).unwrap();
        assert!(FeedKind::Delayed.should_connect(after_hours, now));
    }
}
