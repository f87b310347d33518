//! Scheduler: cron-driven batch jobs, the watchlist, and backfill. Holds
//! no direct socket state — all I/O routes through `MarketDataApi` and
//! `TSWriter`/`NewsStore`, so jobs are testable by invoking `run_task`
//! directly against fakes.

use crate::market_status::MarketStatusChecker;
use crate::model::Watchlist;
use crate::news_store::NewsStore;
use crate::stitching;
use crate::ticker::{passes_filter, Ticker, TickerFilter};
use crate::tswriter::TSWriter;
use crate::upstream::MarketDataApi;
use anyhow::{bail, Result};
use chrono_tz::US::Eastern;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

const GENERAL_RATE_LIMIT: Duration = Duration::from_millis(200);
const BACKFILL_RATE_LIMIT: Duration = Duration::from_millis(300);
const SIP_CORRECTION_RATE_LIMIT: Duration = Duration::from_millis(100);
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

const JOB_SNAPSHOT: &str = "snapshot";
const JOB_SIP_MINUTE_CORRECTION: &str = "sipMinuteCorrection";
const JOB_EOD: &str = "eod";
const JOB_NEWS: &str = "news";
const JOB_FUNDAMENTALS: &str = "fundamentals";

pub struct Scheduler {
    market: Arc<MarketStatusChecker>,
    writer: Arc<TSWriter>,
    news_store: Arc<NewsStore>,
    upstream: Arc<dyn MarketDataApi>,
    watchlist: SyncMutex<Watchlist>,
    job_scheduler: AsyncMutex<Option<JobScheduler>>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        default_watchlist: Vec<String>,
        market: Arc<MarketStatusChecker>,
        writer: Arc<TSWriter>,
        news_store: Arc<NewsStore>,
        upstream: Arc<dyn MarketDataApi>,
    ) -> Arc<Self> {
        Arc::new(Self {
            market,
            writer,
            news_store,
            upstream,
            watchlist: SyncMutex::new(Watchlist::from_iter(default_watchlist)),
            job_scheduler: AsyncMutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn watchlist_snapshot(&self) -> Vec<Ticker> {
        self.watchlist.lock().as_vec()
    }

    pub fn add_to_watchlist(&self, tickers: &[Ticker]) {
        let mut wl = self.watchlist.lock();
        for t in tickers {
            if wl.add(t.clone()) {
                info!(ticker = %t, "added to watchlist");
            }
        }
    }

    pub fn remove_from_watchlist(&self, tickers: &[Ticker]) {
        let mut wl = self.watchlist.lock();
        for t in tickers {
            if wl.remove(t) {
                info!(ticker = %t, "removed from watchlist");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idempotent under repeated start/stop: a second `start()` while
    /// already running is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut scheduler = JobScheduler::new().await?;

        scheduler.add(self.job(JOB_SNAPSHOT, "0 */5 * * * Mon,Tue,Wed,Thu,Fri")?).await?;
        scheduler.add(self.job(JOB_SIP_MINUTE_CORRECTION, "0 * * * * Mon,Tue,Wed,Thu,Fri")?).await?;
        scheduler.add(self.job(JOB_EOD, "0 30 16 * * Mon,Tue,Wed,Thu,Fri")?).await?;
        scheduler.add(self.job(JOB_NEWS, "0 */15 * * * *")?).await?;
        scheduler.add(self.job(JOB_FUNDAMENTALS, "0 0 6 * * Mon,Tue,Wed,Thu,Fri")?).await?;

        scheduler.start().await?;
        *self.job_scheduler.lock().await = Some(scheduler);
        self.running.store(true, Ordering::SeqCst);
        info!("scheduler started");
        Ok(())
    }

    /// `stop` waits for cron handlers already mid-fire to return, but does
    /// not cancel their in-flight HTTP requests.
    pub async fn stop(&self) -> Result<()> {
        if let Some(mut scheduler) = self.job_scheduler.lock().await.take() {
            scheduler.shutdown().await?;
        }
        self.running.store(false, Ordering::SeqCst);
        info!("scheduler stopped");
        Ok(())
    }

    fn job(self: &Arc<Self>, name: &'static str, schedule: &str) -> Result<Job> {
        let this = self.clone();
        Ok(Job::new_async_tz(schedule, Eastern, move |_uuid, _lock| {
            let this = this.clone();
            Box::pin(async move {
                if let Err(e) = this.run_task(name).await {
                    warn!(job = name, error = %e, "scheduled job failed");
                }
            })
        })?)
    }

    /// Executes the named job once, bypassing its market gate. Used by
    /// both the cron closures above and the manual-trigger control path.
    pub async fn run_task(&self, name: &str) -> Result<()> {
        match name {
            JOB_SNAPSHOT => self.run_snapshot().await,
            JOB_SIP_MINUTE_CORRECTION => self.run_sip_minute_correction().await,
            JOB_EOD => self.run_eod().await,
            JOB_NEWS => self.run_news().await,
            JOB_FUNDAMENTALS => self.run_fundamentals().await,
            other => bail!("unknown job: {other}"),
        }
    }

    async fn gate_market_open(&self) -> bool {
        self.market.get().await.is_open
    }

    async fn run_snapshot(&self) -> Result<()> {
        if !self.gate_market_open().await {
            return Ok(());
        }
        let bars = self.upstream.fetch_snapshot().await?;
        let filtered: Vec<_> = bars
            .into_iter()
            .filter(|b| passes_filter(&b.ticker, TickerFilter::Common))
            .collect();
        let written = self.writer.write_daily_data(&filtered).await?;
        info!(written, "snapshot job complete");
        Ok(())
    }

    async fn run_sip_minute_correction(&self) -> Result<()> {
        if !self.gate_market_open().await {
            return Ok(());
        }
        let now = chrono::Utc::now();
        let target = stitching::correction_target_minute(now);
        for ticker in self.watchlist_snapshot() {
            match self.upstream.fetch_minute_bar(&ticker, target).await {
                Ok(Some(bar)) => {
                    if let Err(e) = self.writer.write_quotes(std::slice::from_ref(&bar)).await {
                        warn!(ticker = %ticker, error = %e, "sip minute correction write failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(ticker = %ticker, error = %e, "sip minute correction fetch failed"),
            }
            sleep(SIP_CORRECTION_RATE_LIMIT).await;
        }
        Ok(())
    }

    async fn run_eod(&self) -> Result<()> {
        let today = chrono::Utc::now().date_naive();
        let grouped = self.upstream.fetch_grouped_daily(today).await?;
        let filtered: Vec<_> = grouped
            .into_iter()
            .filter(|b| passes_filter(&b.ticker, TickerFilter::Common))
            .collect();
        let daily_written = self.writer.write_daily_data(&filtered).await?;

        let mut minute_written = 0;
        for ticker in self.watchlist_snapshot() {
            let day_start = today.and_hms_opt(0, 0, 0).unwrap().and_utc();
            let day_end = today.and_hms_opt(23, 59, 59).unwrap().and_utc();
            match self.upstream.fetch_minute_range(&ticker, day_start, day_end, 1_000).await {
                Ok(bars) => {
                    minute_written += self.writer.write_quotes(&bars).await?;
                }
                Err(e) => warn!(ticker = %ticker, error = %e, "eod minute correction fetch failed"),
            }
            sleep(GENERAL_RATE_LIMIT).await;
        }
        info!(daily_written, minute_written, "eod job complete");
        Ok(())
    }

    async fn run_news(&self) -> Result<()> {
        for ticker in self.watchlist_snapshot() {
            match self.upstream.fetch_news(&ticker, 20).await {
                Ok(items) => {
                    if let Err(e) = self.news_store.ingest(items).await {
                        warn!(ticker = %ticker, error = %e, "news ingest failed");
                    }
                }
                Err(e) => warn!(ticker = %ticker, error = %e, "news fetch failed"),
            }
            sleep(GENERAL_RATE_LIMIT).await;
        }
        Ok(())
    }

    async fn run_fundamentals(&self) -> Result<()> {
        for ticker in self.watchlist_snapshot() {
            match self
                .upstream
                .fetch_financials(&ticker, crate::model::PeriodType::Quarterly, 4)
                .await
            {
                Ok(items) if items.is_empty() => {
                    info!(ticker = %ticker, "fundamentals not available, skipping");
                }
                Ok(items) => {
                    if let Err(e) = self.writer.write_fundamentals(&items).await {
                        warn!(ticker = %ticker, error = %e, "fundamentals write failed");
                    }
                }
                Err(e) => warn!(ticker = %ticker, error = %e, "fundamentals fetch failed"),
            }
            sleep(GENERAL_RATE_LIMIT).await;
        }
        Ok(())
    }

    /// Stage 1 backfill: daily aggregates for the trailing 30 days plus
    /// minute aggregates re-clipped to `time <= now - 15 min`.
    pub async fn backfill_history(&self, symbols: &[Ticker]) -> Result<()> {
        let now = chrono::Utc::now();
        let (from, to) = stitching::backfill_history_window(now);
        for ticker in symbols {
            match self.upstream.fetch_daily_range(ticker, from, to).await {
                Ok(daily) => {
                    if let Err(e) = self.writer.write_daily_data(&daily).await {
                        warn!(ticker = %ticker, error = %e, "backfill daily write failed");
                    }
                }
                Err(e) => warn!(ticker = %ticker, error = %e, "backfill daily fetch failed"),
            }

            match self.upstream.fetch_minute_range(ticker, from, to, 50_000).await {
                Ok(minute_bars) => {
                    let clipped = stitching::clip_stage1(minute_bars, now, |b| b.time);
                    if let Err(e) = self.writer.write_quotes(&clipped).await {
                        warn!(ticker = %ticker, error = %e, "backfill minute write failed");
                    }
                }
                Err(e) => warn!(ticker = %ticker, error = %e, "backfill minute fetch failed"),
            }

            sleep(BACKFILL_RATE_LIMIT).await;
        }
        Ok(())
    }
}
