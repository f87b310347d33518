//! Stateless clipping rules shared by RealtimeFeed's backfill and the
//! Scheduler's batch jobs. No coordination, locks, or queues: the engine
//! only decides which time window each producer is allowed to write into
//! and leaves identity-overwrite in the time-series store to resolve the
//! rest.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

pub const DELAY_WINDOW_MINUTES: i64 = 15;
pub const CORRECTION_BUFFER_MINUTES: i64 = 16;
pub const BACKFILL_HISTORY_DAYS: i64 = 30;

/// Stage 1: REST SIP backfill may only write bars at or before
/// `now - 15 min`.
pub fn stage1_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - ChronoDuration::minutes(DELAY_WINDOW_MINUTES)
}

/// Stage 1 clip, applied defensively to whatever a backfill call actually
/// returned.
pub fn clip_stage1<T>(items: Vec<T>, now: DateTime<Utc>, time_of: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let cutoff = stage1_cutoff(now);
    items.into_iter().filter(|item| time_of(item) <= cutoff).collect()
}

/// Stage 2 window: `[now - 15 min, now]`, used by fast-feed subscribe
/// backfill.
pub fn stage2_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (stage1_cutoff(now), now)
}

/// Stage 2 clip, applied defensively to whatever the REST call returned
/// (the upstream API occasionally returns bars from before the requested
/// `from`).
pub fn clip_stage2<T>(items: Vec<T>, now: DateTime<Utc>, time_of: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let (from, to) = stage2_window(now);
    items
        .into_iter()
        .filter(|item| {
            let t = time_of(item);
            t >= from && t <= to
        })
        .collect()
}

/// Layer 1/2 SIP correction target: one minute past the 15-minute delay,
/// truncated to the minute boundary so it lines up with the bar identity
/// the stream already wrote.
pub fn correction_target_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    let target = now - ChronoDuration::minutes(CORRECTION_BUFFER_MINUTES);
    truncate_to_minute(target)
}

fn truncate_to_minute(time: DateTime<Utc>) -> DateTime<Utc> {
    time - ChronoDuration::seconds(time.timestamp() % 60) - ChronoDuration::nanoseconds(time.timestamp_subsec_nanos() as i64)
}

/// Backfill history window for Stage 1: `[now - 30d, now]`.
pub fn backfill_history_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - ChronoDuration::days(BACKFILL_HISTORY_DAYS), now)
}
