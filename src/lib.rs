//! Equity ingest worker: streams and batch-corrects US-equities market
//! data into a time-series store, with article bodies mirrored to object
//! storage. See each module for its piece of the pipeline; `stitching`
//! holds the cross-cutting clipping rules that make the whole thing
//! converge to one authoritative series per bar.

pub mod config;
pub mod control;
pub mod error;
pub mod market_status;
pub mod model;
pub mod news_store;
pub mod object_store;
pub mod realtime;
pub mod sanitize;
pub mod scheduler;
pub mod secrets;
pub mod stitching;
pub mod ticker;
pub mod timeseries;
pub mod tswriter;
pub mod upstream;
