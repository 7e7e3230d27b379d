//! # hitcrab Core
//!
//! Windowed streaming aggregation engine: per-host hit counts over
//! event-time tumbling windows, with exactly-once output across restarts.
//!
//! - [`types`] — Core data types: [`HitEvent`](types::HitEvent),
//!   [`SourceRecord`](types::SourceRecord), [`Watermark`](types::Watermark),
//!   [`Barrier`](types::Barrier) and the worker inbox element
//!   [`StreamElement`](types::StreamElement).
//! - [`time`] — [`WatermarkTracker`](time::WatermarkTracker) per source partition;
//!   the driver broadcasts their minimum to every worker.
//! - [`window`] — Window assignment, state store, trigger and the
//!   single-shard [`WindowAggregator`](window::WindowAggregator).
//! - [`checkpoint`] — Barrier-based checkpoints, storage backends and recovery.
//! - [`connector`] — Source, decoder and sink boundaries.
//! - [`runtime`] — Key partitioning, worker threads and the
//!   [`AggregationPipeline`](runtime::AggregationPipeline) driver.
//! - [`config`], [`error`], [`metrics`], [`retry`] — Ambient concerns.

pub mod checkpoint;
pub mod config;
pub mod connector;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod runtime;
pub mod time;
pub mod types;
pub mod window;

pub use config::EngineConfig;
pub use error::EngineError;
