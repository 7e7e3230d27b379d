//! JSON page-hit decoding.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use hitcrab_core::EngineError;
use hitcrab_core::connector::Decoder;
use hitcrab_core::types::{HitEvent, SourceRecord};
use serde::Deserialize;

/// Timestamp layout of `event_timestamp`, always UTC.
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One page hit as produced upstream. Only `host` and `event_timestamp`
/// feed the aggregation; the rest is accepted and ignored.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawHit {
    #[serde(default)]
    ip: Option<String>,
    event_timestamp: String,
    #[serde(default)]
    referrer: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    geodata: Option<serde_json::Value>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonHitDecoder;

impl JsonHitDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for JsonHitDecoder {
    fn decode(&self, record: &SourceRecord) -> Result<HitEvent> {
        let raw: RawHit = serde_json::from_slice(&record.payload)
            .map_err(|err| EngineError::Decode(format!("invalid hit json: {err}")))?;
        let host = match raw.host {
            Some(host) if !host.is_empty() => host,
            _ => return Err(EngineError::Decode("hit has no host".to_string()).into()),
        };
        let event_time = parse_event_timestamp(&raw.event_timestamp)?;
        Ok(HitEvent::new(host, event_time, record.partition_id))
    }
}

/// `2024-01-01 00:04:59` as UTC epoch milliseconds.
pub fn parse_event_timestamp(value: &str) -> Result<i64> {
    let parsed = NaiveDateTime::parse_from_str(value, EVENT_TIMESTAMP_FORMAT)
        .map_err(|err| EngineError::Decode(format!("bad event_timestamp {value:?}: {err}")))
        .context("decode event time")?;
    Ok(parsed.and_utc().timestamp_millis())
}

#[cfg(test)]
#[path = "tests/decode_tests.rs"]
mod tests;
