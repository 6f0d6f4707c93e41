//! Wire model of the dashboard feed and frame decoding.
//!
//! The feed pushes complete snapshots as JSON text frames:
//!
//! ```json
//! { "type": "update", "tunnels": [ ... ], "serverStats": { ... } }
//! ```
//!
//! A snapshot always replaces the previous one; there are no deltas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// Message type carrying a full snapshot.
pub const UPDATE_MESSAGE_TYPE: &str = "update";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame is not a JSON object")]
    NotAnObject,
    #[error("Missing or non-string message type")]
    MissingType,
    #[error("Duplicate tunnel id: {0}")]
    DuplicateTunnel(String),
    #[error("Invalid {field} for tunnel {id}: {value}")]
    InvalidThroughput {
        id: String,
        field: &'static str,
        value: f64,
    },
    #[error("Invalid server {field}: {value}")]
    InvalidServerThroughput { field: &'static str, value: f64 },
}

/// Per-tunnel figures for one sampling interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelMetrics {
    pub id: String,
    pub domain: String,
    pub port: u32,
    pub addr: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub cumulative_bytes_in: u64,
    pub cumulative_bytes_out: u64,
    pub throughput_in: f64,
    pub throughput_out: f64,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active_connections: u64,
}

impl TunnelMetrics {
    /// Public address the tunnel is published under.
    pub fn public_url(&self) -> String {
        format!("http://{}.{}", self.id, self.domain)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        for (field, value) in [
            ("throughputIn", self.throughput_in),
            ("throughputOut", self.throughput_out),
        ] {
            if !is_valid_rate(value) {
                return Err(DecodeError::InvalidThroughput {
                    id: self.id.clone(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Server-wide aggregates. Not necessarily the sum of the tunnel rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerStats {
    pub total_bytes_in: u64,
    pub total_bytes_out: u64,
    pub cumulative_bytes_in: u64,
    pub cumulative_bytes_out: u64,
    pub throughput_in: f64,
    pub throughput_out: f64,
}

impl ServerStats {
    /// Inbound plus outbound rate.
    pub fn combined_throughput(&self) -> f64 {
        self.throughput_in + self.throughput_out
    }

    /// Inbound plus outbound bytes since server start.
    pub fn combined_cumulative(&self) -> u64 {
        self.cumulative_bytes_in
            .saturating_add(self.cumulative_bytes_out)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        for (field, value) in [
            ("throughputIn", self.throughput_in),
            ("throughputOut", self.throughput_out),
        ] {
            if !is_valid_rate(value) {
                return Err(DecodeError::InvalidServerThroughput { field, value });
            }
        }
        Ok(())
    }
}

fn is_valid_rate(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// One complete view of the server: tunnels ordered by id plus aggregates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    tunnels: Vec<TunnelMetrics>,
    server_stats: ServerStats,
}

impl Snapshot {
    /// Build a snapshot, ordering tunnels ascending by id.
    pub fn new(mut tunnels: Vec<TunnelMetrics>, server_stats: ServerStats) -> Self {
        tunnels.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            tunnels,
            server_stats,
        }
    }

    pub fn tunnels(&self) -> &[TunnelMetrics] {
        &self.tunnels
    }

    pub fn server_stats(&self) -> &ServerStats {
        &self.server_stats
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Channels open across all tunnels. Recomputed on every call.
    pub fn total_connections(&self) -> u64 {
        self.tunnels.iter().map(|t| t.active_connections).sum()
    }
}

/// A decoded feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Update(Snapshot),
    /// Any other message type. Accepted and ignored.
    Other(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePayload {
    #[serde(default)]
    tunnels: Option<Vec<TunnelMetrics>>,
    #[serde(default)]
    server_stats: Option<ServerStats>,
}

/// Decode one text frame from the feed.
///
/// Only the `type` field is inspected for non-update messages, so new message
/// kinds with unrelated payloads pass through as [`FeedMessage::Other`].
pub fn decode_frame(text: &str) -> Result<FeedMessage, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(ref object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let message_type = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    if message_type != UPDATE_MESSAGE_TYPE {
        return Ok(FeedMessage::Other(message_type.to_string()));
    }

    let payload: UpdatePayload = serde_json::from_value(value)?;
    let tunnels = payload.tunnels.unwrap_or_default();
    let server_stats = payload.server_stats.unwrap_or_default();

    let mut seen = HashSet::with_capacity(tunnels.len());
    for tunnel in &tunnels {
        if !seen.insert(tunnel.id.as_str()) {
            return Err(DecodeError::DuplicateTunnel(tunnel.id.clone()));
        }
        tunnel.validate()?;
    }
    server_stats.validate()?;

    Ok(FeedMessage::Update(Snapshot::new(tunnels, server_stats)))
}
