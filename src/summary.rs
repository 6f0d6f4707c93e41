use crate::format::{format_rate, format_total, format_uptime_at};
use crate::snapshot::TunnelMetrics;
use crate::state::{ConnectionStatus, DashboardView};
use chrono::{DateTime, Utc};

/// Display strings for one tunnel row
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelRow {
    pub id: String,
    pub url: String,
    pub port: String,
    pub uptime: String,
    pub channels: u64,
    pub rate_in: String,
    pub total_in: String,
    pub rate_out: String,
    pub total_out: String,
}

impl TunnelRow {
    pub fn new(tunnel: &TunnelMetrics, now: DateTime<Utc>) -> Self {
        Self {
            id: tunnel.id.clone(),
            url: tunnel.public_url(),
            port: tunnel.port.to_string(),
            uptime: format_uptime_at(tunnel.connected_at, now),
            channels: tunnel.active_connections,
            rate_in: format_rate(tunnel.throughput_in),
            total_in: format_total(tunnel.cumulative_bytes_in),
            rate_out: format_rate(tunnel.throughput_out),
            total_out: format_total(tunnel.cumulative_bytes_out),
        }
    }
}

/// Everything the dashboard shows, formatted against one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
    pub status: ConnectionStatus,
    pub error: Option<String>,
    pub active_tunnels: usize,
    pub total_connections: u64,
    pub throughput_in: String,
    pub cumulative_in: String,
    pub throughput_out: String,
    pub cumulative_out: String,
    pub throughput_total: String,
    pub cumulative_total: String,
    /// Age of the last accepted snapshot, e.g. "12s"
    pub last_update: Option<String>,
    pub rows: Vec<TunnelRow>,
}

impl DashboardSummary {
    pub fn new(view: &DashboardView, now: DateTime<Utc>) -> Self {
        let stats = view.server_stats();
        let tunnels = view.tunnels();

        Self {
            status: view.status,
            error: view.last_error.clone(),
            active_tunnels: tunnels.len(),
            total_connections: view.total_connections(),
            throughput_in: format_rate(stats.throughput_in),
            cumulative_in: format_total(stats.cumulative_bytes_in),
            throughput_out: format_rate(stats.throughput_out),
            cumulative_out: format_total(stats.cumulative_bytes_out),
            throughput_total: format_rate(stats.combined_throughput()),
            cumulative_total: format_total(stats.combined_cumulative()),
            last_update: view.last_update.map(|at| format_uptime_at(at, now)),
            rows: tunnels.iter().map(|t| TunnelRow::new(t, now)).collect(),
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self.status {
            ConnectionStatus::Connected => "Live",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Disconnected => "Disconnected",
        }
    }

    /// e.g. "1 active channel", "3 active channels"
    pub fn channels_label(&self) -> String {
        let plural = if self.total_connections == 1 { "" } else { "s" };
        format!("{} active channel{}", self.total_connections, plural)
    }
}
