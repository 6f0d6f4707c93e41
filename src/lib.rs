pub mod client;
pub mod config;
pub mod format;
pub mod retry;
pub mod snapshot;
pub mod state;
pub mod summary;

pub use client::{FeedClient, FeedError, FeedMachine, FeedState};
pub use config::{FeedConfig, Origin, Scheme};
pub use format::{format_rate, format_total, format_uptime};
pub use retry::ReconnectPolicy;
pub use snapshot::{decode_frame, FeedMessage, ServerStats, Snapshot, TunnelMetrics};
pub use state::{ConnectionStatus, DashboardState, DashboardView, StateFence, StateWriter};
pub use summary::{DashboardSummary, TunnelRow};
