//! The dashboard's single shared cell.
//!
//! [`DashboardState`] is the cloneable read side handed to the render layer.
//! [`StateWriter`] is the only way to mutate the cell; it is not `Clone`, and
//! the feed client takes it by value, so there is exactly one writer.
//!
//! A [`StateFence`] taken from the writer closes the cell from another
//! thread: the view drops back to "no data" under the write lock, and every
//! later write is discarded.

use crate::snapshot::{ServerStats, Snapshot, TunnelMetrics};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// A connection attempt is in flight
    Connecting,
    /// The feed socket is open
    Connected,
    /// No socket; a retry may be pending
    #[default]
    Disconnected,
}

/// Point-in-time copy of the dashboard cell. Cheap to clone: the snapshot
/// itself is shared.
#[derive(Debug, Clone, Default)]
pub struct DashboardView {
    pub status: ConnectionStatus,
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_error: Option<String>,
    /// Snapshots accepted since the client started
    pub update_count: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl DashboardView {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Tunnel rows of the current snapshot, empty when there is no data.
    pub fn tunnels(&self) -> &[TunnelMetrics] {
        self.snapshot.as_deref().map(Snapshot::tunnels).unwrap_or(&[])
    }

    /// Server aggregates, all zero when there is no data.
    pub fn server_stats(&self) -> ServerStats {
        self.snapshot
            .as_deref()
            .map(|s| s.server_stats().clone())
            .unwrap_or_default()
    }

    pub fn total_connections(&self) -> u64 {
        self.snapshot
            .as_deref()
            .map(Snapshot::total_connections)
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct Cell {
    view: DashboardView,
    closed: bool,
}

/// Read handle on the dashboard cell
#[derive(Debug, Clone)]
pub struct DashboardState {
    inner: Arc<RwLock<Cell>>,
}

impl DashboardState {
    /// Create an empty cell and its single writer.
    pub fn new() -> (Self, StateWriter) {
        let inner = Arc::new(RwLock::new(Cell::default()));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            StateWriter { inner },
        )
    }

    pub fn view(&self) -> DashboardView {
        self.inner.read().view.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.read().view.status
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.read().view.snapshot.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().view.last_error.clone()
    }

    pub fn update_count(&self) -> u64 {
        self.inner.read().view.update_count
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.inner.read().view.last_update
    }
}

/// Exclusive write handle on the dashboard cell
#[derive(Debug)]
pub struct StateWriter {
    inner: Arc<RwLock<Cell>>,
}

impl StateWriter {
    /// Handle that can close this cell from outside the writer.
    pub fn fence(&self) -> StateFence {
        StateFence {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Apply `f` unless the cell has been closed. Returns whether it ran.
    fn update(&mut self, f: impl FnOnce(&mut DashboardView)) -> bool {
        let mut cell = self.inner.write();
        if cell.closed {
            return false;
        }
        f(&mut cell.view);
        true
    }

    pub fn mark_connecting(&mut self) {
        self.update(|view| view.status = ConnectionStatus::Connecting);
    }

    /// Socket opened: clear any previous error.
    pub fn mark_connected(&mut self) {
        self.update(|view| {
            view.status = ConnectionStatus::Connected;
            view.last_error = None;
        });
    }

    /// Socket gone. Drops the snapshot; records `error` when the close
    /// followed a failure, otherwise keeps whatever error is already shown.
    pub fn mark_disconnected(&mut self, error: Option<String>) {
        self.update(|view| {
            view.status = ConnectionStatus::Disconnected;
            view.snapshot = None;
            if error.is_some() {
                view.last_error = error;
            }
        });
    }

    /// Replace the current snapshot wholesale. Returns false once closed.
    pub fn replace_snapshot(&mut self, snapshot: Snapshot) -> bool {
        let snapshot = Arc::new(snapshot);
        self.update(|view| {
            view.snapshot = Some(snapshot);
            view.update_count += 1;
            view.last_update = Some(Utc::now());
        })
    }

    /// Close the cell from the writer's side.
    pub fn close(&mut self) {
        close_cell(&self.inner);
    }
}

/// Closing side of the cell, shared with whoever tears the writer down
#[derive(Debug, Clone)]
pub struct StateFence {
    inner: Arc<RwLock<Cell>>,
}

impl StateFence {
    /// Drop to "no data" and discard every later write. Idempotent.
    pub fn close(&self) {
        close_cell(&self.inner);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }
}

fn close_cell(inner: &RwLock<Cell>) {
    let mut cell = inner.write();
    cell.closed = true;
    cell.view.status = ConnectionStatus::Disconnected;
    cell.view.snapshot = None;
}
