//! Feed client: keeps one live connection to the dashboard feed.
//!
//! The connection lifecycle is an explicit state machine ([`FeedMachine`])
//! that consumes [`FeedEvent`]s and answers with [`Action`]s. It performs no
//! I/O, so every transition can be tested synchronously. [`FeedClient`] runs
//! the machine on a single tokio task that owns at most one socket and at
//! most one retry timer.
//!
//! ```text
//! Idle -> Connecting -> Open -> Closed(PendingRetry) -> Connecting -> ...
//!   any state -> Closed(Final)   (dispose, irreversible)
//! ```

use crate::config::FeedConfig;
use crate::retry::ReconnectPolicy;
use crate::snapshot::{decode_frame, FeedMessage};
use crate::state::{StateFence, StateWriter};
use futures_util::StreamExt;
use std::future::{pending, Future};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Sleep};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Upper bound on waiting for the close handshake during teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// The attempt could not even be started (bad URL, unsupported scheme)
    #[error("Failed to connect to WebSocket: {0}")]
    Construct(String),
    #[error("WebSocket connection error: {0}")]
    Connection(String),
    #[error("WebSocket connection timed out after {0:?}")]
    Timeout(Duration),
}

impl FeedError {
    fn from_connect(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Url(e) => FeedError::Construct(e.to_string()),
            tungstenite::Error::HttpFormat(e) => FeedError::Construct(e.to_string()),
            other => FeedError::Connection(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// A retry timer is (or is about to be) armed
    PendingRetry,
    /// Disposed; nothing happens after this
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Connecting,
    Open,
    Closed(CloseKind),
}

impl FeedState {
    pub fn is_final(self) -> bool {
        self == FeedState::Closed(CloseKind::Final)
    }
}

/// Something that happened to the connection. `attempt` identifies the
/// connection attempt the event belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Opened { attempt: u64 },
    Frame { attempt: u64, text: String },
    Failed { attempt: u64, error: FeedError },
    Closed { attempt: u64 },
    RetryElapsed,
    Dispose,
}

/// Side effect requested by the machine, carried out by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Connect { attempt: u64, url: String },
    ScheduleRetry { delay: Duration },
    CancelRetry,
    CloseSocket,
}

/// Connection lifecycle state machine. Sole owner of the [`StateWriter`].
#[derive(Debug)]
pub struct FeedMachine {
    state: FeedState,
    url: String,
    policy: ReconnectPolicy,
    writer: StateWriter,
    /// Generation of the current connection attempt
    attempt: u64,
    /// Closes since the last successful open
    consecutive_failures: u32,
    retry_armed: bool,
}

impl FeedMachine {
    pub fn new(url: String, policy: ReconnectPolicy, writer: StateWriter) -> Self {
        Self {
            state: FeedState::Idle,
            url,
            policy,
            writer,
            attempt: 0,
            consecutive_failures: 0,
            retry_armed: false,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn retry_armed(&self) -> bool {
        self.retry_armed
    }

    /// Leave `Idle` and start the first connection attempt.
    pub fn start(&mut self) -> Vec<Action> {
        if self.state != FeedState::Idle {
            return Vec::new();
        }
        self.begin_attempt()
    }

    pub fn handle(&mut self, event: FeedEvent) -> Vec<Action> {
        if self.state.is_final() {
            // Late events after teardown are no-ops
            return Vec::new();
        }

        match event {
            FeedEvent::Dispose => self.dispose(),
            FeedEvent::RetryElapsed => {
                if self.state != FeedState::Closed(CloseKind::PendingRetry) || !self.retry_armed {
                    return Vec::new();
                }
                self.retry_armed = false;
                self.begin_attempt()
            }
            FeedEvent::Opened { attempt } => {
                if !self.is_current(attempt, FeedState::Connecting) {
                    return Vec::new();
                }
                info!("Dashboard feed connected (attempt {})", attempt);
                self.state = FeedState::Open;
                self.consecutive_failures = 0;
                self.writer.mark_connected();
                self.cancel_retry()
            }
            FeedEvent::Frame { attempt, text } => {
                if self.is_current(attempt, FeedState::Open) {
                    self.apply_frame(&text);
                }
                Vec::new()
            }
            FeedEvent::Failed { attempt, error } => {
                if !self.is_live(attempt) {
                    return Vec::new();
                }
                warn!("Dashboard feed failed: {}", error);
                metrics::counter!("dashboard_connection_failures").increment(1);
                self.close(Some(error.to_string()))
            }
            FeedEvent::Closed { attempt } => {
                if !self.is_live(attempt) {
                    return Vec::new();
                }
                info!("Dashboard feed closed");
                self.close(None)
            }
        }
    }

    fn is_current(&self, attempt: u64, state: FeedState) -> bool {
        attempt == self.attempt && self.state == state
    }

    fn is_live(&self, attempt: u64) -> bool {
        self.is_current(attempt, FeedState::Connecting)
            || self.is_current(attempt, FeedState::Open)
    }

    fn begin_attempt(&mut self) -> Vec<Action> {
        let mut actions = self.cancel_retry();
        self.attempt += 1;
        self.state = FeedState::Connecting;
        self.writer.mark_connecting();
        metrics::counter!("dashboard_connection_attempts").increment(1);
        debug!("Connecting to {} (attempt {})", self.url, self.attempt);
        actions.push(Action::Connect {
            attempt: self.attempt,
            url: self.url.clone(),
        });
        actions
    }

    fn cancel_retry(&mut self) -> Vec<Action> {
        if std::mem::take(&mut self.retry_armed) {
            vec![Action::CancelRetry]
        } else {
            Vec::new()
        }
    }

    fn close(&mut self, error: Option<String>) -> Vec<Action> {
        let was_open = self.state == FeedState::Open;
        self.state = FeedState::Closed(CloseKind::PendingRetry);
        self.writer.mark_disconnected(error);

        let delay = self.policy.delay_for(self.consecutive_failures);
        if !was_open {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        // Arm first: the delay counts from the close, not from the end of
        // the close handshake
        let mut actions = self.cancel_retry();
        actions.push(Action::ScheduleRetry { delay });
        actions.push(Action::CloseSocket);
        self.retry_armed = true;
        debug!("Reconnecting in {:?}", delay);
        actions
    }

    fn dispose(&mut self) -> Vec<Action> {
        info!("Dashboard feed disposed");
        self.state = FeedState::Closed(CloseKind::Final);
        self.writer.close();

        let mut actions = self.cancel_retry();
        actions.push(Action::CloseSocket);
        actions
    }

    fn apply_frame(&mut self, text: &str) {
        metrics::counter!("dashboard_frames_received").increment(1);
        match decode_frame(text) {
            Ok(FeedMessage::Update(snapshot)) => {
                debug!(
                    "Snapshot with {} tunnels, {} channels",
                    snapshot.tunnels().len(),
                    snapshot.total_connections()
                );
                if !self.writer.replace_snapshot(snapshot) {
                    debug!("Dropping snapshot received after teardown");
                }
            }
            Ok(FeedMessage::Other(kind)) => {
                debug!("Ignoring feed message of type {:?}", kind);
            }
            Err(e) => {
                metrics::counter!("dashboard_frames_malformed").increment(1);
                warn!("Failed to parse dashboard message: {}", e);
            }
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "dashboard_frames_received",
        "Total number of frames received from the dashboard feed"
    );
    metrics::describe_counter!(
        "dashboard_frames_malformed",
        "Number of feed frames dropped because they failed to decode"
    );
    metrics::describe_counter!(
        "dashboard_connection_attempts",
        "Number of connection attempts to the dashboard feed"
    );
    metrics::describe_counter!(
        "dashboard_connection_failures",
        "Number of feed connections that ended in an error"
    );
}

/// Handle on the running feed client.
///
/// Dropping the handle disposes the client.
pub struct FeedClient {
    fence: StateFence,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl FeedClient {
    /// Start connecting immediately. Must be called within a tokio runtime.
    pub fn spawn(config: FeedConfig, writer: StateWriter) -> Self {
        describe_metrics();
        let fence = writer.fence();
        let machine = FeedMachine::new(config.feed_url(), config.reconnect.clone(), writer);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(drive(machine, config.connect_timeout, shutdown_rx));

        Self {
            fence,
            shutdown,
            task: Some(task),
        }
    }

    /// Tear the client down. The dashboard cell reads "no data" and ignores
    /// the connection task from the moment this returns; the task then
    /// cancels any pending retry and closes the socket. Idempotent.
    pub fn dispose(&self) {
        self.fence.close();
        self.shutdown.send_replace(true);
    }

    /// Dispose and wait for the connection task to finish.
    pub async fn shutdown(mut self) {
        self.dispose();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Feed client task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

type PendingConnect = Pin<Box<dyn Future<Output = Result<FeedSocket, FeedError>> + Send>>;

/// I/O resources owned by the connection task
#[derive(Default)]
struct Resources {
    connecting: Option<(u64, PendingConnect)>,
    socket: Option<(u64, FeedSocket)>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl Resources {
    async fn apply(&mut self, actions: Vec<Action>, connect_timeout: Duration) {
        for action in actions {
            match action {
                Action::Connect { attempt, url } => {
                    // A new attempt supersedes whatever was in flight
                    self.connecting = Some((attempt, connect(url, connect_timeout)));
                }
                Action::ScheduleRetry { delay } => {
                    self.retry = Some(Box::pin(sleep(delay)));
                }
                Action::CancelRetry => {
                    self.retry = None;
                }
                Action::CloseSocket => {
                    self.connecting = None;
                    if let Some((_, mut socket)) = self.socket.take() {
                        let _ = timeout(CLOSE_TIMEOUT, socket.close(None)).await;
                    }
                }
            }
        }
    }
}

fn connect(url: String, connect_timeout: Duration) -> PendingConnect {
    Box::pin(async move {
        match timeout(connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(e)) => Err(FeedError::from_connect(e)),
            Err(_) => Err(FeedError::Timeout(connect_timeout)),
        }
    })
}

async fn next_connected(
    connecting: &mut Option<(u64, PendingConnect)>,
) -> (u64, Result<FeedSocket, FeedError>) {
    match connecting {
        Some((attempt, fut)) => (*attempt, fut.await),
        None => pending().await,
    }
}

async fn next_message(
    socket: &mut Option<(u64, FeedSocket)>,
) -> (u64, Option<Result<Message, tungstenite::Error>>) {
    match socket {
        Some((attempt, ws)) => (*attempt, ws.next().await),
        None => pending().await,
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

/// Translate one socket read into a machine event. `None` means the read
/// carried nothing for the machine (control frames).
fn socket_event(
    attempt: u64,
    read: Option<Result<Message, tungstenite::Error>>,
) -> Option<FeedEvent> {
    match read {
        Some(Ok(Message::Text(text))) => Some(FeedEvent::Frame { attempt, text }),
        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
            Ok(text) => Some(FeedEvent::Frame { attempt, text }),
            Err(e) => {
                metrics::counter!("dashboard_frames_malformed").increment(1);
                warn!("Dropping non-UTF-8 binary frame: {}", e);
                None
            }
        },
        Some(Ok(Message::Close(frame))) => {
            debug!("Feed sent close frame: {:?}", frame);
            Some(FeedEvent::Closed { attempt })
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => None,
        Some(Err(e)) => Some(FeedEvent::Failed {
            attempt,
            error: FeedError::Connection(e.to_string()),
        }),
        None => Some(FeedEvent::Closed { attempt }),
    }
}

async fn drive(
    mut machine: FeedMachine,
    connect_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut resources = Resources::default();

    let actions = machine.start();
    resources.apply(actions, connect_timeout).await;

    while !machine.state().is_final() {
        let event = if *shutdown.borrow() {
            FeedEvent::Dispose
        } else {
            tokio::select! {
                biased;

                // A dropped handle counts as a dispose request too
                _ = shutdown.changed() => FeedEvent::Dispose,

                (attempt, result) = next_connected(&mut resources.connecting) => {
                    resources.connecting = None;
                    match result {
                        Ok(socket) => {
                            resources.socket = Some((attempt, socket));
                            FeedEvent::Opened { attempt }
                        }
                        Err(error) => FeedEvent::Failed { attempt, error },
                    }
                }

                (attempt, read) = next_message(&mut resources.socket) => {
                    match socket_event(attempt, read) {
                        Some(event) => event,
                        None => continue,
                    }
                }

                _ = retry_elapsed(&mut resources.retry) => {
                    resources.retry = None;
                    FeedEvent::RetryElapsed
                }
            }
        };

        // Shutdown may have been requested while the select was resolving
        let event = if *shutdown.borrow() {
            FeedEvent::Dispose
        } else {
            event
        };
        let actions = machine.handle(event);
        resources.apply(actions, connect_timeout).await;
    }

    debug!("Feed client task finished");
}
