use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bore_dash::{DashboardState, FeedClient, FeedConfig, Origin, ReconnectPolicy, Scheme};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::sleep;

#[derive(Clone, Debug)]
enum Command {
    Send(String),
    Close,
}

#[derive(Clone)]
struct ServerState {
    commands: broadcast::Sender<Command>,
    accepted: Arc<Mutex<Vec<Instant>>>,
}

/// A stand-in for the tunnel server's dashboard endpoint.
pub struct FeedServer {
    pub addr: SocketAddr,
    commands: broadcast::Sender<Command>,
    accepted: Arc<Mutex<Vec<Instant>>>,
}

#[allow(dead_code)]
impl FeedServer {
    pub async fn start() -> Self {
        let (commands, _) = broadcast::channel(64);
        let accepted = Arc::new(Mutex::new(Vec::new()));
        let state = ServerState {
            commands: commands.clone(),
            accepted: Arc::clone(&accepted),
        };

        let app = Router::new()
            .route("/api/ws/dashboard", get(ws_handler))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            commands,
            accepted,
        }
    }

    pub fn config(&self, reconnect: Duration) -> FeedConfig {
        FeedConfig::new(Origin::new(Scheme::Insecure, self.addr.to_string()))
            .with_reconnect(ReconnectPolicy::fixed(reconnect))
    }

    /// Push a text frame to every connected dashboard.
    pub fn send(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Send(text.into()));
    }

    /// Close every open dashboard socket from the server side.
    pub fn close_all(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub fn connection_count(&self) -> usize {
        self.accepted.lock().len()
    }

    pub fn accepted_at(&self, index: usize) -> Option<Instant> {
        self.accepted.lock().get(index).copied()
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| feed_connection(socket, state))
}

async fn feed_connection(mut socket: WebSocket, state: ServerState) {
    let mut commands = state.commands.subscribe();
    state.accepted.lock().push(Instant::now());

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(Command::Send(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Close) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Err(_) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

/// Start a client against `config` and return it with its read handle.
#[allow(dead_code)]
pub fn spawn_client(config: FeedConfig) -> (FeedClient, DashboardState) {
    let (state, writer) = DashboardState::new();
    (FeedClient::spawn(config, writer), state)
}

/// Poll `condition` until it holds, panicking after `limit`.
#[allow(dead_code)]
pub async fn wait_for(what: &str, limit: Duration, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < limit, "Timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

/// JSON for one tunnel row.
#[allow(dead_code)]
pub fn tunnel_json(id: &str, active_connections: u64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "domain": "bore.example",
        "port": 3000,
        "addr": "203.0.113.7:51234",
        "bytesIn": 512,
        "bytesOut": 1024,
        "cumulativeBytesIn": 4096,
        "cumulativeBytesOut": 8192,
        "throughputIn": 512.0,
        "throughputOut": 1024.0,
        "connectedAt": "2024-05-01T10:00:00Z",
        "lastActivity": "2024-05-01T10:00:05Z",
        "activeConnections": active_connections,
    })
}

/// An `update` frame for the given (id, channels) rows.
#[allow(dead_code)]
pub fn update_frame(tunnels: &[(&str, u64)]) -> String {
    let rows: Vec<_> = tunnels
        .iter()
        .map(|(id, active)| tunnel_json(id, *active))
        .collect();
    serde_json::json!({
        "type": "update",
        "tunnels": rows,
        "serverStats": {
            "totalBytesIn": 512,
            "totalBytesOut": 1024,
            "cumulativeBytesIn": 4096,
            "cumulativeBytesOut": 8192,
            "throughputIn": 512.0,
            "throughputOut": 1024.0
        }
    })
    .to_string()
}
