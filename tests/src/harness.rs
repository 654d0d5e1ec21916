//! # Test Relay
//!
//! A real WebSocket counterpart bound to `127.0.0.1:0`.
//!
//! - Records the request path of every connection
//! - Optionally authenticates each connection with an [`Authenticator`]
//! - Forwards text frames received from clients to the test
//! - Lets the test push frames to, or close, every connected client

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pulse_transport::{AuthenticatedPeer, Authenticator, TransportEvent};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Generous bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Command {
    Text(String),
    Close(u16),
}

struct RelayState {
    authenticator: Option<Arc<Authenticator>>,
    connections: AtomicUsize,
    paths: Mutex<Vec<String>>,
    peers: Mutex<Vec<AuthenticatedPeer>>,
    inbound: mpsc::UnboundedSender<String>,
    commands: broadcast::Sender<Command>,
}

/// In-process relay. Stops accepting when dropped.
pub struct TestRelay {
    addr: SocketAddr,
    state: Arc<RelayState>,
    task: JoinHandle<()>,
}

impl TestRelay {
    /// Starts a relay. The receiver yields every text frame clients send
    /// after their handshake.
    pub async fn start(
        authenticator: Option<Authenticator>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let (commands, _) = broadcast::channel(64);

        let state = Arc::new(RelayState {
            authenticator: authenticator.map(Arc::new),
            connections: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
            inbound,
            commands,
        });

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, state).await {
                        debug!(error = %e, "Relay connection ended with error");
                    }
                });
            }
        });

        Ok((Self { addr, state, task }, inbound_rx))
    }

    /// `ws://127.0.0.1:<port>`
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connections accepted so far, authenticated or not.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.paths.lock().clone()
    }

    pub fn peers(&self) -> Vec<AuthenticatedPeer> {
        self.state.peers.lock().clone()
    }

    /// Sends a text frame to every connected client.
    pub fn push(&self, frame: impl Into<String>) -> usize {
        self.state
            .commands
            .send(Command::Text(frame.into()))
            .unwrap_or(0)
    }

    /// Closes every connected client with `code`.
    pub fn close_all(&self, code: u16) -> usize {
        self.state.commands.send(Command::Close(code)).unwrap_or(0)
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<RelayState>) -> Result<()> {
    let path = Arc::new(Mutex::new(String::new()));
    let seen = Arc::clone(&path);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        *seen.lock() = request.uri().path().to_string();
        Ok(response)
    };

    let mut ws = accept_hdr_async(stream, callback).await?;
    state.paths.lock().push(path.lock().clone());
    state.connections.fetch_add(1, Ordering::SeqCst);

    // Subscribed before the handshake so nothing pushed after the client
    // reports itself connected can be missed.
    let mut commands = state.commands.subscribe();

    if let Some(authenticator) = &state.authenticator {
        match authenticator.accept(&mut ws).await {
            Ok(peer) => state.peers.lock().push(peer),
            Err(_) => return Ok(()),
        }
    }

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(Command::Text(text)) => write.send(Message::text(text)).await?,
                Ok(Command::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "closed by relay".into(),
                    };
                    write.send(Message::Close(Some(frame))).await?;
                    let drain = async { while let Some(Ok(_)) = read.next().await {} };
                    let _ = tokio::time::timeout(Duration::from_secs(1), drain).await;
                    return Ok(());
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = state.inbound.send(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

/// Waits for the next event matching `predicate`, skipping others.
pub async fn next_event<F>(
    events: &mut broadcast::Receiver<TransportEvent>,
    mut predicate: F,
) -> Option<TransportEvent>
where
    F: FnMut(&TransportEvent) -> bool,
{
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(WAIT, wait).await.ok().flatten()
}

/// Collects events up to and including the first one matching `predicate`.
pub async fn events_until<F>(
    events: &mut broadcast::Receiver<TransportEvent>,
    mut predicate: F,
) -> Vec<TransportEvent>
where
    F: FnMut(&TransportEvent) -> bool,
{
    let mut seen = Vec::new();
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let done = predicate(&event);
                    seen.push(event);
                    if done {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    };
    let _ = tokio::time::timeout(WAIT, wait).await;
    seen
}

/// Receives the next item or gives up after [`WAIT`].
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    tokio::time::timeout(WAIT, rx.recv()).await.ok().flatten()
}

/// A `ws://` URL nothing listens on.
pub async fn unused_ws_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("ws://{addr}"))
}
