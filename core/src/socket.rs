//! Named WebSocket channels with a shared keep-alive ping.
//!
//! # Design
//! Each channel is keyed by its exact URL string and owned by one Tokio task
//! that connects, forwards outgoing commands and feeds every incoming
//! message or failure to the channel's receive callback. The manager keeps
//! only the command sender per channel. While more than one channel is open
//! a single timer pings all of them; the timer is rebuilt whenever the
//! channel count changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SocketError;

/// Application payload received from or sent to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl From<SocketMessage> for Message {
    fn from(message: SocketMessage) -> Self {
        match message {
            SocketMessage::Text(text) => Message::Text(text.into()),
            SocketMessage::Binary(bytes) => Message::Binary(bytes.into()),
        }
    }
}

/// How long a caller-initiated close waits for the peer's close reply.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type OnReceive = Arc<dyn Fn(Result<SocketMessage, SocketError>) + Send + Sync>;

enum Command {
    Send(Message),
    Close,
}

struct Channel {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
}

struct Inner {
    channels: Mutex<HashMap<String, Channel>>,
    ping: Mutex<Option<JoinHandle<()>>>,
    ping_interval: Duration,
}

impl Inner {
    fn channels(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ping(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tear down the ping timer and start a new one if more than one
    /// channel is open. Never called with the channel lock held.
    fn reschedule_ping(self: &Arc<Self>) {
        let mut ping = self.ping();
        if let Some(timer) = ping.take() {
            timer.abort();
        }
        let open = self.channels().len();
        if open > 1 {
            let inner = Arc::downgrade(self);
            let period = self.ping_interval;
            *ping = Some(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    let Some(inner) = inner.upgrade() else { break };
                    inner.ping_all();
                }
            }));
        }
        debug!(open, ping_active = ping.is_some(), "ping timer rescheduled");
    }

    fn ping_all(&self) {
        let channels = self.channels();
        for (url, channel) in channels.iter() {
            if channel.commands.send(Command::Send(Message::Ping(Vec::new().into()))).is_err() {
                debug!(url = %url, "ping skipped, channel task gone");
            }
        }
    }

    /// Drop the channel registered under `url` if it is still `id`.
    fn forget(self: &Arc<Self>, url: &str, id: Uuid) {
        let removed = {
            let mut channels = self.channels();
            match channels.get(url) {
                Some(channel) if channel.id == id => channels.remove(url).is_some(),
                _ => false,
            }
        };
        if removed {
            info!(url = %url, "socket closed");
            self.reschedule_ping();
        }
    }
}

/// Registry of open WebSocket channels, at most one per URL string.
///
/// Dropping the manager closes every channel.
pub struct SocketManager {
    inner: Arc<Inner>,
}

impl SocketManager {
    pub fn new(ping_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: Mutex::new(HashMap::new()),
                ping: Mutex::new(None),
                ping_interval,
            }),
        }
    }

    /// Open a channel to `url`, feeding every message or failure to
    /// `on_receive`.
    ///
    /// Returns `false` without side effects when a channel for the exact URL
    /// string already exists or the scheme is not `ws`/`wss`. Must be called
    /// from within a Tokio runtime.
    pub fn add_socket<F>(&self, url: &str, on_receive: F) -> bool
    where
        F: Fn(Result<SocketMessage, SocketError>) + Send + Sync + 'static,
    {
        if !is_websocket_url(url) {
            warn!(url = %url, "rejected non-websocket URL");
            return false;
        }

        let id = Uuid::new_v4();
        let (commands, rx) = mpsc::unbounded_channel();
        {
            let mut channels = self.inner.channels();
            if channels.contains_key(url) {
                debug!(url = %url, "socket already open");
                return false;
            }
            channels.insert(url.to_string(), Channel { id, commands });
        }

        tokio::spawn(run_channel(
            Arc::downgrade(&self.inner),
            url.to_string(),
            id,
            rx,
            Arc::new(on_receive),
        ));
        info!(url = %url, "socket added");
        self.inner.reschedule_ping();
        true
    }

    /// Queue `message` on the channel for `url`.
    pub fn send(&self, url: &str, message: SocketMessage) -> bool {
        match self.inner.channels().get(url) {
            Some(channel) => channel.commands.send(Command::Send(message.into())).is_ok(),
            None => false,
        }
    }

    /// Close the channel for `url` with a normal-closure code.
    pub fn close_socket(&self, url: &str) -> bool {
        let removed = self.inner.channels().remove(url);
        match removed {
            Some(channel) => {
                let _ = channel.commands.send(Command::Close);
                info!(url = %url, "socket closed by caller");
                self.inner.reschedule_ping();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) {
        let drained: Vec<(String, Channel)> = self.inner.channels().drain().collect();
        for (url, channel) in drained {
            let _ = channel.commands.send(Command::Close);
            debug!(url = %url, "socket closed on teardown");
        }
        if let Some(timer) = self.inner.ping().take() {
            timer.abort();
        }
    }

    pub fn is_open(&self, url: &str) -> bool {
        self.inner.channels().contains_key(url)
    }

    pub fn open_channels(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.inner.channels().keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Whether a keep-alive ping timer is currently scheduled.
    pub fn ping_active(&self) -> bool {
        self.inner.ping().is_some()
    }

    pub fn ping_interval(&self) -> Duration {
        self.inner.ping_interval
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for SocketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketManager")
            .field("open_channels", &self.open_channels())
            .field("ping_interval", &self.inner.ping_interval)
            .finish()
    }
}

fn is_websocket_url(url: &str) -> bool {
    Url::parse(url)
        .map(|parsed| matches!(parsed.scheme(), "ws" | "wss"))
        .unwrap_or(false)
}

async fn run_channel(
    inner: Weak<Inner>,
    url: String,
    id: Uuid,
    mut commands: mpsc::UnboundedReceiver<Command>,
    on_receive: OnReceive,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(url = %url, error = %e, "socket connect failed");
            on_receive(Err(SocketError::Connect(Box::new(e))));
            if let Some(inner) = inner.upgrade() {
                inner.forget(&url, id);
            }
            return;
        }
    };
    debug!(url = %url, "socket connected");
    let (mut sink, mut incoming) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    if let Err(e) = sink.send(message).await {
                        warn!(url = %url, error = %e, "socket send failed");
                    }
                }
                Some(Command::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: Utf8Bytes::from_static(""),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!(url = %url, error = %e, "close frame not sent");
                        return;
                    }
                    // Read until the peer's close reply ends the stream.
                    let drained = timeout(CLOSE_TIMEOUT, async {
                        while let Some(Ok(_)) = incoming.next().await {}
                    })
                    .await;
                    if drained.is_err() {
                        debug!(url = %url, "peer did not answer close in time");
                    }
                    return;
                }
            },
            received = incoming.next() => match received {
                Some(Ok(Message::Text(text))) => {
                    on_receive(Ok(SocketMessage::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    on_receive(Ok(SocketMessage::Binary(bytes.to_vec())));
                }
                Some(Ok(Message::Close(_))) | None => {
                    on_receive(Err(SocketError::Closed));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let terminal = is_terminal(&e);
                    on_receive(Err(SocketError::Receive(Box::new(e))));
                    if terminal {
                        break;
                    }
                }
            },
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.forget(&url, id);
    }
}

/// Errors after which the stream yields nothing further.
fn is_terminal(e: &WsError) -> bool {
    matches!(
        e,
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_) | WsError::Protocol(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ws_schemes_are_accepted() {
        assert!(is_websocket_url("ws://localhost:3000/ws"));
        assert!(is_websocket_url("wss://example.com/feed"));
        assert!(!is_websocket_url("http://localhost:3000/ws"));
        assert!(!is_websocket_url("not a url"));
    }

    #[test]
    fn add_socket_rejects_http_url_without_registering() {
        let manager = SocketManager::new(Duration::from_secs(5));
        assert!(!manager.add_socket("https://example.com/", |_| {}));
        assert!(manager.open_channels().is_empty());
        assert!(!manager.ping_active());
    }

    #[test]
    fn close_unknown_socket_is_false() {
        let manager = SocketManager::new(Duration::from_secs(5));
        assert!(!manager.close_socket("ws://localhost:1/none"));
        assert!(!manager.send("ws://localhost:1/none", SocketMessage::Text("x".into())));
    }

    #[tokio::test]
    async fn close_waits_for_the_peer_close_reply() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        let (close_tx, close_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Close(frame) = message {
                    let _ = close_tx.send(frame.map(|frame| frame.code));
                    // Hold the reply back so an early return would show.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    let _ = ws.flush().await;
                    break;
                }
            }
        });

        let (commands, rx) = mpsc::unbounded_channel();
        let on_receive: OnReceive = Arc::new(|_| {});
        let task = tokio::spawn(run_channel(Weak::new(), url, Uuid::new_v4(), rx, on_receive));
        commands.send(Command::Close).unwrap();

        let started = Instant::now();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150), "returned before the reply");
        assert!(started.elapsed() < CLOSE_TIMEOUT);
        assert_eq!(close_rx.await.unwrap(), Some(CloseCode::Normal));
    }

    #[tokio::test]
    async fn failed_connect_reports_and_closes_channel() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        drop(listener);

        let manager = SocketManager::new(Duration::from_secs(5));
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(manager.add_socket(&url, move |received| {
            let _ = tx.send(received);
        }));

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Err(SocketError::Connect(_))));

        // The channel task removes itself after reporting.
        for _ in 0..50 {
            if !manager.is_open(&url) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!manager.is_open(&url));
    }
}
