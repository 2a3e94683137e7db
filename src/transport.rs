//! Async WebSocket transport driving the connection state machine.
//!
//! [`run_client`] owns the socket lifecycle: connect, heartbeat, reconnect
//! with the configured backoff, and queue flushing after a reconnect. It is
//! the only async code in the crate; everything it decides is delegated to
//! the pure [`ConnectionCore`]. The host wires two channels: outbound
//! messages from the session's effects flow in, inbound messages flow out
//! to [`crate::session::CanvasSession::handle_message`], and the connection
//! status is published on a `watch` channel for the UI indicator.

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::{BackoffPolicy, ConnectionCore, ConnectionState, SendOutcome};
use crate::consts::{HEARTBEAT_INTERVAL_MS, RECONNECT_FLUSH_SETTLE_MS};
use crate::protocol::Message;

/// Error surfaced when the transport gives up for good.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The websocket failed in a way the reconnect loop does not retry.
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    /// The backoff policy exhausted its attempts. Terminal; the UI shows
    /// the error state until the user retries manually.
    #[error("gave up reconnecting after {0} attempts")]
    Exhausted(u32),
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// WebSocket endpoint, e.g. `wss://example.com/canvas`.
    pub endpoint: String,
    /// Access token from the session provider.
    pub token: String,
    /// The canvas to join.
    pub canvas_id: Uuid,
}

impl SocketConfig {
    /// The full connection URL: `<endpoint>?token=...&canvasId=...`. A
    /// path-less endpoint such as `ws://host:9001` gets a `/` appended, since
    /// the websocket handshake needs a non-empty request path.
    #[must_use]
    pub fn url(&self) -> String {
        let mut endpoint = self.endpoint.clone();
        let path_start = endpoint.find("://").map_or(0, |i| i + 3);
        if !endpoint[path_start..].contains('/') {
            endpoint.push('/');
        }
        format!("{endpoint}?token={}&canvasId={}", self.token, self.canvas_id)
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Drive {
    /// The socket closed or errored; reconnect.
    Closed,
    /// The outbound channel closed; the session is tearing down.
    Shutdown,
}

/// Run the connection until the session tears down (outbound channel
/// closed) or the backoff policy gives up.
///
/// Messages sent on `outbound` while disconnected are queued and flushed
/// strictly FIFO once reconnected, after `RECONNECT_REQUEST` and a short
/// settle delay so the server-side sync lands first.
///
/// # Errors
///
/// Returns [`TransportError::Exhausted`] when a bounded backoff policy runs
/// out of attempts. Socket-level failures are retried, not returned.
pub async fn run_client(
    config: SocketConfig,
    policy: BackoffPolicy,
    inbound: mpsc::UnboundedSender<Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    status: watch::Sender<ConnectionState>,
) -> Result<(), TransportError> {
    let mut core = ConnectionCore::new(policy);
    loop {
        let _ = status.send(core.state());
        match connect_async(config.url()).await {
            Ok((socket, _response)) => {
                let reconnect = core.on_open();
                let _ = status.send(core.state());
                match drive_socket(socket, &mut core, reconnect, &inbound, &mut outbound).await {
                    Ok(Drive::Shutdown) => {
                        core.shutdown();
                        let _ = status.send(core.state());
                        return Ok(());
                    }
                    Ok(Drive::Closed) => {}
                    Err(e) => warn!("socket error: {e}"),
                }
            }
            Err(e) => warn!("connect failed: {e}"),
        }

        match core.on_close() {
            Some(delay_ms) => {
                let _ = status.send(core.state());
                debug!(delay_ms, attempt = core.attempts(), "scheduling reconnect");
                wait_and_queue(&mut core, &mut outbound, delay_ms).await;
            }
            None => {
                let _ = status.send(core.state());
                return Err(TransportError::Exhausted(core.attempts()));
            }
        }
    }
}

/// Pump one open socket: flush after reconnect, forward outbound messages,
/// decode inbound frames, and heartbeat every 30 s.
async fn drive_socket(
    socket: Socket,
    core: &mut ConnectionCore,
    reconnect: bool,
    inbound: &mpsc::UnboundedSender<Message>,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
) -> Result<Drive, TransportError> {
    let (mut write, mut read) = socket.split();

    if reconnect {
        transmit(&mut write, core, Message::reconnect_request()).await?;
        // Let the server-side sync land before replaying queued operations.
        tokio::time::sleep(Duration::from_millis(RECONNECT_FLUSH_SETTLE_MS)).await;
    }
    // Pop one message at a time: a failed transmit mid-flush leaves the
    // unsent remainder queued for the next connection.
    while let Some(message) = core.pop_queued() {
        transmit(&mut write, core, message).await?;
    }

    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    // The first tick completes immediately; an early ping is harmless.
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => match core.send(message) {
                    SendOutcome::Transmit(message) => {
                        transmit(&mut write, core, message).await?;
                    }
                    SendOutcome::Queued => {}
                },
                None => return Ok(Drive::Shutdown),
            },
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match Message::decode(&text) {
                    Ok(message) => {
                        let _ = inbound.send(message);
                    }
                    Err(e) => warn!("dropping unparseable frame: {e}"),
                },
                Some(Ok(WsMessage::Close(_))) | None => return Ok(Drive::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("recv error: {e}");
                    return Ok(Drive::Closed);
                }
            },
            _ = heartbeat.tick() => {
                transmit(&mut write, core, Message::ping()).await?;
            }
        }
    }
}

/// Serialize and send one message. A failed transmit puts the message back
/// at the front of the queue, keeping it ahead of anything queued behind
/// it, and surfaces the socket error so the caller tears the connection
/// down.
async fn transmit(
    write: &mut futures::stream::SplitSink<Socket, WsMessage>,
    core: &mut ConnectionCore,
    message: Message,
) -> Result<(), TransportError> {
    let Ok(json) = message.encode() else {
        return Ok(());
    };
    if let Err(e) = write.send(WsMessage::text(json)).await {
        warn!("send failed, queueing for reflush: {e}");
        core.requeue(message);
        return Err(e.into());
    }
    Ok(())
}

/// Sleep out a reconnect delay while still accepting outbound messages
/// into the operation queue, so nothing sent while offline is lost.
async fn wait_and_queue(
    core: &mut ConnectionCore,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    delay_ms: u64,
) {
    let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return,
            message = outbound.recv() => match message {
                Some(message) => {
                    let _ = core.send(message);
                }
                None => {
                    // Session teardown while offline; the reconnect loop
                    // will observe the closed channel after the next open.
                    return;
                }
            },
        }
    }
}
