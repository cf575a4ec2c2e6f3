//! JSON-lines TCP push channel
//!
//! Newline-delimited JSON over a plain TCP connection: each line is one
//! event, decoded straight into [`ServerEvent`] / encoded from
//! [`ClientEvent`]. Reconnection is bounded with a fixed delay; once the
//! attempts are exhausted the channel stays down and polling carries the
//! session state alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

use super::{ClientEvent, ServerEvent, Transport, TransportSignal};
use crate::config::TransportConfig;
use crate::error::{Error, Result};

/// Maximum length of one event line (64 KB)
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Push channel over TCP with newline-delimited JSON framing.
pub struct TcpPushChannel {
    outgoing: mpsc::Sender<ClientEvent>,
}

impl TcpPushChannel {
    /// Spawn the connection loop. Returns the emit handle plus the
    /// signal stream the client loop drains. The loop ends when the
    /// signal receiver is dropped or reconnection attempts run out.
    #[must_use]
    pub fn connect(config: TransportConfig) -> (Arc<Self>, mpsc::Receiver<TransportSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(256);
        let (out_tx, out_rx) = mpsc::channel(64);
        tokio::spawn(run_connection_loop(config, signal_tx, out_rx));
        (Arc::new(Self { outgoing: out_tx }), signal_rx)
    }
}

#[async_trait]
impl Transport for TcpPushChannel {
    async fn emit(&self, event: ClientEvent) -> Result<()> {
        self.outgoing
            .send(event)
            .await
            .map_err(|_| Error::Transport("push channel task is gone".to_string()))
    }
}

async fn run_connection_loop(
    config: TransportConfig,
    signals: mpsc::Sender<TransportSignal>,
    mut outgoing: mpsc::Receiver<ClientEvent>,
) {
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    let mut attempts: u32 = 0;

    loop {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(&config.addr)).await {
            Ok(Ok(stream)) => {
                attempts = 0;
                info!(addr = %config.addr, "Push channel connected");
                if signals.send(TransportSignal::Connected).await.is_err() {
                    return;
                }
                serve_connection(stream, &signals, &mut outgoing).await;
                warn!(addr = %config.addr, "Push channel lost");
                if signals.send(TransportSignal::Disconnected).await.is_err() {
                    return;
                }
            }
            Ok(Err(e)) => {
                warn!(addr = %config.addr, attempt = attempts + 1, "Push channel connect failed: {e}");
            }
            Err(_) => {
                warn!(
                    addr = %config.addr,
                    attempt = attempts + 1,
                    "Push channel connect timed out after {}s",
                    config.connect_timeout_secs
                );
            }
        }

        attempts += 1;
        if attempts >= config.reconnect_max_attempts {
            error!(
                addr = %config.addr,
                attempts = attempts,
                "Push channel reconnection exhausted; continuing on polling alone"
            );
            return;
        }
        tokio::time::sleep(config.reconnect_delay()).await;
    }
}

/// Serve one established connection until it drops or the client goes
/// away. Returning means the connection is over; the caller decides
/// whether to reconnect.
async fn serve_connection(
    stream: TcpStream,
    signals: &mpsc::Sender<TransportSignal>,
    outgoing: &mut mpsc::Receiver<ClientEvent>,
) {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (mut sink, mut lines) = framed.split();

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ServerEvent>(&line) {
                        Ok(event) => {
                            debug!(event = event.event_type(), "Push event received");
                            if signals.send(TransportSignal::Event(event)).await.is_err() {
                                return;
                            }
                        }
                        // Unknown events are tolerated; this client only
                        // understands its own dispatch table
                        Err(e) => warn!("Unrecognized push event: {e}"),
                    }
                }
                Some(Err(e)) => {
                    warn!("Push channel read error: {e}");
                    return;
                }
                None => {
                    info!("Push channel closed by server");
                    return;
                }
            },
            event = outgoing.recv() => match event {
                Some(event) => {
                    let line = match serde_json::to_string(&event) {
                        Ok(line) => line,
                        Err(e) => {
                            error!(event = event.event_type(), "Failed to encode event: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(line).await {
                        warn!(event = event.event_type(), "Push channel write failed: {e}");
                        return;
                    }
                }
                // Every emit handle dropped: the client is shutting down
                None => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionId;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn test_config(addr: String) -> TransportConfig {
        TransportConfig {
            addr,
            connect_timeout_secs: 5,
            reconnect_max_attempts: 3,
            reconnect_delay_ms: 50,
        }
    }

    #[tokio::test]
    async fn test_events_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let (transport, mut signals) = TcpPushChannel::connect(test_config(addr));

        let (socket, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = socket.into_split();

        assert!(matches!(
            signals.recv().await,
            Some(TransportSignal::Connected)
        ));

        // Server pushes an event down the wire
        write_half
            .write_all(b"{\"type\": \"spectator_stream_stopped\"}\n")
            .await
            .expect("write");
        let Some(TransportSignal::Event(event)) = signals.recv().await else {
            panic!("expected pushed event");
        };
        assert_eq!(event.event_type(), "spectator_stream_stopped");

        // Client emits; the server reads it as one JSON line
        transport
            .emit(ClientEvent::JoinSession {
                session_id: SessionId::from("s1"),
            })
            .await
            .expect("emit");
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read");
        let parsed: ClientEvent = serde_json::from_str(line.trim()).expect("parse");
        assert_eq!(parsed.event_type(), "join_session");
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let (_transport, mut signals) = TcpPushChannel::connect(test_config(addr));

        let (socket, _) = listener.accept().await.expect("accept");
        assert!(matches!(
            signals.recv().await,
            Some(TransportSignal::Connected)
        ));

        // Server drops the connection
        drop(socket);
        assert!(matches!(
            signals.recv().await,
            Some(TransportSignal::Disconnected)
        ));

        // The channel dials again on its own
        let (_socket, _) = listener.accept().await.expect("re-accept");
        assert!(matches!(
            signals.recv().await,
            Some(TransportSignal::Connected)
        ));
    }

    #[tokio::test]
    async fn test_unrecognized_events_are_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let (_transport, mut signals) = TcpPushChannel::connect(test_config(addr));
        let (socket, _) = listener.accept().await.expect("accept");
        let (_read_half, mut write_half) = socket.into_split();

        assert!(matches!(
            signals.recv().await,
            Some(TransportSignal::Connected)
        ));

        write_half
            .write_all(b"{\"type\": \"no_such_event\"}\n{\"type\": \"spectator_stream_stopped\"}\n")
            .await
            .expect("write");

        // The unknown event is dropped; the next one still arrives
        let Some(TransportSignal::Event(event)) = signals.recv().await else {
            panic!("expected event");
        };
        assert_eq!(event.event_type(), "spectator_stream_stopped");
    }
}
