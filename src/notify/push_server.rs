use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::NotificationHub;
use super::PushMessage;
use crate::constants::WS_CLOSE_REASON_SHUTDOWN;
use crate::constants::WS_CLOSE_TIMEOUT;
use crate::Error;
use crate::Result;
use crate::SlotRegistry;

/// WebSocket endpoint streaming [`PushMessage`]s as JSON text frames.
///
/// A new client first gets the latest status of every location, then the
/// slots currently present when replay is enabled, then live updates.
pub struct PushServer {
    listener: TcpListener,
    hub: NotificationHub,
    registry: Arc<SlotRegistry>,
    replay_on_connect: bool,
}

impl PushServer {
    pub async fn bind(
        address: SocketAddr,
        hub: NotificationHub,
        registry: Arc<SlotRegistry>,
        replay_on_connect: bool,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| Error::Server(format!("cannot bind push server on {address}: {e}")))?;
        Ok(Self {
            listener,
            hub,
            registry,
            replay_on_connect,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` fires, then closes every connection
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        info!("push server listening on {}", self.local_addr()?);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("push server stops accepting");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    let connection = Connection {
                        hub: self.hub.clone(),
                        registry: self.registry.clone(),
                        replay_on_connect: self.replay_on_connect,
                        shutdown: shutdown.clone(),
                    };
                    connections.spawn(async move {
                        if let Err(e) = connection.serve(stream, peer).await {
                            debug!(%peer, "push connection ended with error: {:?}", e);
                        }
                    });
                }
                // reap finished connections so the set does not grow without bound
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}
        info!("push server stopped");
        Ok(())
    }
}

struct Connection {
    hub: NotificationHub,
    registry: Arc<SlotRegistry>,
    replay_on_connect: bool,
    shutdown: watch::Receiver<()>,
}

impl Connection {
    async fn serve(
        mut self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<()> {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::Server(format!("websocket handshake with {peer} failed: {e}")))?;
        let (mut sink, mut source) = ws.split();

        // subscribe before replaying so nothing published meanwhile is lost
        let mut subscription = self.hub.subscribe();
        debug!(%peer, subscriber_id = subscription.id(), "push client connected");

        let mut greeting: Vec<PushMessage> = self
            .hub
            .statuses()
            .into_iter()
            .map(PushMessage::Status)
            .collect();
        if self.replay_on_connect {
            greeting.extend(self.registry.present_all().into_iter().map(PushMessage::Slot));
        }
        for message in greeting {
            let Some(text) = encode(&message) else { continue };
            match send_or_shutdown(&mut sink, text, &mut self.shutdown).await {
                Delivery::Sent => {}
                Delivery::Failed => return Ok(()),
                Delivery::Shutdown => {
                    close(&mut sink, peer).await;
                    return Ok(());
                }
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    close(&mut sink, peer).await;
                    break;
                }
                message = subscription.recv() => {
                    let Some(message) = message else {
                        // hub closed
                        close(&mut sink, peer).await;
                        break;
                    };
                    let Some(text) = encode(&message) else { continue };
                    match send_or_shutdown(&mut sink, text, &mut self.shutdown).await {
                        Delivery::Sent => {}
                        Delivery::Failed => break,
                        Delivery::Shutdown => {
                            close(&mut sink, peer).await;
                            break;
                        }
                    }
                }
                inbound = source.next() => {
                    match inbound {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(%peer, "push client error: {}", e);
                            break;
                        }
                        // no inbound protocol
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        debug!(%peer, missed = subscription.missed(), "push client disconnected");
        Ok(())
    }
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

enum Delivery {
    Sent,
    Failed,
    Shutdown,
}

/// Sends one text frame unless shutdown fires first.
///
/// The send stalls once a client stops reading and its socket buffer fills.
async fn send_or_shutdown(
    sink: &mut WsSink,
    text: String,
    shutdown: &mut watch::Receiver<()>,
) -> Delivery {
    tokio::select! {
        sent = sink.send(Message::Text(text)) => match sent {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                debug!("push send failed: {}", e);
                Delivery::Failed
            }
        },
        _ = shutdown.changed() => Delivery::Shutdown,
    }
}

/// Best-effort close frame, given up after [`WS_CLOSE_TIMEOUT`]
async fn close(
    sink: &mut WsSink,
    peer: SocketAddr,
) {
    if timeout(WS_CLOSE_TIMEOUT, sink.send(shutdown_frame())).await.is_err() {
        debug!(%peer, "client did not take the close frame in time");
    }
}

fn encode(message: &PushMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("cannot encode push message: {}", e);
            None
        }
    }
}

fn shutdown_frame() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Away,
        reason: WS_CLOSE_REASON_SHUTDOWN.into(),
    }))
}
