//! Editor side of a WebSocket sandbox connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{BroadcastMessage, WireMessage};
use crate::surface::{AckSink, RenderSurface, SurfaceError};

/// Render surface backed by a WebSocket connection to a [`SandboxHost`].
///
/// A writer task drains outgoing frames into the socket and a reader task
/// forwards ACK frames into the broadcaster's ack sink. Both are aborted
/// when the surface is dropped.
///
/// [`SandboxHost`]: super::SandboxHost
pub struct WsSurface {
    target_id: String,
    url: String,
    outgoing: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WsSurface {
    /// Connect to the sandbox at `url`, routing its acks into `acks`.
    pub async fn connect(
        url: impl Into<String>,
        target_id: impl Into<String>,
        acks: AckSink,
    ) -> Result<Self, SurfaceError> {
        let url = url.into();
        let target_id = target_id.into();

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| SurfaceError::Connect(format!("{url}: {e}")))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        log::info!("Connected to sandbox {target_id} at {url}");

        // Writer task: forward outgoing frames to the socket
        let (outgoing, mut out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: acks go straight to the broadcaster
        let connected = Arc::new(AtomicBool::new(true));
        let reader_connected = connected.clone();
        let id = target_id.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match WireMessage::decode(text.as_str()).and_then(WireMessage::into_ack) {
                            Ok(ack) => {
                                if acks.send(ack).is_err() {
                                    log::debug!("Broadcaster gone; dropping sandbox {id}");
                                    break;
                                }
                            }
                            Err(e) => log::warn!("Sandbox {id} sent an unusable frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            reader_connected.store(false, Ordering::Release);
            log::info!("Sandbox {id} disconnected");
        });

        Ok(Self {
            target_id,
            url,
            outgoing,
            connected,
            writer,
            reader,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.outgoing.is_closed()
    }
}

impl RenderSurface for WsSurface {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    fn send(&self, message: BroadcastMessage) -> Result<(), SurfaceError> {
        if !self.is_connected() {
            return Err(SurfaceError::Disconnected(self.target_id.clone()));
        }
        let text = message.encode()?;
        self.outgoing
            .send(text)
            .map_err(|_| SurfaceError::Disconnected(self.target_id.clone()))
    }
}

impl Drop for WsSurface {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}
