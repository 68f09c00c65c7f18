//! Sandbox side: accepts editor connections, renders every UPDATE_STORY
//! frame and answers with an ACK.
//!
//! ```text
//! editor A ──┐
//!            ├── SandboxHost ── SandboxRenderer (shared)
//! editor B ──┘        │
//!                     └── ACK back on the same socket
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use storycast_core::DEFAULT_DEVICE;

use crate::protocol::{AckMessage, ProtocolError, WireMessage};
use crate::surface::SandboxRenderer;

/// Sandbox host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Target id this sandbox acknowledges as when a frame names none
    pub target_id: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            target_id: DEFAULT_DEVICE.to_string(),
        }
    }
}

/// Host statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_rendered: u64,
    pub malformed_frames: u64,
}

/// Sandbox host errors.
#[derive(Debug)]
pub enum HostError {
    Io(std::io::Error),
    WebSocket(String),
    Protocol(ProtocolError),
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::WebSocket(e) => write!(f, "WebSocket error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for HostError {}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        HostError::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HostError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        HostError::WebSocket(e.to_string())
    }
}

impl From<ProtocolError> for HostError {
    fn from(e: ProtocolError) -> Self {
        HostError::Protocol(e)
    }
}

/// WebSocket server hosting one rendering sandbox.
pub struct SandboxHost<R> {
    config: HostConfig,
    renderer: Arc<Mutex<R>>,
    stats: Arc<RwLock<HostStats>>,
}

impl<R: SandboxRenderer> SandboxHost<R> {
    pub fn new(config: HostConfig, renderer: R) -> Self {
        Self {
            config,
            renderer: Arc::new(Mutex::new(renderer)),
            stats: Arc::new(RwLock::new(HostStats::default())),
        }
    }

    pub fn target_id(&self) -> &str {
        &self.config.target_id
    }

    pub async fn stats(&self) -> HostStats {
        self.stats.read().await.clone()
    }

    /// Bind the configured address and accept editors until an accept fails.
    pub async fn run(&self) -> Result<(), HostError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept editors on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), HostError> {
        log::info!(
            "Sandbox {} listening on {}",
            self.config.target_id,
            listener.local_addr()?
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let target_id = self.config.target_id.clone();
            let renderer = self.renderer.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, target_id, renderer, stats.clone()).await {
                    log::error!("Connection error from {addr}: {e}");
                }
                stats.write().await.active_connections -= 1;
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        target_id: String,
        renderer: Arc<Mutex<R>>,
        stats: Arc<RwLock<HostStats>>,
    ) -> Result<(), HostError> {
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let session = Uuid::new_v4();
        log::info!("Editor session {session} connected to sandbox {target_id} from {addr}");

        while let Some(frame) = ws_receiver.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                Message::Binary(_) => {
                    log::warn!("Session {session}: binary frames are not part of the protocol");
                    stats.write().await.malformed_frames += 1;
                    continue;
                }
                _ => continue,
            };

            let update = match WireMessage::decode(text.as_str()).and_then(WireMessage::into_update) {
                Ok(update) => update,
                Err(e) => {
                    log::warn!("Session {session}: ignoring frame: {e}");
                    stats.write().await.malformed_frames += 1;
                    continue;
                }
            };

            // Ack as the target the editor addressed, so its pending entry clears.
            let ack_as = match update.target_id.as_deref() {
                Some(addressed) if addressed != target_id => {
                    log::warn!("Session {session}: frame for {addressed} rendered by sandbox {target_id}");
                    addressed.to_string()
                }
                _ => target_id.clone(),
            };

            renderer.lock().await.render(&update);
            stats.write().await.frames_rendered += 1;
            log::trace!("Session {session}: rendered cycle {}", update.cycle);

            let ack = AckMessage::for_update(&update, ack_as).encode()?;
            ws_sender.send(Message::Text(ack.into())).await?;
        }

        log::info!("Editor session {session} closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BroadcastMessage;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9191");
        assert_eq!(config.target_id, DEFAULT_DEVICE);
    }

    #[tokio::test]
    async fn test_new_host_has_no_stats() {
        let host = SandboxHost::new(HostConfig::default(), |_: &BroadcastMessage| {});
        assert_eq!(host.target_id(), DEFAULT_DEVICE);
        assert_eq!(host.stats().await, HostStats::default());
    }

    #[test]
    fn test_error_display() {
        let err = HostError::from(ProtocolError::InvalidMessageType);
        assert_eq!(err.to_string(), "Protocol error: Invalid message type");
    }
}
