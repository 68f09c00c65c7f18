//! Render surfaces: the broadcaster's view of a rendering sandbox.
//!
//! A surface only has to accept outgoing messages. Acknowledgments flow
//! the other way through an [`AckSink`] handed out by the broadcaster, so
//! any sandbox mechanism (in-process task, worker, subprocess, socket)
//! can implement [`RenderSurface`].
//!
//! ```text
//!  Broadcaster ──send()──► RenderSurface ──► sandbox ──render──┐
//!       ▲                                                       │
//!       └──────────────────── AckSink ◄──── AckMessage ◄────────┘
//! ```

use tokio::sync::mpsc;

use crate::protocol::{AckMessage, BroadcastMessage, ProtocolError};

/// Inbound acknowledgment channel of a broadcaster.
pub type AckSink = mpsc::UnboundedSender<AckMessage>;

/// Capability to deliver state to one rendering target.
pub trait RenderSurface: Send + Sync {
    fn target_id(&self) -> &str;

    /// Queue `message` for delivery. Must not block.
    fn send(&self, message: BroadcastMessage) -> Result<(), SurfaceError>;
}

/// Renders broadcast state inside a sandbox.
pub trait SandboxRenderer: Send + 'static {
    fn render(&mut self, message: &BroadcastMessage);
}

impl<F> SandboxRenderer for F
where
    F: FnMut(&BroadcastMessage) + Send + 'static,
{
    fn render(&mut self, message: &BroadcastMessage) {
        self(message)
    }
}

/// Surface delivery errors.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceError {
    /// The sandbox side has gone away
    Disconnected(String),
    /// Could not reach the sandbox at all
    Connect(String),
    Protocol(ProtocolError),
}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected(id) => write!(f, "Surface {id} disconnected"),
            Self::Connect(e) => write!(f, "Connection failed: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for SurfaceError {}

impl From<ProtocolError> for SurfaceError {
    fn from(e: ProtocolError) -> Self {
        SurfaceError::Protocol(e)
    }
}

/// In-process surface backed by an unbounded channel.
pub struct ChannelSurface {
    target_id: String,
    tx: mpsc::UnboundedSender<BroadcastMessage>,
}

impl RenderSurface for ChannelSurface {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    fn send(&self, message: BroadcastMessage) -> Result<(), SurfaceError> {
        self.tx
            .send(message)
            .map_err(|_| SurfaceError::Disconnected(self.target_id.clone()))
    }
}

/// Sandbox half of a [`ChannelSurface`].
pub struct SandboxEndpoint {
    target_id: String,
    inbox: mpsc::UnboundedReceiver<BroadcastMessage>,
    acks: AckSink,
}

/// Create a connected surface / sandbox pair for `target_id`.
pub fn channel_surface(target_id: impl Into<String>, acks: AckSink) -> (ChannelSurface, SandboxEndpoint) {
    let target_id = target_id.into();
    let (tx, inbox) = mpsc::unbounded_channel();
    (
        ChannelSurface {
            target_id: target_id.clone(),
            tx,
        },
        SandboxEndpoint {
            target_id,
            inbox,
            acks,
        },
    )
}

impl SandboxEndpoint {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Wait for the next broadcast. `None` once the surface is dropped.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BroadcastMessage> {
        self.inbox.try_recv().ok()
    }

    /// Acknowledge `message`. Returns `false` if the broadcaster is gone.
    pub fn ack(&self, message: &BroadcastMessage) -> bool {
        self.acks
            .send(AckMessage::for_update(message, self.target_id.clone()))
            .is_ok()
    }

    /// Render and acknowledge every broadcast until the surface is dropped.
    pub async fn serve<R: SandboxRenderer>(mut self, mut renderer: R) {
        while let Some(message) = self.inbox.recv().await {
            renderer.render(&message);
            if !self.ack(&message) {
                log::debug!("Sandbox {}: broadcaster gone, stopping", self.target_id);
                break;
            }
        }
    }
}
