//! Outbound half of a client transport.
//!
//! The gateway never writes to a socket directly. Each connection owns a
//! [`Transport`]; the production implementation queues frames for a
//! per-socket writer task so that registry and router code never blocks
//! on network I/O.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::{AppError, Result};

/// One unit of work for a socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Serialized JSON text frame.
    Text(String),
    /// Close the socket after flushing everything queued before this frame.
    Close,
}

/// Send/close primitives for one client connection.
pub trait Transport: Send + Sync {
    /// Deliver one serialized text frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the frame cannot be delivered.
    fn send(&self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Close the transport. Closing an already closed transport is a no-op.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// [`Transport`] backed by a bounded frame queue.
///
/// A full queue means the peer is not draining its socket; the frame is
/// refused immediately instead of stalling the sender.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<OutboundFrame>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its writer task drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.tx
                .try_send(OutboundFrame::Text(frame))
                .map_err(|err| match err {
                    mpsc::error::TrySendError::Full(_) => {
                        AppError::Transport("outbound queue is full".into())
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        AppError::Transport("outbound queue is closed".into())
                    }
                })
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            // A closed queue means the writer is already gone.
            let _ = self.tx.send(OutboundFrame::Close).await;
        })
    }
}
