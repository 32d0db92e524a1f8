//! Real-time session gateway.
//!
//! Connections, the connection registry with single-session enforcement,
//! liveness probing, inbound routing, and the axum HTTP/WebSocket server.

pub mod connection;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;

pub use connection::{Connection, ConnectionState};
pub use liveness::LivenessMonitor;
pub use registry::{ConnectionRegistry, ConnectionStats};
pub use router::{InboundEnvelope, InboundRouter};
pub use server::GatewayState;
pub use transport::{ChannelTransport, OutboundFrame, Transport};
