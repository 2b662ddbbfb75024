//! Wire boundary for the repair service: one persistent websocket, JSON frames
//! decoded into a closed set of typed events.

mod connection;
mod error;
mod frame;
mod reconnect;

pub use connection::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState, ConnectionWorker,
    LoopbackPeer,
};
pub use error::{TransportError, TransportResult};
pub use frame::{InboundEvent, OutboundFrame, UNKNOWN_ERROR_KIND, decode_inbound};
pub use reconnect::ReconnectPolicy;
