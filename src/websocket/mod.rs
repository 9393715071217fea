//! Server side of the realtime relay: wire protocol, message router and the
//! websocket accept loop.

pub mod protocol;
mod router;
mod server;

pub use protocol::{ClientFrame, PresenceStatus, ServerFrame};
pub use router::MessageRouter;
pub use server::WebSocketServer;
