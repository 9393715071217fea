//! Server-side registries: live connections and room membership.
//!
//! Both are owned instances handed around by `Arc`; there is no ambient
//! global state. Mutation happens only inside per-connection message
//! handling, one frame at a time.

mod connections;
mod rooms;

pub use connections::ConnectionRegistry;
pub use rooms::RoomRegistry;
