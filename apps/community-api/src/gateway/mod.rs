//! Realtime gateway: WebSocket transport, connection lifecycle, the
//! presence & room registry and the broadcast router.

pub mod events;
pub mod fanout;
pub mod handler;
pub mod lifecycle;
pub mod registry;
pub mod server;
pub mod session;
