//! Client-facing surface: the WebSocket message router and the HTTP API.

mod auth;
mod connection;
pub mod forward;
pub mod handlers;
mod middleware;
pub mod protocol;
pub mod router;
mod routes;
mod server;
mod state;

pub use forward::spawn_event_forwarder;
pub use protocol::{Envelope, Inbound};
pub use router::{HandlerContext, MessageHandler, MessageRouter, MessageRouterBuilder};
pub use server::GatewayServer;
