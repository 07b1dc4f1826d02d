//! Network layer: listener, per-connection serving, server state

pub mod connection;
pub mod listener;
pub mod server;

pub use connection::{Connection, ConnectionRole};
pub use listener::Listener;
pub use server::Server;
