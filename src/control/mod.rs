//! External control channel
//!
//! A loopback TCP listener speaking newline-framed, base64-encoded JSON.
//! Commands reconfigure the live daemon; see [`protocol::Command`].

pub mod client;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use protocol::Command;
pub use server::ControlServer;
