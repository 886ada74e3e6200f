pub mod calls;
pub mod chatstate;
pub mod client;
pub mod config;
pub mod conversations;
pub mod handlers;
pub mod handshake;
pub mod messages;
pub mod request;
pub mod rest;
pub mod socket;
pub mod transport;
pub mod types;

pub use client::{Client, ClientError};
pub use config::ClientConfig;
pub use request::RequestError;
