pub mod error;
pub mod frame;

pub use error::SocketError;
pub use frame::Frame;
