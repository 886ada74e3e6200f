pub mod call;
pub mod conversation;
pub mod events;
pub mod message;
pub mod user;
