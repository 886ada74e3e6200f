pub mod call;
pub mod chatstate;
pub mod conversation;
pub mod message;
pub mod router;
pub mod traits;
