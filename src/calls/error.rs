use super::media::MediaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("a call is already in progress")]
    CallInProgress,
    #[error("no active call")]
    NoActiveCall,
    #[error("the call is not in a state that allows this operation")]
    InvalidState,
    #[error("no offer has been received for this call yet")]
    NoPendingOffer,
    #[error("the call ended before the operation completed")]
    Cancelled,
    #[error("media error: {0}")]
    Media(#[from] MediaError),
}
