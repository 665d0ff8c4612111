use crate::client_manager::ConnId;
use shared::codec::ProtocolError;
use thiserror::Error;

/// Failures surfaced by room handlers; logged at the handler/tick boundary
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("no custom method named `{0}`")]
    UnknownMethod(String),
    #[error("invalid parameters for `{method}`: {reason}")]
    InvalidParams { method: String, reason: String },
    #[error("connection {0} has not joined the room")]
    NotJoined(ConnId),
    #[error("user {user} does not own entity {entity}")]
    NotOwner { user: String, entity: String },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
