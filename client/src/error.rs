use shared::codec::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("connection closed by server")]
    ConnectionClosed,
    #[error("no pong for {0} seconds")]
    PingTimeout(u64),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
