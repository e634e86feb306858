use thiserror::Error;

use crate::protocol::MAX_MESSAGE_SIZE;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("message exceeds maximum size of {MAX_MESSAGE_SIZE} bytes")]
    MessageTooLarge,

    #[error("i/o error on control stream: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to control endpoint {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send request ({command}): {source}")]
    Send {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to receive response ({command}): {source}")]
    Receive {
        command: &'static str,
        #[source]
        source: ProtocolError,
    },

    #[error("connection to daemon was lost")]
    Disconnected,

    #[error("malformed response payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
