//! Newline-delimited JSON framing shared by the server and the client.
//!
//! One UTF-8 JSON object per LF-terminated line. A stream may carry any
//! number of frames; readers pull one frame per call until EOF.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::ProtocolError;
use crate::protocol::{Request, Response, FRAME_DELIMITER, MAX_MESSAGE_SIZE};

/// Read one frame from the stream. Returns `Ok(None)` on a clean EOF at a
/// frame boundary. A final frame without a trailing newline is accepted.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line: Vec<u8> = Vec::new();
        loop {
            let read = reader.read_until(FRAME_DELIMITER, &mut line).await?;
            if read == 0 {
                break;
            }
            if line.len() > MAX_MESSAGE_SIZE {
                return Err(ProtocolError::MessageTooLarge);
            }
            if line.last() == Some(&FRAME_DELIMITER) {
                break;
            }
        }

        if line.last() == Some(&FRAME_DELIMITER) {
            line.pop();
        }
        if line.is_empty() {
            // Either EOF or a blank keep-alive line; only EOF ends the stream.
            let buffered = reader.fill_buf().await?;
            if buffered.is_empty() {
                return Ok(None);
            }
            continue;
        }
        return Ok(Some(line));
    }
}

/// Encode a value as one JSON line.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = serde_json::to_vec(value).map_err(ProtocolError::Encode)?;
    if bytes.len() >= MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge);
    }
    bytes.push(FRAME_DELIMITER);
    Ok(bytes)
}

/// Write a value as one JSON line and flush it.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = encode_frame(value)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

/// Read the next request, or `None` on EOF.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    match read_frame(reader).await? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Read the next response, or `None` on EOF.
pub async fn read_response<R>(reader: &mut R) -> Result<Option<Response>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    match read_frame(reader).await? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}
