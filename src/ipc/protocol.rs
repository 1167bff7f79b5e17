//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::instance::InstanceError;

/// Upper bound for a single message body
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Messages sent by a later launch to the running instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceMessage {
    /// A second launch was attempted and is about to exit
    SecondInstanceStarted {
        /// Process id of the launcher
        pid: u32,
    },
}

/// Encode a length-prefixed JSON frame
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, InstanceError> {
    let body = serde_json::to_vec(msg).map_err(|e| InstanceError::Protocol(e.to_string()))?;
    if body.len() > MAX_MESSAGE_LEN {
        return Err(InstanceError::Protocol(format!(
            "message too large: {} bytes",
            body.len()
        )));
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Send a length-prefixed JSON message over a blocking stream
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<(), InstanceError> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed JSON message
pub async fn read_message<R>(reader: &mut R) -> Result<InstanceMessage, InstanceError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(InstanceError::Protocol(format!("message too large: {} bytes", len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    serde_json::from_slice(&body).map_err(|e| InstanceError::Protocol(e.to_string()))
}
