//! Length-prefixed bincode framing, shared by both ends of the socket.
//!
//! A frame is a big-endian u32 length followed by that many bincode bytes.
//! Both directions use the same two functions, so the wire format lives in
//! exactly one place.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ControlError, Result};

/// Read one frame and decode it.
///
/// `max_len` bounds the declared payload size; anything larger is rejected
/// before a byte of it is read.
pub(crate) async fn read_frame<T, S>(stream: &mut S, max_len: u32) -> Result<T>
where
    T: DeserializeOwned,
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ControlError::ConnectionClosed
        } else {
            ControlError::Io(e)
        }
    })?;

    let declared = u32::from_be_bytes(header);
    if declared > max_len {
        return Err(ControlError::ProtocolDeserialization(
            bincode::error::DecodeError::OtherString(format!(
                "frame of {declared} bytes exceeds limit of {max_len}"
            )),
        ));
    }

    let mut payload = vec![0u8; declared as usize];
    stream.read_exact(&mut payload).await?;

    let (value, _) = bincode::serde::decode_from_slice(&payload, bincode::config::legacy())?;
    Ok(value)
}

/// Encode a value and write it as one frame.
pub(crate) async fn write_frame<T, S>(stream: &mut S, value: &T) -> Result<()>
where
    T: Serialize,
    S: AsyncWrite + Unpin,
{
    let payload = bincode::serde::encode_to_vec(value, bincode::config::legacy())?;
    let declared = u32::try_from(payload.len())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    stream.write_all(&declared.to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}
