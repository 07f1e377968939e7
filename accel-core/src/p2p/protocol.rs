use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size accepted by either protocol. Oversize frames abort
/// the stream rather than being silently truncated.
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {max} byte limit", max = MAX_FRAME_SIZE)]
    TooLarge(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Writes a big-endian u32 length prefix followed by the JSON-encoded
/// `value`.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    if body.len() as u64 > MAX_FRAME_SIZE as u64 {
        return Err(FrameError::TooLarge(body.len() as u32));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one big-endian u32 length prefix plus the JSON payload it
/// announces, rejecting anything over `MAX_FRAME_SIZE`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// `/​<app>/blob/1.0.0` protocol envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BlobProtocolMessage {
    Request { id: String, digest: String },
    Response {
        id: String,
        digest: String,
        size: u64,
        error: Option<String>,
    },
}

/// `/​<app>/meta/1.0.0` protocol envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MetaProtocolMessage {
    Have { digest: String },
    HaveResponse { data: bool },
    Ping,
    Pong,
}

/// Circuit-relay control messages: a node asks a relay peer to splice a
/// connection through to a third node it cannot dial directly, per the
/// `/p2p/<relay>/p2p-circuit/p2p/<target>` addressing scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CircuitProtocolMessage {
    Connect { target_node_id: String },
    Ack { ok: bool, error: Option<String> },
}

/// The outer envelope multiplexed over a single connection: selects which
/// of the two protocol endpoints (or the connection handshake) a frame
/// belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol")]
pub enum Envelope {
    Hello {
        node_id: String,
        listen_port: u16,
        relay_capable: bool,
    },
    Blob(BlobProtocolMessage),
    Meta(MetaProtocolMessage),
    Circuit(CircuitProtocolMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_blob_request() {
        let mut buf = Vec::new();
        let msg = BlobProtocolMessage::Request {
            id: "1".into(),
            digest: "sha256:abc".into(),
        };
        write_frame(&mut buf, &msg).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded: BlobProtocolMessage = read_frame(&mut cursor).await.unwrap();
        match decoded {
            BlobProtocolMessage::Request { id, digest } => {
                assert_eq!(id, "1");
                assert_eq!(digest, "sha256:abc");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn rejects_oversize_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let err = read_frame::<_, MetaProtocolMessage>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(_)));
    }
}
