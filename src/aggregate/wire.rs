//! Frames exchanged between parties.
//!
//! Each frame is a big-endian `u32` byte length followed by a JSON body.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a frame body.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame in both directions on a new connection.
    Hello {
        party_id: u32,
        version: u32,
        /// Roster fingerprint; see `Topology::fingerprint`.
        roster: String,
    },
    /// One additive share of the sender's vector.
    Share {
        round: u64,
        name: String,
        k_threshold: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        labels_digest: Option<String>,
        values: Vec<u32>,
    },
    /// The sender's sum of all shares it holds.
    Partial { round: u64, values: Vec<u32> },
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Share { .. } => "share",
            Frame::Partial { .. } => "partial",
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(frame)
        .map_err(|e| Error::protocol(format!("cannot encode {} frame: {}", frame.kind(), e)))?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(Error::protocol(format!(
            "{} frame of {} bytes exceeds the {} byte limit",
            frame.kind(),
            body.len(),
            MAX_FRAME_BYTES
        )));
    }

    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::protocol("peer closed the connection"));
        }
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_BYTES {
        return Err(Error::protocol(format!(
            "incoming frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_BYTES
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::protocol("peer closed the connection mid-frame")
        } else {
            e.into()
        }
    })?;

    serde_json::from_slice(&body).map_err(|e| Error::protocol(format!("malformed frame: {}", e)))
}
