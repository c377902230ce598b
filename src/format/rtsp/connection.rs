use bytes::Bytes;
use log::trace;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::message::Headers;
use super::RTSPError;
use crate::format::rtcp::RTCPPacket;

/// Upper bound for one message head; anything longer is not RTSP.
const MAX_HEAD_SIZE: usize = 16 * 1024;
/// Upper bound for a `Content-Length` body.
const MAX_BODY_SIZE: usize = 256 * 1024;

/// Write half of a control connection, shared by the request path and the
/// interleaved media path so their writes never interleave mid-message.
pub type ControlWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

pub fn control_writer<W>(writer: W) -> ControlWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(writer)))
}

/// One unit read from a control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message { head: String, body: String },
    /// `$ channel len` framed binary data (RTCP from players, mostly)
    Interleaved { channel: u8, data: Bytes },
}

/// Reads the next message or interleaved frame.
pub async fn read_incoming<R>(reader: &mut R) -> Result<Incoming, RTSPError>
where
    R: AsyncBufRead + Unpin,
{
    let first = match reader.fill_buf().await?.first() {
        Some(b) => *b,
        None => return Err(RTSPError::Closed),
    };

    if first == b'$' {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).await?;
        return Ok(Incoming::Interleaved {
            channel: header[1],
            data: Bytes::from(data),
        });
    }

    let mut head = String::new();
    loop {
        let mut line = String::new();
        let room = (MAX_HEAD_SIZE + 1 - head.len()) as u64;
        if (&mut *reader).take(room).read_line(&mut line).await? == 0 {
            return Err(RTSPError::Closed);
        }
        if line.trim().is_empty() {
            if head.is_empty() {
                // stray CRLF between messages
                continue;
            }
            break;
        }
        head.push_str(&line);
        if head.len() > MAX_HEAD_SIZE {
            return Err(RTSPError::Malformed("message head too large".into()));
        }
    }

    let length = Headers::from_head(&head).content_length();
    if length > MAX_BODY_SIZE {
        return Err(RTSPError::Malformed(format!("body of {} bytes too large", length)));
    }
    let body = if length > 0 {
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        String::from_utf8_lossy(&body).into_owned()
    } else {
        String::new()
    };

    Ok(Incoming::Message { head, body })
}

/// Reads the next RTSP message, skipping interleaved frames.
pub async fn read_message<R>(reader: &mut R) -> Result<(String, String), RTSPError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_incoming(reader).await? {
            Incoming::Message { head, body } => return Ok((head, body)),
            Incoming::Interleaved { channel, data } => {
                if let Ok(packet) = RTCPPacket::parse(&data) {
                    trace!("interleaved RTCP on channel {}: {:?}", channel, packet);
                }
            }
        }
    }
}

pub async fn write_all(writer: &ControlWriter, data: &[u8]) -> io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(data).await?;
    writer.flush().await
}

/// Writes an interleaved frame: 4-byte header and payload under one lock.
pub async fn write_interleaved(writer: &ControlWriter, header: &[u8; 4], payload: &[u8]) -> io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(header).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}
