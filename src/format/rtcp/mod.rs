//! # RTP Control Protocol (RTCP)
//!
//! Sender-side RTCP: Sender Report (SR) and Goodbye (BYE) encoding, NTP
//! wall-clock helpers and the [`RtcpReporter`] that emits both for every
//! track of a session. Inbound Receiver Reports from players are parsed
//! so they can be logged.
//!
//! ## Example
//!
//! ```rust
//! use rtspcast::format::rtcp::{sender_report, RTCPPacket};
//!
//! let sr = sender_report(0x1234_5678, 0xdea0_0000_8000_0000, 90_000, 10, 3_000);
//! match RTCPPacket::parse(&sr).unwrap() {
//!     RTCPPacket::SenderReport { ssrc, packet_count, .. } => {
//!         assert_eq!(ssrc, 0x1234_5678);
//!         assert_eq!(packet_count, 10);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

mod reporter;

#[cfg(test)]
mod tests;

pub use reporter::{RtcpReporter, RtcpSink};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

pub const PT_SENDER_REPORT: u8 = 200;
pub const PT_RECEIVER_REPORT: u8 = 201;
pub const PT_GOODBYE: u8 = 203;

/// Errors that can occur during RTCP packet operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RTCPError {
    /// The packet data is malformed or incomplete
    #[error("Invalid RTCP packet")]
    InvalidPacket,

    /// The packet type is not supported by this implementation
    #[error("Unsupported packet type")]
    UnsupportedType,
}

/// Specialized Result type for RTCP operations
pub type Result<T> = std::result::Result<T, RTCPError>;

/// Reception statistics for an RTP source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionReport {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub packets_lost: u32,
    pub highest_seq: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_last_sr: u32,
}

/// The RTCP packets this crate reads back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RTCPPacket {
    SenderReport {
        ssrc: u32,
        /// NTP timestamp in 64-bit fixed point format
        ntp_timestamp: u64,
        rtp_timestamp: u32,
        packet_count: u32,
        octet_count: u32,
    },
    ReceiverReport {
        ssrc: u32,
        reports: Vec<ReceptionReport>,
    },
    Goodbye {
        sources: Vec<u32>,
    },
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

impl RTCPPacket {
    /// Parses the first RTCP packet of a (possibly compound) datagram.
    ///
    /// # Errors
    ///
    /// Returns `RTCPError::InvalidPacket` if the packet is truncated or not
    /// version 2, and `RTCPError::UnsupportedType` for SDES/APP and others.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(RTCPError::InvalidPacket);
        }

        let version = (data[0] >> 6) & 0x03;
        if version != 2 {
            return Err(RTCPError::InvalidPacket);
        }

        let count = (data[0] & 0x1f) as usize;
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        let end = (length + 1) * 4;
        if data.len() < end {
            return Err(RTCPError::InvalidPacket);
        }

        match data[1] {
            PT_SENDER_REPORT => {
                if end < 28 {
                    return Err(RTCPError::InvalidPacket);
                }
                let ntp_msw = read_u32(data, 8) as u64;
                let ntp_lsw = read_u32(data, 12) as u64;
                Ok(RTCPPacket::SenderReport {
                    ssrc: read_u32(data, 4),
                    ntp_timestamp: (ntp_msw << 32) | ntp_lsw,
                    rtp_timestamp: read_u32(data, 16),
                    packet_count: read_u32(data, 20),
                    octet_count: read_u32(data, 24),
                })
            }
            PT_RECEIVER_REPORT => {
                if end < 8 + count * 24 {
                    return Err(RTCPError::InvalidPacket);
                }
                let reports = (0..count)
                    .map(|i| parse_reception_report(&data[8 + i * 24..8 + (i + 1) * 24]))
                    .collect::<Result<Vec<_>>>()?;
                Ok(RTCPPacket::ReceiverReport {
                    ssrc: read_u32(data, 4),
                    reports,
                })
            }
            PT_GOODBYE => {
                if end < 4 + count * 4 {
                    return Err(RTCPError::InvalidPacket);
                }
                let sources = (0..count).map(|i| read_u32(data, 4 + i * 4)).collect();
                Ok(RTCPPacket::Goodbye { sources })
            }
            _ => Err(RTCPError::UnsupportedType),
        }
    }
}

/// Parse a 24-byte reception report block
fn parse_reception_report(data: &[u8]) -> Result<ReceptionReport> {
    if data.len() < 24 {
        return Err(RTCPError::InvalidPacket);
    }

    Ok(ReceptionReport {
        ssrc: read_u32(data, 0),
        fraction_lost: data[4],
        packets_lost: u32::from_be_bytes([0, data[5], data[6], data[7]]),
        highest_seq: read_u32(data, 8),
        jitter: read_u32(data, 12),
        last_sr: read_u32(data, 16),
        delay_last_sr: read_u32(data, 20),
    })
}

/// Builds a 28-byte Sender Report without reception blocks.
pub fn sender_report(ssrc: u32, ntp_timestamp: u64, rtp_timestamp: u32, packet_count: u32, octet_count: u32) -> [u8; 28] {
    let mut buf = [0u8; 28];
    buf[0] = 0x80;
    buf[1] = PT_SENDER_REPORT;
    // length in 32-bit words minus one
    buf[2..4].copy_from_slice(&6u16.to_be_bytes());
    buf[4..8].copy_from_slice(&ssrc.to_be_bytes());
    buf[8..16].copy_from_slice(&ntp_timestamp.to_be_bytes());
    buf[16..20].copy_from_slice(&rtp_timestamp.to_be_bytes());
    buf[20..24].copy_from_slice(&packet_count.to_be_bytes());
    buf[24..28].copy_from_slice(&octet_count.to_be_bytes());
    buf
}

/// Builds a BYE for a single source, no reason.
pub fn goodbye(ssrc: u32) -> [u8; 8] {
    let [a, b, c, d] = ssrc.to_be_bytes();
    [0x81, PT_GOODBYE, 0x00, 0x01, a, b, c, d]
}

/// Converts time since the Unix epoch to 64-bit NTP fixed point.
///
/// The fraction keeps millisecond precision, which is what players use for
/// lip sync anyway.
pub fn ntp_from_unix(since_epoch: Duration) -> u64 {
    let seconds = since_epoch.as_secs() + NTP_UNIX_OFFSET;
    let fraction = (since_epoch.subsec_millis() as u64) * (1u64 << 32) / 1000;
    (seconds << 32) | (fraction & 0xffff_ffff)
}

/// Get current NTP timestamp (64-bit fixed point)
pub fn get_ntp_timestamp() -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    ntp_from_unix(now)
}
