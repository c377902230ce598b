//! # Real-time Transport Protocol (RTP) packetization
//!
//! One stateful packetizer per track turns encoded [`MediaFrame`]s into
//! RTP packets no larger than [`MAX_PACKET_SIZE`]:
//!
//! - H.264 (RFC 6184): single NAL units, FU-A fragments and STAP-A parameter sets
//! - H.265 (RFC 7798): single NAL units and FU fragments, AUD per access unit
//! - AV1: OBU aggregation with the one-byte aggregation header
//! - AAC (RFC 3640), G.711 (PCMA) and OPUS (RFC 7587)
//!
//! Packetizers never release the frame; the caller owns it.
//!
//! ## Example
//!
//! ```rust
//! use rtspcast::av::{AudioCodec, AudioParams, MediaFrame};
//! use rtspcast::format::rtp::{AudioPacketizer, RtpPacketizer};
//!
//! let params = AudioParams { codec: AudioCodec::G711, sample_rate: 8000, is_stereo: false };
//! let mut packetizer = AudioPacketizer::new(&params);
//! packetizer.set_ssrc(0x1234_5678);
//!
//! let frame = MediaFrame::audio(vec![0xd5; 160], 20_000);
//! let packets = packetizer.create_packets(&frame);
//! assert_eq!(packets.len(), 1);
//! assert_eq!(packets[0].timestamp, 160);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::av::{rtp_time_from_us, AudioCodec, AudioParams, MediaFrame, MediaKind, VideoCodec, VideoParams};

mod aac;
mod av1;
mod g711;
mod h264;
mod h265;
mod opus;

#[cfg(test)]
mod tests;

pub use aac::AacPacketizer;
pub use av1::Av1Packetizer;
pub use g711::G711Packetizer;
pub use h264::H264Packetizer;
pub use h265::H265Packetizer;
pub use opus::OpusPacketizer;

pub const MTU: usize = 1200;
/// Largest RTP packet emitted, leaving room for IP and UDP headers.
pub const MAX_PACKET_SIZE: usize = MTU - 28;
pub const RTP_HEADER_LENGTH: usize = 12;

/// Payload type shared by every video codec.
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;

/// Errors that can occur while reading RTP packets
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RTPError {
    /// The packet data is malformed or incomplete
    #[error("Invalid RTP packet")]
    InvalidPacket,
}

/// Specialized Result type for RTP operations
pub type Result<T> = std::result::Result<T, RTPError>;

/// One serialized RTP packet ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFrame {
    pub kind: MediaKind,
    pub data: Bytes,
    /// RTP timestamp written into the header
    pub timestamp: u32,
}

impl RtpFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sequence_number(&self) -> u16 {
        if self.data.len() < 4 {
            return 0;
        }
        u16::from_be_bytes([self.data[2], self.data[3]])
    }
}

/// Fixed RTP header fields read back from a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RTPPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RTPPacket {
    /// Parses an RTP packet from raw bytes
    ///
    /// # Errors
    ///
    /// Returns `RTPError::InvalidPacket` if the packet is shorter than
    /// 12 bytes, the version is not 2 or the CSRC list is truncated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_LENGTH {
            return Err(RTPError::InvalidPacket);
        }
        let version = (data[0] >> 6) & 0x03;
        if version != 2 {
            return Err(RTPError::InvalidPacket);
        }

        let csrc_count = (data[0] & 0x0f) as usize;
        let offset = RTP_HEADER_LENGTH + csrc_count * 4;
        if offset > data.len() {
            return Err(RTPError::InvalidPacket);
        }

        Ok(Self {
            marker: (data[1] & 0x80) != 0,
            payload_type: data[1] & 0x7f,
            sequence_number: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload: Bytes::copy_from_slice(&data[offset..]),
        })
    }
}

/// Header state shared by all packetizers: payload type, clock, sequence and SSRC.
#[derive(Debug, Clone)]
pub struct PacketBase {
    payload_type: u8,
    clock_rate: u32,
    seq: u16,
    ssrc: u32,
}

impl PacketBase {
    pub fn new(payload_type: u8, clock_rate: u32) -> Self {
        Self {
            payload_type,
            clock_rate,
            seq: rand::random(),
            ssrc: 0,
        }
    }

    pub fn set_clock_rate(&mut self, clock_rate: u32) {
        self.clock_rate = clock_rate;
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn rtp_timestamp(&self, timestamp_us: i64) -> u32 {
        rtp_time_from_us(timestamp_us, self.clock_rate)
    }

    /// Serializes one packet. The sequence number advances before it is written.
    pub fn packet(&mut self, kind: MediaKind, timestamp: u32, marker: bool, parts: &[&[u8]]) -> RtpFrame {
        self.seq = self.seq.wrapping_add(1);
        let payload_len: usize = parts.iter().map(|p| p.len()).sum();
        let mut buf = BytesMut::with_capacity(RTP_HEADER_LENGTH + payload_len);
        buf.put_u8(0x80);
        buf.put_u8(if marker { self.payload_type | 0x80 } else { self.payload_type & 0x7F });
        buf.put_u16(self.seq);
        buf.put_u32(timestamp);
        buf.put_u32(self.ssrc);
        for part in parts {
            buf.put_slice(part);
        }
        RtpFrame {
            kind,
            data: buf.freeze(),
            timestamp,
        }
    }

    pub fn reset(&mut self) {
        self.seq = rand::random();
        self.ssrc = 0;
    }
}

/// Common surface of every packetizer.
pub trait RtpPacketizer: Send {
    fn base(&self) -> &PacketBase;
    fn base_mut(&mut self) -> &mut PacketBase;

    /// Turns one frame into zero or more RTP packets. The frame is not released.
    fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame>;

    /// Picks a new random sequence start and clears the SSRC.
    fn reset(&mut self) {
        self.base_mut().reset();
    }

    fn set_ssrc(&mut self, ssrc: u32) {
        self.base_mut().ssrc = ssrc;
    }

    fn ssrc(&self) -> u32 {
        self.base().ssrc
    }

    fn set_initial_seq(&mut self, seq: u16) {
        self.base_mut().seq = seq;
    }

    /// Last sequence number written (the next packet uses this plus one).
    fn sequence_number(&self) -> u16 {
        self.base().seq
    }

    fn clock_rate(&self) -> u32 {
        self.base().clock_rate
    }
}

/// Video packetizer selected by codec.
#[derive(Debug)]
pub enum VideoPacketizer {
    H264(H264Packetizer),
    H265(H265Packetizer),
    Av1(Av1Packetizer),
}

impl VideoPacketizer {
    pub fn new(params: &VideoParams) -> Self {
        let mut packetizer = match params.codec {
            VideoCodec::H264 => VideoPacketizer::H264(H264Packetizer::new()),
            VideoCodec::H265 => VideoPacketizer::H265(H265Packetizer::new()),
            VideoCodec::Av1 => VideoPacketizer::Av1(Av1Packetizer::new()),
        };
        packetizer.set_video_params(params);
        packetizer
    }

    pub fn codec(&self) -> VideoCodec {
        match self {
            VideoPacketizer::H264(_) => VideoCodec::H264,
            VideoPacketizer::H265(_) => VideoCodec::H265,
            VideoPacketizer::Av1(_) => VideoCodec::Av1,
        }
    }

    /// Installs new parameter sets; H.264/H.265 wait for the next key frame again.
    pub fn set_video_params(&mut self, params: &VideoParams) {
        match self {
            VideoPacketizer::H264(p) => {
                if let Some(pps) = &params.pps {
                    p.set_params(params.sps.clone(), pps.clone());
                }
            }
            VideoPacketizer::H265(p) => {
                p.set_params(Some(params.sps.clone()), params.pps.clone(), params.vps.clone())
            }
            VideoPacketizer::Av1(_) => {}
        }
    }

    /// Sends the parameter sets ahead of the next frame even if it is not a key frame.
    pub fn force_params_once(&mut self) {
        match self {
            VideoPacketizer::H264(p) => p.force_params_once(),
            VideoPacketizer::H265(p) => p.force_params_once(),
            VideoPacketizer::Av1(_) => {}
        }
    }
}

impl RtpPacketizer for VideoPacketizer {
    fn base(&self) -> &PacketBase {
        match self {
            VideoPacketizer::H264(p) => p.base(),
            VideoPacketizer::H265(p) => p.base(),
            VideoPacketizer::Av1(p) => p.base(),
        }
    }

    fn base_mut(&mut self) -> &mut PacketBase {
        match self {
            VideoPacketizer::H264(p) => p.base_mut(),
            VideoPacketizer::H265(p) => p.base_mut(),
            VideoPacketizer::Av1(p) => p.base_mut(),
        }
    }

    fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        match self {
            VideoPacketizer::H264(p) => p.create_packets(frame),
            VideoPacketizer::H265(p) => p.create_packets(frame),
            VideoPacketizer::Av1(p) => p.create_packets(frame),
        }
    }

    fn reset(&mut self) {
        match self {
            VideoPacketizer::H264(p) => p.reset(),
            VideoPacketizer::H265(p) => p.reset(),
            VideoPacketizer::Av1(p) => p.reset(),
        }
    }
}

/// Audio packetizer selected by codec.
#[derive(Debug)]
pub enum AudioPacketizer {
    Aac(AacPacketizer),
    G711(G711Packetizer),
    Opus(OpusPacketizer),
}

impl AudioPacketizer {
    pub fn new(params: &AudioParams) -> Self {
        match params.codec {
            AudioCodec::Aac => AudioPacketizer::Aac(AacPacketizer::new(params.sample_rate)),
            AudioCodec::G711 => AudioPacketizer::G711(G711Packetizer::new(params.sample_rate)),
            AudioCodec::Opus => AudioPacketizer::Opus(OpusPacketizer::new(params.sample_rate)),
        }
    }
}

impl RtpPacketizer for AudioPacketizer {
    fn base(&self) -> &PacketBase {
        match self {
            AudioPacketizer::Aac(p) => p.base(),
            AudioPacketizer::G711(p) => p.base(),
            AudioPacketizer::Opus(p) => p.base(),
        }
    }

    fn base_mut(&mut self) -> &mut PacketBase {
        match self {
            AudioPacketizer::Aac(p) => p.base_mut(),
            AudioPacketizer::G711(p) => p.base_mut(),
            AudioPacketizer::Opus(p) => p.base_mut(),
        }
    }

    fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        match self {
            AudioPacketizer::Aac(p) => p.create_packets(frame),
            AudioPacketizer::G711(p) => p.create_packets(frame),
            AudioPacketizer::Opus(p) => p.create_packets(frame),
        }
    }

    fn reset(&mut self) {
        match self {
            AudioPacketizer::Aac(p) => p.reset(),
            AudioPacketizer::G711(p) => p.reset(),
            AudioPacketizer::Opus(p) => p.reset(),
        }
    }
}

/// Builds the 4-byte TCP interleaved frame header `$ channel len_hi len_lo`.
///
/// Returns `None` when the packet does not fit the 16-bit length field.
pub fn interleaved_header(channel: u8, len: usize) -> Option<[u8; 4]> {
    let len = u16::try_from(len).ok()?;
    let [hi, lo] = len.to_be_bytes();
    Some([b'$', channel, hi, lo])
}
