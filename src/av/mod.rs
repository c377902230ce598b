use bytes::Bytes;
use std::fmt;

use crate::codec;

mod clock;
mod frame;

pub use clock::{rtp_time_from_us, MediaClock};
pub use frame::MediaFrame;

/// RTP clock rate used for every video codec.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Which track a frame or RTP packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Track id used in `trackID=N` control URLs and interleaved channel defaults.
    pub fn track_id(self) -> u8 {
        match self {
            MediaKind::Video => 0,
            MediaKind::Audio => 1,
        }
    }

    pub fn from_track_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(MediaKind::Video),
            1 => Some(MediaKind::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
}

impl VideoCodec {
    /// Encoding name used in `a=rtpmap`.
    pub fn encoding_name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::H265 => "H265",
            VideoCodec::Av1 => "AV1",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    /// G.711 A-law (PCMA)
    G711,
    Aac,
    Opus,
}

impl AudioCodec {
    pub fn payload_type(self) -> u8 {
        match self {
            AudioCodec::G711 => 8,
            AudioCodec::Aac | AudioCodec::Opus => 97,
        }
    }

    /// RTP clock rate for a stream sampled at `sample_rate`.
    pub fn clock_rate(self, sample_rate: u32) -> u32 {
        match self {
            AudioCodec::Opus => 48_000,
            AudioCodec::G711 | AudioCodec::Aac => sample_rate,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioCodec::G711 => f.write_str("G711"),
            AudioCodec::Aac => f.write_str("AAC"),
            AudioCodec::Opus => f.write_str("OPUS"),
        }
    }
}

/// Codec parameter sets, stored without Annex-B start codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParams {
    pub codec: VideoCodec,
    pub sps: Bytes,
    pub pps: Option<Bytes>,
    pub vps: Option<Bytes>,
}

impl VideoParams {
    /// Builds params from encoder output; start codes are stripped if present.
    pub fn new(codec: VideoCodec, sps: &[u8], pps: Option<&[u8]>, vps: Option<&[u8]>) -> Self {
        let strip = |b: &[u8]| Bytes::copy_from_slice(codec::strip_start_code(b));
        let (pps, vps) = match codec {
            VideoCodec::H264 => (pps.map(strip), None),
            VideoCodec::H265 | VideoCodec::Av1 => (pps.map(strip), vps.map(strip)),
        };
        Self {
            codec,
            sps: strip(sps),
            pps,
            vps,
        }
    }

    /// True once every parameter set the codec needs is present.
    pub fn is_ok(&self) -> bool {
        match self.codec {
            VideoCodec::H264 => self.pps.is_some(),
            VideoCodec::H265 => self.pps.is_some() && self.vps.is_some(),
            VideoCodec::Av1 => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub is_stereo: bool,
}

impl AudioParams {
    pub fn channels(&self) -> u8 {
        if self.is_stereo {
            2
        } else {
            1
        }
    }
}

/// One UDP channel: RTP port and its RTCP companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub rtp: u16,
    pub rtcp: u16,
}

impl Ports {
    pub fn new(rtp: u16, rtcp: u16) -> Self {
        Self { rtp, rtcp }
    }
}

impl fmt::Display for Ports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.rtp, self.rtcp)
    }
}
