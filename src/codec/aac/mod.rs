//! AAC helpers: ADTS header detection and the RFC 3640 `config` value.

mod types;

pub use types::{ADTSHeader, ProfileType};

/// Sampling frequencies indexed by `sampling_frequency_index`.
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Index used when a rate is not in [`SAMPLE_RATES`] (48 kHz).
const DEFAULT_SAMPLE_RATE_INDEX: u8 = 3;

pub fn sample_rate_index(sample_rate: u32) -> u8 {
    SAMPLE_RATES
        .iter()
        .position(|r| *r == sample_rate)
        .map(|i| i as u8)
        .unwrap_or(DEFAULT_SAMPLE_RATE_INDEX)
}

/// Parses an ADTS header at the start of `data`.
///
/// Returns `None` unless the sync word and layer are valid and, when the
/// buffer is long enough to tell, the frame length fits inside it.
pub fn parse_adts_header(data: &[u8]) -> Option<ADTSHeader> {
    if data.len() < 7 {
        return None;
    }
    if data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
        return None;
    }
    let layer = (data[1] >> 1) & 0x03;
    if layer != 0 {
        return None;
    }

    let header = ADTSHeader {
        protection_absent: data[1] & 0x01 == 1,
        profile: ProfileType::from((data[2] >> 6) & 0x03),
        sample_rate_index: (data[2] >> 2) & 0x0F,
        channel_configuration: ((data[2] & 0x01) << 2) | ((data[3] >> 6) & 0x03),
        frame_length: (u16::from(data[3] & 0x03) << 11)
            | (u16::from(data[4]) << 3)
            | u16::from(data[5] >> 5),
    };

    let header_len = header.header_len();
    if data.len() < header_len {
        return None;
    }
    if data.len() >= header_len + 2 {
        let frame_len = header.frame_length as usize;
        if frame_len < header_len || frame_len > data.len() {
            return None;
        }
    }
    Some(header)
}

/// Length of the ADTS header to strip from `data`, if one is present.
pub fn adts_header_len(data: &[u8]) -> Option<usize> {
    parse_adts_header(data).map(|h| h.header_len())
}

/// Two-byte AudioSpecificConfig for AAC-LC, as used in the SDP `config=` parameter.
pub fn audio_specific_config(sample_rate: u32, channels: u8) -> u16 {
    let object_type = ProfileType::LC as u16;
    ((object_type & 0x1F) << 11)
        | ((u16::from(sample_rate_index(sample_rate)) & 0x0F) << 7)
        | ((u16::from(channels) & 0x0F) << 3)
}
