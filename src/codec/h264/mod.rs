//! # H.264/AVC helpers
//!
//! NAL unit classification and parameter-set extraction for the RTP
//! packetizer and the SDP `fmtp` line.
//!
//! ```rust
//! use rtspcast::codec::h264::{extract_sps_pps, NALUnitType};
//!
//! let access_unit = [0, 0, 0, 1, 0x67, 0x42, 0xe0, 0x1f, 0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80];
//! let (sps, pps) = extract_sps_pps(&access_unit);
//! assert_eq!(sps.unwrap()[0] & 0x1f, NALUnitType::SPS as u8);
//! assert!(pps.is_some());
//! ```

mod types;

pub use types::NALUnitType;

use super::split_annexb;

/// `profile-level-id` used when the SPS is too short to carry one.
pub const DEFAULT_PROFILE_LEVEL_ID: &str = "42e01f";

/// Pulls the first SPS and PPS out of an Annex-B access unit.
pub fn extract_sps_pps(data: &[u8]) -> (Option<&[u8]>, Option<&[u8]>) {
    let mut sps = None;
    let mut pps = None;
    for unit in split_annexb(data) {
        match NALUnitType::from(unit[0] & 0x1F) {
            NALUnitType::SPS if sps.is_none() => sps = Some(unit),
            NALUnitType::PPS if pps.is_none() => pps = Some(unit),
            _ => {}
        }
    }
    (sps, pps)
}

/// Hex `profile-level-id` from SPS bytes 1..4 (profile, constraints, level).
pub fn profile_level_id(sps: &[u8]) -> String {
    if sps.len() < 4 {
        return DEFAULT_PROFILE_LEVEL_ID.to_string();
    }
    format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3])
}
