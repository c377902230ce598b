//! # H.265/HEVC helpers
//!
//! Encoders may emit either Annex-B streams or length-prefixed (HVCC)
//! access units. The packetizer works on Annex-B, so [`to_annexb_units`]
//! normalizes both forms into a list of NAL units.

mod types;


pub use types::NALUnitType;

use super::{split_annexb, start_code_len};

/// Parameter sets found in codec-config data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets<'a> {
    pub vps: &'a [u8],
    pub sps: &'a [u8],
    pub pps: &'a [u8],
}

/// Pulls the first VPS, SPS and PPS out of Annex-B codec-config data.
///
/// Returns `None` unless all three are present.
pub fn extract_vps_sps_pps(data: &[u8]) -> Option<ParameterSets<'_>> {
    let mut vps = None;
    let mut sps = None;
    let mut pps = None;
    for unit in split_annexb(data) {
        match NALUnitType::from_header(unit[0]) {
            NALUnitType::Vps if vps.is_none() => vps = Some(unit),
            NALUnitType::Sps if sps.is_none() => sps = Some(unit),
            NALUnitType::Pps if pps.is_none() => pps = Some(unit),
            _ => {}
        }
        if vps.is_some() && sps.is_some() && pps.is_some() {
            break;
        }
    }
    Some(ParameterSets {
        vps: vps?,
        sps: sps?,
        pps: pps?,
    })
}

/// Splits a length-prefixed access unit with `length_size`-byte big-endian lengths.
///
/// Returns `None` when the lengths do not tile the buffer exactly.
pub fn split_length_prefixed(data: &[u8], length_size: usize) -> Option<Vec<&[u8]>> {
    let mut units = Vec::new();
    let mut pos = 0;
    while data.len() - pos >= length_size {
        let len = data[pos..pos + length_size]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        pos += length_size;
        if len == 0 || len > data.len() - pos {
            return None;
        }
        units.push(&data[pos..pos + len]);
        pos += len;
    }
    if pos != data.len() || units.is_empty() {
        return None;
    }
    Some(units)
}

/// Normalizes an access unit into NAL units without start codes.
///
/// Annex-B input is split on start codes. Otherwise 4-byte and then 2-byte
/// HVCC lengths are tried; if neither tiles the buffer the whole payload is
/// one NAL unit. Units shorter than the 2-byte header are dropped.
pub fn to_annexb_units(data: &[u8]) -> Vec<&[u8]> {
    let units = if start_code_len(data) > 0 {
        split_annexb(data)
    } else if data.len() >= 4 {
        split_length_prefixed(data, 4)
            .or_else(|| split_length_prefixed(data, 2))
            .unwrap_or_else(|| vec![data])
    } else {
        vec![data]
    };
    units.into_iter().filter(|u| u.len() >= 2).collect()
}
