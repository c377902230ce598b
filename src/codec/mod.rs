//! Bitstream helpers used by the RTP packetizers and the SDP builder.
//!
//! Nothing here decodes media. The helpers only find unit boundaries
//! (Annex-B NAL units, AV1 OBUs, ADTS headers) and pull out the
//! parameter sets a receiver needs.

pub mod aac;
pub mod av1;
pub mod h264;
pub mod h265;

/// Length of the Annex-B start code at the head of `data` (0, 3 or 4).
pub fn start_code_len(data: &[u8]) -> usize {
    if data.len() >= 4 && data[..4] == [0, 0, 0, 1] {
        4
    } else if data.len() >= 3 && data[..3] == [0, 0, 1] {
        3
    } else {
        0
    }
}

/// Drops a leading Annex-B start code, if any.
pub fn strip_start_code(data: &[u8]) -> &[u8] {
    &data[start_code_len(data)..]
}

/// Splits an Annex-B byte stream into NAL units without their start codes.
///
/// Bytes before the first start code are treated as one unit, so a buffer
/// holding a single bare NAL unit comes back unchanged. Empty units are skipped.
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            // a 4-byte code leaves one zero behind the previous unit
            let end = if i > start && data[i - 1] == 0 { i - 1 } else { i };
            if end > start {
                units.push(&data[start..end]);
            }
            i += 3;
            start = i;
        } else {
            i += 1;
        }
    }
    if start < data.len() {
        units.push(&data[start..]);
    }
    units
}

/// Offset of the next start code at or after `from`, if any.
pub fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some(if i > from && data[i - 1] == 0 { i - 1 } else { i });
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_code_len() {
        assert_eq!(start_code_len(&[0, 0, 0, 1, 0x65]), 4);
        assert_eq!(start_code_len(&[0, 0, 1, 0x65]), 3);
        assert_eq!(start_code_len(&[0x65, 0, 0, 1]), 0);
        assert_eq!(start_code_len(&[0, 0]), 0);
    }

    #[test]
    fn test_split_annexb() {
        let stream = [
            0, 0, 0, 1, 0x67, 0x42, // SPS
            0, 0, 1, 0x68, 0xce, // PPS
            0, 0, 0, 1, 0x65, 0x88, 0x84, // IDR
        ];
        let units = split_annexb(&stream);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], &[0x67, 0x42]);
        assert_eq!(units[1], &[0x68, 0xce]);
        assert_eq!(units[2], &[0x65, 0x88, 0x84]);
    }

    #[test]
    fn test_split_bare_unit() {
        let units = split_annexb(&[0x41, 0x9a, 0x00]);
        assert_eq!(units, vec![&[0x41, 0x9a, 0x00][..]]);
    }

    #[test]
    fn test_find_start_code() {
        let data = [0x67, 0x42, 0, 0, 0, 1, 0x68];
        assert_eq!(find_start_code(&data, 0), Some(2));
        assert_eq!(find_start_code(&data, 6), None);
    }
}
