//! AV1 OBU framing (low-overhead bitstream format) and LEB128 sizes.

use log::warn;

/// OBU types that appear in encoder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObuType {
    Reserved,
    SequenceHeader,
    TemporalDelimiter,
    FrameHeader,
    TileGroup,
    Metadata,
    Frame,
    RedundantFrameHeader,
    TileList,
    Padding,
}

impl ObuType {
    /// Type from the first OBU header byte.
    pub fn from_header(header: u8) -> Self {
        match (header & 0x78) >> 3 {
            1 => ObuType::SequenceHeader,
            2 => ObuType::TemporalDelimiter,
            3 => ObuType::FrameHeader,
            4 => ObuType::TileGroup,
            5 => ObuType::Metadata,
            6 => ObuType::Frame,
            7 => ObuType::RedundantFrameHeader,
            8 => ObuType::TileList,
            15 => ObuType::Padding,
            _ => ObuType::Reserved,
        }
    }
}

/// One OBU as found in the stream: header (with optional extension byte),
/// the encoded size field and the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obu<'a> {
    pub header: &'a [u8],
    pub size_field: &'a [u8],
    pub data: &'a [u8],
}

impl Obu<'_> {
    pub fn obu_type(&self) -> ObuType {
        ObuType::from_header(self.header[0])
    }

    /// Header, size field and payload concatenated.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.len() + self.size_field.len() + self.data.len());
        out.extend_from_slice(self.header);
        out.extend_from_slice(self.size_field);
        out.extend_from_slice(self.data);
        out
    }
}

/// Reads a LEB128 value of at most 8 bytes. Returns `(value, bytes_used)`.
pub fn read_leb128(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, b) in data.iter().take(8).enumerate() {
        value |= u64::from(b & 0x7F) << (7 * i);
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

pub fn write_leb128(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
    out
}

/// Parses size-delimited OBUs. Parsing stops at the first malformed OBU.
pub fn parse_obus(data: &[u8]) -> Vec<Obu<'_>> {
    let mut obus = Vec::new();
    let mut index = 0;

    while index < data.len() {
        let has_extension = (data[index] >> 2) & 0x01 == 1;
        let header_len = if has_extension && index + 1 < data.len() { 2 } else { 1 };
        let header = &data[index..index + header_len];
        index += header_len;
        if index >= data.len() {
            break;
        }

        let Some((size, used)) = read_leb128(&data[index..]) else {
            warn!("Malformed LEB128 size, stopping OBU parsing");
            break;
        };
        let size_field = &data[index..index + used];
        index += used;
        if index >= data.len() {
            break;
        }

        let size = size as usize;
        if size > data.len() - index {
            warn!("OBU size {} exceeds remaining {} bytes", size, data.len() - index);
            break;
        }
        obus.push(Obu {
            header,
            size_field,
            data: &data[index..index + size],
        });
        index += size;
    }
    obus
}

/// Finds the sequence header OBU in a key frame, size field included.
pub fn extract_sequence_header(data: &[u8]) -> Option<Vec<u8>> {
    parse_obus(data)
        .into_iter()
        .find(|obu| obu.obu_type() == ObuType::SequenceHeader)
        .map(|obu| obu.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_leb128_known_values() {
        assert_eq!(write_leb128(0), vec![0x00]);
        assert_eq!(write_leb128(127), vec![0x7F]);
        assert_eq!(write_leb128(128), vec![0x80, 0x01]);
        assert_eq!(read_leb128(&[0xE5, 0x8E, 0x26]), Some((624_485, 3)));
        // nine continuation bytes never terminate
        assert_eq!(read_leb128(&[0x80; 9]), None);
    }

    #[quickcheck]
    fn prop_leb128_roundtrip(value: u32) -> bool {
        let encoded = write_leb128(u64::from(value));
        read_leb128(&encoded) == Some((u64::from(value), encoded.len()))
    }

    #[test]
    fn test_parse_obus() {
        let data = [
            0x0A, 0x02, 0xAA, 0xBB, // sequence header, 2 bytes
            0x32, 0x01, 0xCC, // frame, 1 byte
        ];
        let obus = parse_obus(&data);
        assert_eq!(obus.len(), 2);
        assert_eq!(obus[0].obu_type(), ObuType::SequenceHeader);
        assert_eq!(obus[0].data, &[0xAA, 0xBB]);
        assert_eq!(obus[1].obu_type(), ObuType::Frame);
        assert_eq!(obus[1].to_vec(), vec![0x32, 0x01, 0xCC]);
    }

    #[test]
    fn test_parse_obus_with_extension() {
        let data = [0x34, 0x10, 0x01, 0xEE];
        let obus = parse_obus(&data);
        assert_eq!(obus.len(), 1);
        assert_eq!(obus[0].header, &[0x34, 0x10]);
        assert_eq!(obus[0].data, &[0xEE]);
    }

    #[test]
    fn test_truncated_obu_stops() {
        let data = [0x32, 0x05, 0x01];
        assert!(parse_obus(&data).is_empty());
    }

    #[test]
    fn test_extract_sequence_header() {
        // temporal delimiter, sequence header, frame
        let data = [0x12, 0x00, 0x0A, 0x01, 0x99, 0x32, 0x01, 0x00];
        assert_eq!(extract_sequence_header(&data), Some(vec![0x0A, 0x01, 0x99]));

        let data = [0x32, 0x01, 0x00];
        assert_eq!(extract_sequence_header(&data), None);
    }
}
