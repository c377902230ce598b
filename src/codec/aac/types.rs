/// AAC object type, as carried in ADTS (`profile + 1`) and AudioSpecificConfig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileType {
    Main = 1,
    LC = 2,
    SSR = 3,
    LTP = 4,
}

impl From<u8> for ProfileType {
    /// From the 2-bit ADTS profile field.
    fn from(value: u8) -> Self {
        match value {
            0 => ProfileType::Main,
            1 => ProfileType::LC,
            2 => ProfileType::SSR,
            3 => ProfileType::LTP,
            _ => ProfileType::LC,
        }
    }
}

/// The fixed part of an ADTS header that the packetizer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ADTSHeader {
    pub protection_absent: bool,      // 1 bit
    pub profile: ProfileType,         // 2 bits
    pub sample_rate_index: u8,        // 4 bits
    pub channel_configuration: u8,    // 3 bits
    pub frame_length: u16,            // 13 bits, header included
}

impl ADTSHeader {
    /// 7 bytes, or 9 when a CRC follows.
    pub fn header_len(&self) -> usize {
        if self.protection_absent {
            7
        } else {
            9
        }
    }
}
