// NAL unit types that matter for packetization; everything else maps to Other.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NALUnitType {
    TrailN,
    TrailR,
    IdrWRadl,
    IdrNLp,
    Cra,
    Vps,
    Sps,
    Pps,
    Aud,
    PrefixSei,
    SuffixSei,
    /// RTP fragmentation unit (RFC 7798)
    Fu,
    Other(u8),
}

impl NALUnitType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => NALUnitType::TrailN,
            1 => NALUnitType::TrailR,
            19 => NALUnitType::IdrWRadl,
            20 => NALUnitType::IdrNLp,
            21 => NALUnitType::Cra,
            32 => NALUnitType::Vps,
            33 => NALUnitType::Sps,
            34 => NALUnitType::Pps,
            35 => NALUnitType::Aud,
            39 => NALUnitType::PrefixSei,
            40 => NALUnitType::SuffixSei,
            49 => NALUnitType::Fu,
            other => NALUnitType::Other(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            NALUnitType::TrailN => 0,
            NALUnitType::TrailR => 1,
            NALUnitType::IdrWRadl => 19,
            NALUnitType::IdrNLp => 20,
            NALUnitType::Cra => 21,
            NALUnitType::Vps => 32,
            NALUnitType::Sps => 33,
            NALUnitType::Pps => 34,
            NALUnitType::Aud => 35,
            NALUnitType::PrefixSei => 39,
            NALUnitType::SuffixSei => 40,
            NALUnitType::Fu => 49,
            NALUnitType::Other(v) => v,
        }
    }

    /// Type carried in the first byte of a two-byte NAL header.
    pub fn from_header(first: u8) -> Self {
        Self::from_u8((first >> 1) & 0x3F)
    }

    pub fn is_idr(self) -> bool {
        matches!(self, NALUnitType::IdrWRadl | NALUnitType::IdrNLp)
    }

    pub fn is_parameter_set(self) -> bool {
        matches!(self, NALUnitType::Vps | NALUnitType::Sps | NALUnitType::Pps)
    }
}
