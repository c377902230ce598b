use super::{PacketBase, RtpFrame, RtpPacketizer, MAX_PACKET_SIZE, RTP_HEADER_LENGTH, VIDEO_PAYLOAD_TYPE};
use crate::av::{MediaFrame, MediaKind, VIDEO_CLOCK_RATE};
use crate::codec::av1::{parse_obus, write_leb128, ObuType};

/// AV1 packetizer (AV1 RTP payload format, aggregation header per packet).
#[derive(Debug)]
pub struct Av1Packetizer {
    base: PacketBase,
}

/// One-byte aggregation header: Z, Y, W (OBU count, max 3) and N.
pub fn aggregation_header(is_key_frame: bool, first: bool, last: bool, obu_count: usize) -> u8 {
    let z = u8::from(!first);
    let y = u8::from(!last);
    let w = obu_count.min(3) as u8;
    let n = u8::from(is_key_frame && first);
    (z << 7) | (y << 6) | (w << 4) | (n << 3)
}

impl Av1Packetizer {
    pub fn new() -> Self {
        Self {
            base: PacketBase::new(VIDEO_PAYLOAD_TYPE, VIDEO_CLOCK_RATE),
        }
    }
}

impl Default for Av1Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RtpPacketizer for Av1Packetizer {
    fn base(&self) -> &PacketBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PacketBase {
        &mut self.base
    }

    fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let mut data = frame.payload();
        if data.is_empty() {
            return Vec::new();
        }
        if ObuType::from_header(data[0]) == ObuType::TemporalDelimiter && data.len() >= 2 {
            data = &data[2..];
        }

        let obus = parse_obus(data);
        if obus.is_empty() {
            return Vec::new();
        }

        // every OBU but the last carries its length
        let mut payload = Vec::with_capacity(data.len() + obus.len() * 2);
        let last_index = obus.len() - 1;
        for (i, obu) in obus.iter().enumerate() {
            let full = obu.to_vec();
            if i != last_index {
                payload.extend_from_slice(&write_leb128(full.len() as u64));
            }
            payload.extend_from_slice(&full);
        }

        let ts = self.base.rtp_timestamp(frame.timestamp_us());
        let max_payload = MAX_PACKET_SIZE - RTP_HEADER_LENGTH - 1;
        let mut frames = Vec::new();
        let mut chunks = payload.chunks(max_payload).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let obu_count = if first { obus.len() } else { 1 };
            let header = aggregation_header(frame.is_key_frame(), first, last, obu_count);
            frames.push(self.base.packet(MediaKind::Video, ts, last, &[&[header], chunk]));
            first = false;
        }
        frames
    }
}
