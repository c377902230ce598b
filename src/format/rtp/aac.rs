use super::{PacketBase, RtpFrame, RtpPacketizer, MAX_PACKET_SIZE, RTP_HEADER_LENGTH};
use crate::av::{AudioCodec, MediaFrame, MediaKind};
use crate::codec::aac::adts_header_len;

/// AAC packetizer (RFC 3640, AAC-hbr with one 16-bit AU header).
#[derive(Debug)]
pub struct AacPacketizer {
    base: PacketBase,
}

impl AacPacketizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            base: PacketBase::new(AudioCodec::Aac.payload_type(), sample_rate),
        }
    }
}

impl RtpPacketizer for AacPacketizer {
    fn base(&self) -> &PacketBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PacketBase {
        &mut self.base
    }

    fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let mut data = frame.payload();
        if let Some(header_len) = adts_header_len(data) {
            if data.len() > header_len {
                data = &data[header_len..];
            }
        }

        let ts = self.base.rtp_timestamp(frame.timestamp_us());
        let max_payload = MAX_PACKET_SIZE - (RTP_HEADER_LENGTH + 4);
        let mut frames = Vec::new();
        let mut chunks = data.chunks(max_payload).peekable();
        while let Some(chunk) = chunks.next() {
            let size = chunk.len();
            // AU-headers-length = 16 bits, then 13-bit AU-size and 3-bit AU-Index
            let au_header = [0x00, 0x10, (size >> 5) as u8, ((size << 3) as u8) & 0xF8];
            let last = chunks.peek().is_none();
            frames.push(self.base.packet(MediaKind::Audio, ts, last, &[&au_header, chunk]));
        }
        frames
    }
}
