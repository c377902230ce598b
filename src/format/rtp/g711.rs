use super::{PacketBase, RtpFrame, RtpPacketizer, MAX_PACKET_SIZE, RTP_HEADER_LENGTH};
use crate::av::{AudioCodec, MediaFrame, MediaKind};

/// G.711 A-law packetizer (static payload type 8).
#[derive(Debug)]
pub struct G711Packetizer {
    base: PacketBase,
}

impl G711Packetizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            base: PacketBase::new(AudioCodec::G711.payload_type(), sample_rate),
        }
    }
}

impl RtpPacketizer for G711Packetizer {
    fn base(&self) -> &PacketBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PacketBase {
        &mut self.base
    }

    fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let ts = self.base.rtp_timestamp(frame.timestamp_us());
        let mut frames = Vec::new();
        let mut chunks = frame.payload().chunks(MAX_PACKET_SIZE - RTP_HEADER_LENGTH).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            frames.push(self.base.packet(MediaKind::Audio, ts, last, &[chunk]));
        }
        frames
    }
}
