use super::{PacketBase, RtpFrame, RtpPacketizer};
use crate::av::{AudioCodec, MediaFrame, MediaKind};

const OPUS_CLOCK_RATE: u32 = 48_000;
/// 20 ms at 48 kHz
const DEFAULT_SAMPLES_PER_PACKET: u32 = 960;

/// OPUS packetizer (RFC 7587): one packet per frame, no fragmentation.
///
/// The first timestamp comes from the frame clock; after that the RTP
/// timestamp advances by a fixed number of samples per packet.
#[derive(Debug)]
pub struct OpusPacketizer {
    base: PacketBase,
    rtp_timestamp: u32,
    initialized: bool,
    samples_per_packet: u32,
}

impl OpusPacketizer {
    pub fn new(sample_rate: u32) -> Self {
        let samples_per_packet = match sample_rate / 50 {
            0 => DEFAULT_SAMPLES_PER_PACKET,
            n => n,
        };
        Self {
            base: PacketBase::new(AudioCodec::Opus.payload_type(), OPUS_CLOCK_RATE),
            rtp_timestamp: 0,
            initialized: false,
            samples_per_packet,
        }
    }
}

impl RtpPacketizer for OpusPacketizer {
    fn base(&self) -> &PacketBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PacketBase {
        &mut self.base
    }

    fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        if self.initialized {
            self.rtp_timestamp = self.rtp_timestamp.wrapping_add(self.samples_per_packet);
        } else {
            self.rtp_timestamp = self.base.rtp_timestamp(frame.timestamp_us());
            self.initialized = true;
        }
        vec![self.base.packet(MediaKind::Audio, self.rtp_timestamp, false, &[frame.payload()])]
    }

    fn reset(&mut self) {
        self.base.reset();
        self.initialized = false;
        self.rtp_timestamp = 0;
    }
}
