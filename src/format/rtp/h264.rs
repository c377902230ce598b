use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, warn};

use super::{PacketBase, RtpFrame, RtpPacketizer, MAX_PACKET_SIZE, RTP_HEADER_LENGTH, VIDEO_PAYLOAD_TYPE};
use crate::av::{MediaFrame, MediaKind, VIDEO_CLOCK_RATE};
use crate::codec::h264::NALUnitType;
use crate::codec::start_code_len;

/// H.264 packetizer (RFC 6184, packetization-mode=1).
///
/// Frames are expected in Annex-B form. Nothing is sent until the first
/// IDR, which is preceded by a STAP-A packet carrying SPS and PPS.
#[derive(Debug)]
pub struct H264Packetizer {
    base: PacketBase,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    stap_a: Option<Bytes>,
    send_key_frame: bool,
    force_params: bool,
}

impl H264Packetizer {
    pub fn new() -> Self {
        Self {
            base: PacketBase::new(VIDEO_PAYLOAD_TYPE, VIDEO_CLOCK_RATE),
            sps: None,
            pps: None,
            stap_a: None,
            send_key_frame: false,
            force_params: false,
        }
    }

    /// Installs SPS/PPS (without start codes) and waits for the next key frame.
    pub fn set_params(&mut self, sps: Bytes, pps: Bytes) {
        let mut stap_a = BytesMut::with_capacity(sps.len() + pps.len() + 5);
        stap_a.put_u8(NALUnitType::StapA as u8);
        stap_a.put_u16(sps.len() as u16);
        stap_a.put_slice(&sps);
        stap_a.put_u16(pps.len() as u16);
        stap_a.put_slice(&pps);

        self.stap_a = Some(stap_a.freeze());
        self.sps = Some(sps);
        self.pps = Some(pps);
        self.send_key_frame = false;
    }

    pub fn force_params_once(&mut self) {
        self.force_params = true;
    }

    /// Bytes to skip before the NAL header: the start code, or the whole
    /// `SC SPS SC PPS SC` prefix some encoders put in front of key frames.
    fn header_size(&self, data: &[u8]) -> usize {
        if data.len() < 4 {
            return 0;
        }
        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return 0;
        };
        let sc = start_code_len(data);
        if sc == 0 {
            return 0;
        }
        let prefix_len = sc * 3 + sps.len() + pps.len();
        if data.len() < prefix_len {
            return sc;
        }

        let code = &data[..sc];
        let mut prefix = Vec::with_capacity(prefix_len);
        prefix.extend_from_slice(code);
        prefix.extend_from_slice(sps);
        prefix.extend_from_slice(code);
        prefix.extend_from_slice(pps);
        prefix.extend_from_slice(code);
        if data[..prefix_len] == prefix[..] {
            prefix_len
        } else {
            sc
        }
    }
}

impl Default for H264Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RtpPacketizer for H264Packetizer {
    fn base(&self) -> &PacketBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PacketBase {
        &mut self.base
    }

    fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let data = frame.payload();
        let header_size = self.header_size(data);
        if header_size == 0 || data.len() <= header_size {
            return Vec::new();
        }

        let nal_header = data[header_size];
        let nalu = &data[header_size + 1..];
        let ts = self.base.rtp_timestamp(frame.timestamp_us());
        let nal_type = NALUnitType::from(nal_header & 0x1F);
        let mut frames = Vec::new();

        if nal_type == NALUnitType::CodedSliceIDR || frame.is_key_frame() || self.force_params {
            match self.stap_a.clone() {
                Some(stap_a) => {
                    frames.push(self.base.packet(MediaKind::Video, ts, true, &[&stap_a[..]]));
                    self.send_key_frame = true;
                    self.force_params = false;
                }
                None => warn!("Can't create key frame, SPS/PPS not set"),
            }
        }

        if !self.send_key_frame {
            debug!("Waiting for key frame");
            return frames;
        }

        if nalu.len() <= MAX_PACKET_SIZE - RTP_HEADER_LENGTH - 1 {
            frames.push(self.base.packet(MediaKind::Video, ts, true, &[&[nal_header], nalu]));
            return frames;
        }

        // FU-A
        let indicator = (nal_header & 0x60) + NALUnitType::FuA as u8;
        let mut fu_header = (nal_header & 0x1F) | 0x80;
        let max_chunk = MAX_PACKET_SIZE - RTP_HEADER_LENGTH - 2;
        let mut chunks = nalu.chunks(max_chunk).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let header = if last { fu_header | 0x40 } else { fu_header };
            frames.push(self.base.packet(MediaKind::Video, ts, last, &[&[indicator, header], chunk]));
            fu_header &= 0x7F;
        }
        frames
    }

    fn reset(&mut self) {
        self.base.reset();
        self.send_key_frame = false;
    }
}
