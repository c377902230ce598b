use bytes::Bytes;

use super::{PacketBase, RtpFrame, RtpPacketizer, MAX_PACKET_SIZE, RTP_HEADER_LENGTH, VIDEO_PAYLOAD_TYPE};
use crate::av::{MediaFrame, MediaKind, VIDEO_CLOCK_RATE};
use crate::codec::h265::{to_annexb_units, NALUnitType};
use crate::codec::start_code_len;

/// Access unit delimiter sent ahead of every access unit.
const AUD: [u8; 3] = [NALUnitType::Aud.as_u8() << 1, 0x01, 0x80];

/// H.265 packetizer (RFC 7798).
///
/// Accepts Annex-B or length-prefixed access units. VPS/SPS/PPS are sent
/// once per access unit before the first non-parameter NAL of an IDR or
/// key frame, or when forced.
#[derive(Debug)]
pub struct H265Packetizer {
    base: PacketBase,
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    send_key_frame: bool,
    force_params: bool,
}

impl H265Packetizer {
    pub fn new() -> Self {
        Self {
            base: PacketBase::new(VIDEO_PAYLOAD_TYPE, VIDEO_CLOCK_RATE),
            vps: None,
            sps: None,
            pps: None,
            send_key_frame: false,
            force_params: false,
        }
    }

    pub fn set_params(&mut self, sps: Option<Bytes>, pps: Option<Bytes>, vps: Option<Bytes>) {
        self.sps = sps;
        self.pps = pps;
        self.vps = vps;
        self.send_key_frame = false;
    }

    pub fn force_params_once(&mut self) {
        self.force_params = true;
    }

    /// True once parameter sets have gone out ahead of a key frame.
    pub fn key_frame_sent(&self) -> bool {
        self.send_key_frame
    }

    fn packetize_nal(&mut self, nal: &[u8], ts: u32, mark_last: bool, out: &mut Vec<RtpFrame>) {
        if nal.len() <= MAX_PACKET_SIZE - RTP_HEADER_LENGTH {
            out.push(self.base.packet(MediaKind::Video, ts, mark_last, &[nal]));
            return;
        }

        // keep F and the low layer-id bit, replace the type with 49
        let indicator0 = (NALUnitType::Fu.as_u8() << 1) | (nal[0] & 0x81);
        let indicator1 = nal[1];
        let nal_type = NALUnitType::from_header(nal[0]).as_u8() & 0x3F;

        let max_frag = MAX_PACKET_SIZE - RTP_HEADER_LENGTH - 3;
        let mut chunks = nal[2..].chunks(max_frag).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let mut fu_header = nal_type;
            if first {
                fu_header |= 0x80;
            }
            if last {
                fu_header |= 0x40;
            }
            out.push(self.base.packet(
                MediaKind::Video,
                ts,
                last && mark_last,
                &[&[indicator0, indicator1, fu_header], chunk],
            ));
            first = false;
        }
    }
}

impl Default for H265Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RtpPacketizer for H265Packetizer {
    fn base(&self) -> &PacketBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PacketBase {
        &mut self.base
    }

    fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let data = frame.payload();
        if data.len() < 4 && start_code_len(data) == 0 {
            return Vec::new();
        }
        let units = to_annexb_units(data);
        if units.is_empty() {
            return Vec::new();
        }

        let ts = self.base.rtp_timestamp(frame.timestamp_us());
        let mut frames = Vec::new();
        frames.push(self.base.packet(MediaKind::Video, ts, false, &[&AUD]));

        let mut params_injected = false;
        let count = units.len();
        for (i, nal) in units.into_iter().enumerate() {
            let nal_type = NALUnitType::from_header(nal[0]);
            let wants_params = nal_type.is_idr() || frame.is_key_frame() || self.force_params;
            if wants_params && !nal_type.is_parameter_set() && !params_injected {
                for set in [self.vps.clone(), self.sps.clone(), self.pps.clone()].into_iter().flatten() {
                    frames.push(self.base.packet(MediaKind::Video, ts, false, &[&set[..]]));
                }
                self.send_key_frame = true;
                self.force_params = false;
                params_injected = true;
            }
            self.packetize_nal(nal, ts, i + 1 == count, &mut frames);
        }
        frames
    }

    fn reset(&mut self) {
        self.base.reset();
        self.send_key_frame = false;
    }
}
