use super::*;
use crate::av::{AudioCodec, AudioParams, MediaFrame, VideoCodec, VideoParams};

const SPS: [u8; 4] = [0x67, 0x42, 0xe0, 0x1f];
const PPS: [u8; 2] = [0x68, 0xce];

fn h264_params() -> VideoParams {
    VideoParams::new(VideoCodec::H264, &SPS, Some(&PPS), None)
}

fn annexb(nal: &[u8]) -> Vec<u8> {
    let mut data = vec![0, 0, 0, 1];
    data.extend_from_slice(nal);
    data
}

fn parse(frame: &RtpFrame) -> RTPPacket {
    RTPPacket::parse(&frame.data).unwrap()
}

#[test]
fn test_rtp_packet_parse() {
    let data = vec![
        0x80, 0xe0, 0x03, 0xe8, // V=2, P=0, X=0, CC=0, M=1, PT=96, seq=1000
        0x00, 0x01, 0x5f, 0x90, // timestamp=90000
        0x12, 0x34, 0x56, 0x78, // SSRC=0x12345678
        0x01, 0x02, 0x03, 0x04, // payload
    ];

    let packet = RTPPacket::parse(&data).unwrap();
    assert!(packet.marker);
    assert_eq!(packet.payload_type, 96);
    assert_eq!(packet.sequence_number, 1000);
    assert_eq!(packet.timestamp, 90000);
    assert_eq!(packet.ssrc, 0x12345678);
    assert_eq!(&packet.payload[..], &[1, 2, 3, 4]);
}

#[test]
fn test_rtp_packet_parse_invalid() {
    assert_eq!(RTPPacket::parse(&[0x80, 0x60]), Err(RTPError::InvalidPacket));
    // version 1
    let data = [0x40, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
    assert_eq!(RTPPacket::parse(&data), Err(RTPError::InvalidPacket));
    // CC=1 without the CSRC word
    let data = [0x81, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
    assert_eq!(RTPPacket::parse(&data), Err(RTPError::InvalidPacket));
}

#[test]
fn test_header_fields_and_sequence() {
    let mut base = PacketBase::new(96, 90_000);
    let mut packetizer = G711Packetizer::new(8000);
    packetizer.set_ssrc(0xdeadbeef);
    packetizer.set_initial_seq(0xffff);

    let frame = MediaFrame::audio(vec![1, 2, 3], 1_000_000);
    let packets = packetizer.create_packets(&frame);
    let header = parse(&packets[0]);
    assert_eq!(packets[0].data[0], 0x80);
    assert_eq!(header.payload_type, 8);
    assert_eq!(header.ssrc, 0xdeadbeef);
    // incremented before writing, wrapping at 16 bits
    assert_eq!(header.sequence_number, 0);
    assert_eq!(header.timestamp, 8000);
    assert!(header.marker);

    let frame = base.packet(MediaKind::Video, 7, false, &[&[9, 9]]);
    assert_eq!(frame.data[1], 96);
    assert_eq!(frame.len(), 14);
    assert_eq!(frame.timestamp, 7);
}

#[test]
fn test_reset_clears_ssrc() {
    let mut packetizer = H264Packetizer::new();
    packetizer.set_ssrc(42);
    packetizer.reset();
    assert_eq!(packetizer.ssrc(), 0);
}

#[test]
fn test_h264_waits_for_key_frame() {
    let mut packetizer = VideoPacketizer::new(&h264_params());
    let p_frame = MediaFrame::video(annexb(&[0x41, 0x9a, 0x01]), 0, false);
    assert!(packetizer.create_packets(&p_frame).is_empty());
}

#[test]
fn test_h264_idr_sends_stap_a_then_single_nal() {
    let mut packetizer = VideoPacketizer::new(&h264_params());
    let idr = MediaFrame::video(annexb(&[0x65, 0x88, 0x84, 0x00]), 1_000_000, true);
    let packets = packetizer.create_packets(&idr);
    assert_eq!(packets.len(), 2);

    let stap = parse(&packets[0]);
    assert!(stap.marker);
    assert_eq!(
        &stap.payload[..],
        &[24, 0, 4, 0x67, 0x42, 0xe0, 0x1f, 0, 2, 0x68, 0xce]
    );

    let single = parse(&packets[1]);
    assert!(single.marker);
    assert_eq!(single.timestamp, 90_000);
    assert_eq!(&single.payload[..], &[0x65, 0x88, 0x84, 0x00]);
    assert_eq!(single.sequence_number, stap.sequence_number.wrapping_add(1));

    // subsequent P frames flow without parameter sets
    let p_frame = MediaFrame::video(annexb(&[0x41, 0x9a]), 1_033_333, false);
    let packets = packetizer.create_packets(&p_frame);
    assert_eq!(packets.len(), 1);
    assert_eq!(&parse(&packets[0]).payload[..], &[0x41, 0x9a]);
}

#[test]
fn test_h264_strips_inline_parameter_sets() {
    let mut packetizer = VideoPacketizer::new(&h264_params());
    let mut data = annexb(&SPS);
    data.extend(annexb(&PPS));
    data.extend(annexb(&[0x65, 0x11, 0x22]));
    let packets = packetizer.create_packets(&MediaFrame::video(data, 0, true));
    assert_eq!(packets.len(), 2);
    assert_eq!(&parse(&packets[1]).payload[..], &[0x65, 0x11, 0x22]);
}

#[test]
fn test_h264_fu_a_fragmentation() {
    let mut packetizer = VideoPacketizer::new(&h264_params());
    let mut nal = vec![0x65];
    nal.extend(std::iter::repeat(0xab).take(3000));
    let packets = packetizer.create_packets(&MediaFrame::video(annexb(&nal), 0, true));

    let fragments: Vec<RTPPacket> = packets[1..].iter().map(parse).collect();
    let max_chunk = MAX_PACKET_SIZE - RTP_HEADER_LENGTH - 2;
    assert_eq!(fragments.len(), 3000usize.div_ceil(max_chunk));
    for (i, fragment) in fragments.iter().enumerate() {
        let last = i == fragments.len() - 1;
        assert_eq!(fragment.payload[0], 0x60 + 28);
        assert_eq!(fragment.payload[1] & 0x1f, 5);
        assert_eq!(fragment.payload[1] & 0x80 != 0, i == 0);
        assert_eq!(fragment.payload[1] & 0x40 != 0, last);
        assert_eq!(fragment.marker, last);
        assert!(packets[i + 1].len() <= MAX_PACKET_SIZE);
    }
    let total: usize = fragments.iter().map(|f| f.payload.len() - 2).sum();
    assert_eq!(total, 3000);
}

#[test]
fn test_h264_forced_params_on_p_frame() {
    let mut packetizer = VideoPacketizer::new(&h264_params());
    packetizer.force_params_once();
    let packets = packetizer.create_packets(&MediaFrame::video(annexb(&[0x41, 0x01]), 0, false));
    assert_eq!(packets.len(), 2);
    assert_eq!(parse(&packets[0]).payload[0], 24);
}

fn h265_params() -> VideoParams {
    VideoParams::new(
        VideoCodec::H265,
        &[0x42, 0x01, 0x01],
        Some(&[0x44, 0x01, 0xc1]),
        Some(&[0x40, 0x01, 0x0c]),
    )
}

#[test]
fn test_h265_idr_access_unit() {
    let mut packetizer = VideoPacketizer::new(&h265_params());
    let idr = MediaFrame::video(annexb(&[0x26, 0x01, 0xaf, 0x00]), 0, true);
    let packets: Vec<RTPPacket> = packetizer.create_packets(&idr).iter().map(parse).collect();

    assert_eq!(packets.len(), 5);
    assert_eq!(&packets[0].payload[..], &[0x46, 0x01, 0x80]); // AUD
    assert_eq!(&packets[1].payload[..], &[0x40, 0x01, 0x0c]); // VPS
    assert_eq!(&packets[2].payload[..], &[0x42, 0x01, 0x01]); // SPS
    assert_eq!(&packets[3].payload[..], &[0x44, 0x01, 0xc1]); // PPS
    assert_eq!(&packets[4].payload[..], &[0x26, 0x01, 0xaf, 0x00]);
    assert!(packets[..4].iter().all(|p| !p.marker));
    assert!(packets[4].marker);
}

#[test]
fn test_h265_marker_on_last_nal_only() {
    let mut packetizer = VideoPacketizer::new(&h265_params());
    let mut data = annexb(&[0x02, 0x01, 0x11]);
    data.extend(annexb(&[0x02, 0x01, 0x22]));
    let packets: Vec<RTPPacket> = packetizer
        .create_packets(&MediaFrame::video(data, 0, false))
        .iter()
        .map(parse)
        .collect();
    assert_eq!(packets.len(), 3);
    assert!(!packets[1].marker);
    assert!(packets[2].marker);
}

#[test]
fn test_h265_fu_fragmentation() {
    let mut packetizer = VideoPacketizer::new(&h265_params());
    let mut nal = vec![0x02, 0x01];
    nal.extend(std::iter::repeat(0x5a).take(2500));
    let packets: Vec<RTPPacket> = packetizer
        .create_packets(&MediaFrame::video(annexb(&nal), 0, false))
        .iter()
        .map(parse)
        .collect();

    let fragments = &packets[1..];
    assert_eq!(fragments.len(), 3);
    for (i, fragment) in fragments.iter().enumerate() {
        let last = i == fragments.len() - 1;
        assert_eq!(fragment.payload[0], 49 << 1);
        assert_eq!(fragment.payload[1], 0x01);
        assert_eq!(fragment.payload[2] & 0x3f, 1);
        assert_eq!(fragment.payload[2] & 0x80 != 0, i == 0);
        assert_eq!(fragment.payload[2] & 0x40 != 0, last);
        assert_eq!(fragment.marker, last);
    }
    let total: usize = fragments.iter().map(|f| f.payload.len() - 3).sum();
    assert_eq!(total, 2500);
}

#[test]
fn test_h265_hvcc_input() {
    let mut packetizer = VideoPacketizer::new(&h265_params());
    let au = [0, 0, 0, 3, 0x02, 0x01, 0x33];
    let packets = packetizer.create_packets(&MediaFrame::video(au.to_vec(), 0, false));
    assert_eq!(packets.len(), 2);
    assert_eq!(&parse(&packets[1]).payload[..], &[0x02, 0x01, 0x33]);
}

#[test]
fn test_av1_aggregation_header() {
    assert_eq!(av1::aggregation_header(true, true, true, 2), 0b0010_1000);
    assert_eq!(av1::aggregation_header(false, false, false, 1), 0b1101_0000);
    assert_eq!(av1::aggregation_header(true, false, true, 7), 0b1011_0000);
}

#[test]
fn test_av1_single_packet() {
    let params = VideoParams::new(VideoCodec::Av1, &[0x0a], None, None);
    let mut packetizer = VideoPacketizer::new(&params);
    let data = vec![
        0x12, 0x00, // temporal delimiter
        0x0a, 0x01, 0x99, // sequence header
        0x32, 0x01, 0x55, // frame
    ];
    let packets = packetizer.create_packets(&MediaFrame::video(data, 0, true));
    assert_eq!(packets.len(), 1);
    let packet = parse(&packets[0]);
    assert!(packet.marker);
    assert_eq!(
        &packet.payload[..],
        &[0b0010_1000, 0x03, 0x0a, 0x01, 0x99, 0x32, 0x01, 0x55]
    );
}

#[test]
fn test_av1_fragmentation() {
    let params = VideoParams::new(VideoCodec::Av1, &[0x0a], None, None);
    let mut packetizer = VideoPacketizer::new(&params);
    let mut data = vec![0x32, 0x90, 0x11]; // frame OBU, 2192 bytes
    data.extend(std::iter::repeat(0x77).take(2192));
    let packets: Vec<RTPPacket> = packetizer
        .create_packets(&MediaFrame::video(data, 0, false))
        .iter()
        .map(parse)
        .collect();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].payload[0], 0b0101_0000);
    assert_eq!(packets[1].payload[0], 0b1001_0000);
    assert!(!packets[0].marker);
    assert!(packets[1].marker);
}

#[test]
fn test_aac_strips_adts_and_writes_au_header() {
    let params = AudioParams {
        codec: AudioCodec::Aac,
        sample_rate: 44_100,
        is_stereo: true,
    };
    let mut packetizer = AudioPacketizer::new(&params);
    let frame = MediaFrame::audio(
        vec![
            0xFF, 0xF1, 0x50, 0x80, 0x01, 0x9F, 0xFC, // ADTS, frame length 12
            0x21, 0x00, 0x49, 0x90, 0x02,
        ],
        1_000_000,
    );
    let packets = packetizer.create_packets(&frame);
    assert_eq!(packets.len(), 1);
    let packet = parse(&packets[0]);
    assert_eq!(packet.payload_type, 97);
    assert_eq!(packet.timestamp, 44_100);
    assert!(packet.marker);
    assert_eq!(
        &packet.payload[..],
        &[0x00, 0x10, 0x00, 0x28, 0x21, 0x00, 0x49, 0x90, 0x02]
    );
}

#[test]
fn test_g711_chunks_mark_last() {
    let params = AudioParams {
        codec: AudioCodec::G711,
        sample_rate: 8000,
        is_stereo: false,
    };
    let mut packetizer = AudioPacketizer::new(&params);
    let frame = MediaFrame::audio(vec![0xd5; 2000], 0);
    let packets: Vec<RTPPacket> = packetizer.create_packets(&frame).iter().map(parse).collect();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].payload.len(), MAX_PACKET_SIZE - RTP_HEADER_LENGTH);
    assert!(!packets[0].marker);
    assert!(packets[1].marker);
}

#[test]
fn test_opus_timestamps_advance_per_packet() {
    let params = AudioParams {
        codec: AudioCodec::Opus,
        sample_rate: 48_000,
        is_stereo: true,
    };
    let mut packetizer = AudioPacketizer::new(&params);
    let first = packetizer.create_packets(&MediaFrame::audio(vec![1, 2], 1_000_000));
    let second = packetizer.create_packets(&MediaFrame::audio(vec![3, 4], 5_000_000));
    assert_eq!(first[0].timestamp, 48_000);
    // the frame clock is only used once
    assert_eq!(second[0].timestamp, 48_960);
    assert!(!parse(&second[0]).marker);
    assert_eq!(packetizer.clock_rate(), 48_000);
}

#[test]
fn test_interleaved_header() {
    assert_eq!(interleaved_header(2, 0x1234), Some([b'$', 2, 0x12, 0x34]));
    assert_eq!(interleaved_header(1, 65_535), Some([b'$', 1, 0xff, 0xff]));
    assert_eq!(interleaved_header(0, 65_536), None);
}
