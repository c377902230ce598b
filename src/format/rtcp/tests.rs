use super::*;
use crate::av::MediaKind;
use crate::format::rtp::RtpFrame;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(MediaKind, Vec<u8>)>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn count(&self, kind: MediaKind, packet_type: u8) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(k, p)| *k == kind && p[1] == packet_type)
            .count()
    }
}

#[async_trait]
impl RtcpSink for RecordingSink {
    async fn send_rtcp(&self, kind: MediaKind, packet: &[u8]) -> io::Result<()> {
        self.sent.lock().push((kind, packet.to_vec()));
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        }
        Ok(())
    }
}

fn rtp(kind: MediaKind, len: usize, timestamp: u32) -> RtpFrame {
    RtpFrame {
        kind,
        data: Bytes::from(vec![0x80; len]),
        timestamp,
    }
}

#[test]
fn test_rtcp_sender_report_parse() {
    let data = vec![
        0x80, 0xc8, 0x00, 0x06, // V=2, P=0, Count=0, Type=SR(200), Len=6
        0x12, 0x34, 0x56, 0x78, // SSRC
        0xdf, 0xa0, 0x00, 0x00, // NTP timestamp (MSW)
        0x00, 0x00, 0x00, 0x00, // NTP timestamp (LSW)
        0x00, 0x01, 0x86, 0xa0, // RTP timestamp (100000)
        0x00, 0x00, 0x00, 0x0a, // Packet count (10)
        0x00, 0x00, 0x0b, 0xb8, // Octet count (3000)
    ];

    let packet = RTCPPacket::parse(&data).unwrap();
    assert_eq!(
        packet,
        RTCPPacket::SenderReport {
            ssrc: 0x12345678,
            ntp_timestamp: 0xdfa0_0000_0000_0000,
            rtp_timestamp: 100000,
            packet_count: 10,
            octet_count: 3000,
        }
    );
}

#[test]
fn test_sender_report_layout() {
    let sr = sender_report(0x0102_0304, 0x1122_3344_5566_7788, 0xaabb_ccdd, 7, 900);
    assert_eq!(&sr[..4], &[0x80, 200, 0x00, 0x06]);
    assert_eq!(&sr[4..8], &[1, 2, 3, 4]);
    assert_eq!(&sr[8..16], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
    assert_eq!(&sr[16..20], &[0xaa, 0xbb, 0xcc, 0xdd]);
    assert_eq!(&sr[20..24], &[0, 0, 0, 7]);
    assert_eq!(&sr[24..28], &[0, 0, 0x03, 0x84]);
}

#[test]
fn test_goodbye_layout() {
    let bye = goodbye(0xcafe_babe);
    assert_eq!(bye, [0x81, 203, 0x00, 0x01, 0xca, 0xfe, 0xba, 0xbe]);
    assert_eq!(
        RTCPPacket::parse(&bye).unwrap(),
        RTCPPacket::Goodbye {
            sources: vec![0xcafe_babe]
        }
    );
}

#[test]
fn test_rtcp_receiver_report_parse() {
    let data = vec![
        0x81, 0xc9, 0x00, 0x07, // V=2, P=0, Count=1, Type=RR(201), Len=7
        0x12, 0x34, 0x56, 0x78, // SSRC of packet sender
        0x11, 0x11, 0x11, 0x11, // SSRC_1 (source 1)
        0x20, 0x00, 0x00, 0x01, // fraction lost + cumulative lost
        0x00, 0x00, 0x03, 0xe8, // extended highest seq number
        0x00, 0x00, 0x00, 0x64, // interarrival jitter
        0x00, 0x00, 0x00, 0x00, // LSR
        0x00, 0x00, 0x00, 0x00, // DLSR
    ];

    match RTCPPacket::parse(&data).unwrap() {
        RTCPPacket::ReceiverReport { ssrc, reports } => {
            assert_eq!(ssrc, 0x12345678);
            assert_eq!(reports.len(), 1);

            let report = &reports[0];
            assert_eq!(report.ssrc, 0x11111111);
            assert_eq!(report.fraction_lost, 0x20);
            assert_eq!(report.packets_lost, 1);
            assert_eq!(report.highest_seq, 1000);
            assert_eq!(report.jitter, 100);
        }
        other => panic!("Expected ReceiverReport, got {:?}", other),
    }
}

#[test]
fn test_ntp_conversion() {
    let ntp = ntp_from_unix(Duration::from_millis(1_500));
    assert_eq!(ntp >> 32, NTP_UNIX_OFFSET + 1);
    // half a second is half of the 32-bit fraction
    assert_eq!(ntp & 0xffff_ffff, 1u64 << 31);

    let jan_2020_ntp = 3_786_825_600u64 << 32;
    assert!(get_ntp_timestamp() > jan_2020_ntp);
}

#[test]
fn test_invalid_rtcp_packet() {
    let data = vec![0x80, 0xc8, 0x00];
    assert_eq!(RTCPPacket::parse(&data), Err(RTCPError::InvalidPacket));

    let data = vec![0x40, 0xc8, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
    assert_eq!(RTCPPacket::parse(&data), Err(RTCPError::InvalidPacket));

    // SR claiming 6 words but carrying one
    let data = vec![0x80, 0xc8, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00];
    assert_eq!(RTCPPacket::parse(&data), Err(RTCPError::InvalidPacket));

    // SDES is not read back
    let data = vec![0x80, 202, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
    assert_eq!(RTCPPacket::parse(&data), Err(RTCPError::UnsupportedType));
}

#[tokio::test(start_paused = true)]
async fn test_first_packet_reports_immediately() {
    let sink = Arc::new(RecordingSink::default());
    let reporter = RtcpReporter::new(sink.clone(), false);
    reporter.set_ssrc(MediaKind::Video, 0x1111_2222);

    reporter.update(&rtp(MediaKind::Video, 112, 9000)).await;
    reporter.update(&rtp(MediaKind::Video, 62, 9000)).await;

    let sent = sink.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    match RTCPPacket::parse(&sent[0].1).unwrap() {
        RTCPPacket::SenderReport {
            ssrc,
            rtp_timestamp,
            packet_count,
            octet_count,
            ..
        } => {
            assert_eq!(ssrc, 0x1111_2222);
            assert_eq!(rtp_timestamp, 9000);
            assert_eq!(packet_count, 1);
            assert_eq!(octet_count, 100);
        }
        other => panic!("Expected SenderReport, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_periodic_reports_are_spaced() {
    let sink = Arc::new(RecordingSink::default());
    let reporter = RtcpReporter::new(sink.clone(), false);
    reporter.set_ssrc(MediaKind::Video, 1);
    reporter.start();

    reporter.update(&rtp(MediaKind::Video, 100, 0)).await;
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(sink.count(MediaKind::Video, PT_SENDER_REPORT), 1);

    reporter.update(&rtp(MediaKind::Video, 100, 90_000)).await;
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(sink.count(MediaKind::Video, PT_SENDER_REPORT), 2);
}

#[tokio::test(start_paused = true)]
async fn test_inactive_track_is_suppressed() {
    let sink = Arc::new(RecordingSink::default());
    let reporter = RtcpReporter::new(sink.clone(), true);
    reporter.start();

    reporter.update(&rtp(MediaKind::Audio, 40, 0)).await;
    tokio::time::sleep(Duration::from_millis(6_500)).await;
    let settled = sink.count(MediaKind::Audio, PT_SENDER_REPORT);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sink.count(MediaKind::Audio, PT_SENDER_REPORT), settled);
    // video never sent a packet
    assert_eq!(sink.count(MediaKind::Video, PT_SENDER_REPORT), 0);
}

#[tokio::test]
async fn test_close_sends_goodbye_per_track() {
    let sink = Arc::new(RecordingSink::default());
    let reporter = RtcpReporter::new(sink.clone(), true);
    reporter.set_ssrc(MediaKind::Video, 10);
    reporter.set_ssrc(MediaKind::Audio, 20);
    reporter.close().await;
    reporter.close().await;

    assert_eq!(sink.count(MediaKind::Video, PT_GOODBYE), 1);
    assert_eq!(sink.count(MediaKind::Audio, PT_GOODBYE), 1);

    let sink = Arc::new(RecordingSink::default());
    let reporter = RtcpReporter::new(sink.clone(), false);
    reporter.close().await;
    assert_eq!(sink.count(MediaKind::Video, PT_GOODBYE), 1);
    assert_eq!(sink.count(MediaKind::Audio, PT_GOODBYE), 0);
    assert!(reporter.is_closed());
}

#[tokio::test]
async fn test_send_failures_are_swallowed() {
    let sink = Arc::new(RecordingSink::failing());
    let reporter = RtcpReporter::new(sink.clone(), true);
    reporter.update(&rtp(MediaKind::Video, 100, 0)).await;
    reporter.close().await;
    // SR plus two BYEs were attempted
    assert_eq!(sink.sent.lock().len(), 3);

    // updates after close are ignored
    reporter.update(&rtp(MediaKind::Video, 100, 0)).await;
    assert_eq!(sink.sent.lock().len(), 3);
}
