use super::*;
use crate::av::{AudioCodec, MediaKind, VideoCodec};
use crate::format::rtsp::connection::read_incoming;
use crate::format::rtsp::{Incoming, Response, TransportHeader};
use pretty_assertions::assert_eq;
use std::net::Ipv4Addr;
use std::sync::atomic::AtomicUsize;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn h264() -> VideoParams {
    VideoParams::new(VideoCodec::H264, &[0x67, 0x42, 0xc0, 0x1f], Some(&[0x68, 0xce, 0x3c, 0x80]), None)
}

fn recorder() -> (EventSink, mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: EventSink = Arc::new(move |generation, event| {
        let _ = tx.send((generation, event));
    });
    (sink, rx)
}

async fn started(generation: u64) -> (RtspServer, mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
    let (sink, mut rx) = recorder();
    let server = RtspServer::new(ServerOptions::new().with_port(0), generation, sink);
    assert_eq!(server.start(&[LOCALHOST]).await, 1);
    assert_eq!(rx.recv().await, Some((generation, TransportEvent::ServerStarted)));
    (server, rx)
}

struct Player {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    cseq: u32,
    base: String,
}

impl Player {
    async fn connect(server: &RtspServer) -> Self {
        let address = server.local_addrs()[0];
        let stream = TcpStream::connect(address).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
            cseq: 0,
            base: format!("rtsp://{}/screen", address),
        }
    }

    async fn request(&mut self, method: &str, uri: &str, headers: &[&str]) -> Response {
        self.cseq += 1;
        let mut text = format!("{} {} RTSP/1.0\r\nCSeq: {}\r\n", method, uri, self.cseq);
        for header in headers {
            text.push_str(header);
            text.push_str("\r\n");
        }
        text.push_str("\r\n");
        self.writer.write_all(text.as_bytes()).await.unwrap();
        match read_incoming(&mut self.reader).await.unwrap() {
            Incoming::Message { head, body } => {
                let response = Response::parse(&head, &body).unwrap();
                assert_eq!(response.cseq(), Some(self.cseq));
                response
            }
            other => panic!("expected a response, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_describe_without_params_is_unavailable() {
    let (server, _rx) = started(1).await;
    let mut player = Player::connect(&server).await;
    let base = player.base.clone();

    let response = player.request("DESCRIBE", &base, &["Accept: application/sdp"]).await;
    assert_eq!(response.status, 503);
    assert_eq!(response.headers.get("Retry-After"), Some("2"));
    assert!(response.body.is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_play_over_interleaved_tcp() {
    let (server, _rx) = started(3).await;
    server.set_video_params(h264());
    let mut player = Player::connect(&server).await;
    let base = player.base.clone();

    let options = player.request("OPTIONS", &base, &[]).await;
    assert_eq!(options.status, 200);
    assert!(options.headers.get("Public").unwrap().contains("DESCRIBE"));

    let describe = player.request("DESCRIBE", &base, &[]).await;
    assert_eq!(describe.status, 200);
    assert!(describe.body.contains("m=video 0 RTP/AVP 96"));
    assert!(describe.body.contains("a=control:trackID=0"));
    assert!(!describe.body.contains("m=audio"));

    let setup = player
        .request(
            "SETUP",
            &format!("{}/trackID=0", base),
            &["Transport: RTP/AVP/TCP;unicast;interleaved=0-1"],
        )
        .await;
    assert_eq!(setup.status, 200);
    let session = setup.headers.session_id().unwrap().to_string();
    assert_eq!(setup.headers.session_timeout(), Some(60));
    let transport = TransportHeader::parse(setup.headers.transport().unwrap()).unwrap();
    assert_eq!(transport.interleaved, Some((0, 1)));

    let play = player.request("PLAY", &base, &[&format!("Session: {}", session)]).await;
    assert_eq!(play.status, 200);
    let rtp_info = play.headers.get("RTP-Info").unwrap();
    assert!(rtp_info.starts_with(&format!("url={}/trackID=0;seq=", base)));

    // non-key frames are held back until the first key frame
    server.on_frame(MediaFrame::video(vec![0, 0, 0, 1, 0x41, 0x9a, 0x02], 10_000, false));
    server.on_frame(MediaFrame::video(vec![0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00], 20_000, true));
    match read_incoming(&mut player.reader).await.unwrap() {
        Incoming::Interleaved { channel, data } => {
            assert_eq!(channel, 0);
            assert_eq!(data[0], 0x80);
            assert_eq!(data[1] & 0x7f, 96);
        }
        other => panic!("expected RTP, got {:?}", other),
    }

    let stats = server.client_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].session_id, session);
    assert_eq!(stats[0].protocol, Some(crate::format::rtsp::Protocol::Tcp));
    server.stop().await;
}

#[tokio::test]
async fn test_udp_setup_reports_server_ports() {
    let (server, _rx) = started(4).await;
    server.set_video_params(h264());
    server.set_audio_params(Some(AudioParams {
        codec: AudioCodec::Opus,
        sample_rate: 48_000,
        is_stereo: true,
    }));
    let mut player = Player::connect(&server).await;
    let base = player.base.clone();

    let setup = player
        .request(
            "SETUP",
            &format!("{}/trackID=1", base),
            &["Transport: RTP/AVP;unicast;client_port=40000-40001"],
        )
        .await;
    assert_eq!(setup.status, 200);
    let transport = TransportHeader::parse(setup.headers.transport().unwrap()).unwrap();
    assert_eq!(transport.client_port, Some((40000, 40001)));
    let (rtp, rtcp) = transport.server_port.unwrap();
    assert_eq!(rtp % 2, 0);
    assert_eq!(rtcp, rtp + 1);

    let missing_ports = player
        .request("SETUP", &format!("{}/trackID=0", base), &["Transport: RTP/AVP;unicast"])
        .await;
    assert_eq!(missing_ports.status, 400);
    server.stop().await;
}

#[tokio::test]
async fn test_request_errors() {
    let (server, _rx) = started(5).await;
    server.set_video_params(h264());
    let mut player = Player::connect(&server).await;
    let base = player.base.clone();

    let bad_track = player
        .request(
            "SETUP",
            &format!("{}/trackID=5", base),
            &["Transport: RTP/AVP/TCP;unicast;interleaved=0-1"],
        )
        .await;
    assert_eq!(bad_track.status, 400);

    let bad_transport = player
        .request("SETUP", &format!("{}/trackID=0", base), &["Transport: RAW/RAW/UDP;unicast"])
        .await;
    assert_eq!(bad_transport.status, 461);

    let play = player.request("PLAY", &base, &[]).await;
    assert_eq!(play.status, 455);

    let foreign = player.request("GET_PARAMETER", &base, &["Session: DEADBEEF"]).await;
    assert_eq!(foreign.status, 454);

    let record = player.request("RECORD", &base, &[]).await;
    assert_eq!(record.status, 405);
    assert!(record.headers.get("Allow").is_some());

    let teardown = player.request("TEARDOWN", &base, &[]).await;
    assert_eq!(teardown.status, 200);
    server.stop().await;
}

#[tokio::test]
async fn test_clients_changed_and_stop() {
    let (server, mut rx) = started(6).await;
    let player = Player::connect(&server).await;

    match rx.recv().await {
        Some((6, TransportEvent::ClientsChanged(stats))) => assert_eq!(stats.len(), 1),
        other => panic!("unexpected {:?}", other),
    }
    drop(player);
    match rx.recv().await {
        Some((6, TransportEvent::ClientsChanged(stats))) => assert!(stats.is_empty()),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(server.client_count(), 0);

    server.stop().await;
    assert_eq!(rx.recv().await, Some((6, TransportEvent::ServerStopped)));
    assert!(!server.is_running());
    // a second stop is silent
    server.stop().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_no_bindable_address_is_an_error() {
    let (sink, mut rx) = recorder();
    let server = RtspServer::new(ServerOptions::new().with_port(0), 7, sink);
    // TEST-NET-1, never assigned to a local interface
    let unreachable = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
    assert_eq!(server.start(&[unreachable]).await, 0);
    assert!(matches!(
        rx.recv().await,
        Some((7, TransportEvent::Error(SessionError::Connection(_))))
    ));
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_frames_without_players_are_released() {
    let (server, _rx) = started(8).await;
    let released = Arc::new(AtomicUsize::new(0));
    for kind in [MediaKind::Video, MediaKind::Audio] {
        let counter = released.clone();
        server.on_frame(MediaFrame::new(kind, vec![0u8; 8], 0).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(server.urls(), vec![format!("rtsp://{}/screen", server.local_addrs()[0])]);
    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_all_keeps_listening() {
    let (server, mut rx) = started(9).await;
    server.set_video_params(h264());
    let mut first = Player::connect(&server).await;
    assert!(matches!(rx.recv().await, Some((9, TransportEvent::ClientsChanged(_)))));

    server.disconnect_all().await;
    server.clear_params();
    assert_eq!(server.client_count(), 0);
    let mut buf = [0u8; 1];
    assert_eq!(tokio::io::AsyncReadExt::read(&mut first.reader, &mut buf).await.unwrap(), 0);

    let mut second = Player::connect(&server).await;
    let base = second.base.clone();
    let describe = second.request("DESCRIBE", &base, &[]).await;
    assert_eq!(describe.status, 503);
    assert!(server.is_running());
    server.stop().await;
}

#[tokio::test]
async fn test_tcp_only_policy_refuses_udp() {
    let (sink, _rx) = recorder();
    let server = RtspServer::new(
        ServerOptions::new().with_port(0).with_policy(crate::format::rtsp::ProtocolPolicy::Tcp),
        10,
        sink,
    );
    server.start(&[LOCALHOST]).await;
    server.set_video_params(h264());
    let mut player = Player::connect(&server).await;
    let track = format!("{}/trackID=0", player.base);

    let udp = player
        .request("SETUP", &track, &["Transport: RTP/AVP;unicast;client_port=40000-40001"])
        .await;
    assert_eq!(udp.status, 461);
    let tcp = player
        .request("SETUP", &track, &["Transport: RTP/AVP/TCP;unicast;interleaved=0-1"])
        .await;
    assert_eq!(tcp.status, 200);
    server.stop().await;
}
