use bytes::Bytes;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};

use super::stats::StatsRecorder;
use crate::av::{AudioParams, MediaClock, MediaFrame, MediaKind, Ports, VideoCodec, VideoParams, VIDEO_CLOCK_RATE};
use crate::format::rtcp::RtcpReporter;
use crate::format::rtp::{AudioPacketizer, RtpFrame, RtpPacketizer, VideoPacketizer};
use crate::format::rtsp::channel::{bind_udp_pair, MediaChannels, TrackChannel};
use crate::format::rtsp::connection::{control_writer, read_incoming, write_all, ControlWriter};
use crate::format::rtsp::response::RtpInfo;
use crate::format::rtsp::{
    Incoming, Method, ProtocolPolicy, RTSPError, Request, SdpBuilder, ServerMessages, TransportHeader,
};

pub(crate) const VIDEO_QUEUE_CAPACITY: usize = 32;
pub(crate) const AUDIO_QUEUE_CAPACITY: usize = 64;
/// Minimum spacing of parameter sets forced ahead of non-key frames.
const PARAMS_INJECT_INTERVAL: Duration = Duration::from_secs(2);
/// Parsed requests buffered between the reader task and the connection task.
const REQUEST_BACKLOG: usize = 8;

/// Server-wide state every connection reads.
pub(crate) struct ServeContext {
    pub app_name: String,
    pub messages: ServerMessages,
    pub clock: MediaClock,
    pub policy: ProtocolPolicy,
    pub video: watch::Sender<Option<VideoParams>>,
    pub audio: RwLock<Option<AudioParams>>,
}

/// An encoded frame copied once out of the producer's buffer and shared by
/// every connection.
#[derive(Debug, Clone)]
pub(crate) struct SharedFrame {
    kind: MediaKind,
    data: Bytes,
    timestamp_us: i64,
    is_key_frame: bool,
}

impl SharedFrame {
    /// Copies the payload and releases the producer's frame.
    pub fn from_frame(frame: MediaFrame) -> Self {
        let shared = Self {
            kind: frame.kind(),
            data: Bytes::copy_from_slice(frame.payload()),
            timestamp_us: frame.timestamp_us(),
            is_key_frame: frame.is_key_frame(),
        };
        frame.release();
        shared
    }

    fn to_media_frame(&self) -> MediaFrame {
        MediaFrame::new(self.kind, self.data.clone(), self.timestamp_us).with_key_flag(self.is_key_frame)
    }
}

/// The part of a connection the listener touches: its queues and stats.
pub(crate) struct Peer {
    pub id: u64,
    pub session_id: String,
    video: Mutex<VecDeque<SharedFrame>>,
    audio: Mutex<VecDeque<SharedFrame>>,
    notify: Notify,
    pub stats: StatsRecorder,
}

impl Peer {
    pub fn new(id: u64, remote: SocketAddr) -> Self {
        let session_id = format!("{:08X}", rand::random::<u32>());
        Self {
            id,
            stats: StatsRecorder::new(session_id.clone(), remote, VIDEO_QUEUE_CAPACITY, AUDIO_QUEUE_CAPACITY),
            session_id,
            video: Mutex::new(VecDeque::with_capacity(VIDEO_QUEUE_CAPACITY)),
            audio: Mutex::new(VecDeque::with_capacity(AUDIO_QUEUE_CAPACITY)),
            notify: Notify::new(),
        }
    }

    /// Never blocks. A full video queue keeps only an incoming key frame; a
    /// full audio queue loses its oldest entry.
    pub fn offer(&self, frame: &SharedFrame) {
        let (len, dropped) = match frame.kind {
            MediaKind::Video => {
                let mut queue = self.video.lock();
                if queue.len() >= VIDEO_QUEUE_CAPACITY {
                    if !frame.is_key_frame {
                        drop(queue);
                        self.stats.dropped(MediaKind::Video, 1);
                        return;
                    }
                    let stale = queue.len() as u64;
                    queue.clear();
                    queue.push_back(frame.clone());
                    (queue.len(), stale)
                } else {
                    queue.push_back(frame.clone());
                    (queue.len(), 0)
                }
            }
            MediaKind::Audio => {
                let mut queue = self.audio.lock();
                let dropped = if queue.len() >= AUDIO_QUEUE_CAPACITY {
                    queue.pop_front();
                    1
                } else {
                    0
                };
                queue.push_back(frame.clone());
                (queue.len(), dropped)
            }
        };
        if dropped > 0 {
            self.stats.dropped(frame.kind, dropped);
        }
        self.stats.enqueued(frame.kind, len);
        self.notify.notify_one();
    }

    fn pop(&self, kind: MediaKind) -> Option<SharedFrame> {
        let (frame, len) = {
            let mut queue = match kind {
                MediaKind::Video => self.video.lock(),
                MediaKind::Audio => self.audio.lock(),
            };
            let frame = queue.pop_front()?;
            (frame, queue.len())
        };
        self.stats.dequeued(kind, len);
        Some(frame)
    }

    fn clear(&self) {
        self.video.lock().clear();
        self.audio.lock().clear();
        self.stats.dequeued(MediaKind::Video, 0);
        self.stats.dequeued(MediaKind::Audio, 0);
    }

    #[cfg(test)]
    fn queue_len(&self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Video => self.video.lock().len(),
            MediaKind::Audio => self.audio.lock().len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Serves one player until it tears down, disconnects or the listener stops.
pub(crate) async fn serve(ctx: Arc<ServeContext>, peer: Arc<Peer>, stream: TcpStream, shutdown: watch::Receiver<u64>) {
    let (local, remote) = match (stream.local_addr(), stream.peer_addr()) {
        (Ok(local), Ok(remote)) => (local, remote),
        (Err(e), _) | (_, Err(e)) => {
            warn!("RtspServerConnection: cannot read socket addresses: {}", e);
            return;
        }
    };
    let (read, write) = stream.into_split();
    let (tx, requests) = mpsc::channel(REQUEST_BACKLOG);
    let reader = tokio::spawn(read_requests(BufReader::new(read), tx));

    let mut connection = Connection::new(ctx, peer, local, remote, control_writer(write));
    if let Err(e) = connection.run(requests, shutdown).await {
        debug!("RtspServerConnection [{}] ended: {}", remote, e);
    }
    reader.abort();
    connection.close().await;
    info!("RtspServerConnection [{}] closed", remote);
}

/// Reads the control connection; RTCP from the player is only traced.
async fn read_requests(mut reader: BufReader<OwnedReadHalf>, tx: mpsc::Sender<(String, String)>) {
    loop {
        match read_incoming(&mut reader).await {
            Ok(Incoming::Message { head, body }) => {
                if tx.send((head, body)).await.is_err() {
                    return;
                }
            }
            Ok(Incoming::Interleaved { channel, data }) => {
                trace!("RtspServerConnection: {} bytes on channel {}", data.len(), channel);
            }
            Err(RTSPError::Closed) => return,
            Err(e) => {
                debug!("RtspServerConnection: read failed: {}", e);
                return;
            }
        }
    }
}

struct Connection {
    ctx: Arc<ServeContext>,
    peer: Arc<Peer>,
    local: SocketAddr,
    remote: SocketAddr,
    writer: ControlWriter,
    channels: Arc<MediaChannels>,
    video_params: watch::Receiver<Option<VideoParams>>,
    video: Option<VideoPacketizer>,
    audio: Option<AudioPacketizer>,
    reporter: Option<RtcpReporter>,
    streaming: bool,
    waiting_for_key_frame: bool,
    last_injection: Option<Instant>,
}

impl Connection {
    fn new(ctx: Arc<ServeContext>, peer: Arc<Peer>, local: SocketAddr, remote: SocketAddr, writer: ControlWriter) -> Self {
        let video_params = ctx.video.subscribe();
        Self {
            channels: Arc::new(MediaChannels::new(writer.clone())),
            ctx,
            peer,
            local,
            remote,
            writer,
            video_params,
            video: None,
            audio: None,
            reporter: None,
            streaming: false,
            waiting_for_key_frame: false,
            last_injection: None,
        }
    }

    async fn run(
        &mut self,
        mut requests: mpsc::Receiver<(String, String)>,
        mut shutdown: watch::Receiver<u64>,
    ) -> io::Result<()> {
        let peer = self.peer.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                request = requests.recv() => match request {
                    Some((head, body)) => {
                        if self.handle(&head, &body).await? == Flow::Close {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                _ = peer.notify.notified(), if self.streaming => self.flush().await?,
            }
        }
    }

    async fn handle(&mut self, head: &str, body: &str) -> io::Result<Flow> {
        let request = match Request::parse(head, body) {
            Ok(request) => request,
            Err(e) => {
                warn!("RtspServerConnection [{}] bad request: {}", self.remote, e);
                let response = self.ctx.messages.error(400, None);
                write_all(&self.writer, response.as_bytes()).await?;
                return Ok(Flow::Continue);
            }
        };
        let cseq = request.cseq();
        debug!("RtspServerConnection [{}] {} {}", self.remote, request.method, request.uri);

        let mut flow = Flow::Continue;
        let response = match request.method {
            Method::Options => self.ctx.messages.options(cseq),
            Method::Describe => self.describe(&request),
            Method::Setup => self.setup(&request).await,
            Method::Play => self.play(&request),
            Method::Pause => {
                self.streaming = false;
                if let Some(reporter) = self.reporter.take() {
                    reporter.close().await;
                }
                self.ctx.messages.ok(cseq, Some(&self.peer.session_id))
            }
            Method::Teardown => {
                flow = Flow::Close;
                self.ctx.messages.ok(cseq, Some(&self.peer.session_id))
            }
            Method::GetParameter => match request.headers.session_id() {
                Some(id) if id != self.peer.session_id => self.ctx.messages.error(454, cseq),
                _ => self.ctx.messages.ok(cseq, Some(&self.peer.session_id)),
            },
            Method::Announce | Method::Record | Method::Unknown => self.ctx.messages.error(405, cseq),
        };
        write_all(&self.writer, response.as_bytes()).await?;
        Ok(flow)
    }

    fn describe(&self, request: &Request) -> String {
        let cseq = request.cseq();
        let video = self.video_params.borrow().clone();
        let video = match video.filter(|p| p.is_ok()) {
            Some(video) => video,
            None => {
                debug!("RtspServerConnection: DESCRIBE before stream parameters are known");
                return self.ctx.messages.error(503, cseq);
            }
        };
        let audio = *self.ctx.audio.read();
        let session = u32::from_str_radix(&self.peer.session_id, 16).unwrap_or_default();
        let sdp = SdpBuilder::new(&self.ctx.app_name, session).build(&video, audio.as_ref());
        self.ctx.messages.describe(cseq, &request.uri, sdp)
    }

    async fn setup(&mut self, request: &Request) -> String {
        let cseq = request.cseq();
        let kind = match track_id(&request.uri).and_then(MediaKind::from_track_id) {
            Some(kind) => kind,
            None => return self.ctx.messages.error(400, cseq),
        };
        let offer = match request.headers.transport().and_then(TransportHeader::parse) {
            Some(offer) => offer,
            None => return self.ctx.messages.error(461, cseq),
        };
        let allowed = match self.ctx.policy {
            ProtocolPolicy::Auto => true,
            ProtocolPolicy::Tcp => offer.is_tcp(),
            ProtocolPolicy::Udp => !offer.is_tcp(),
        };
        if !allowed {
            debug!("RtspServerConnection [{}] transport refused by policy {:?}", self.remote, self.ctx.policy);
            return self.ctx.messages.error(461, cseq);
        }

        let answer = if offer.is_tcp() {
            let (rtp, rtcp) = offer
                .interleaved
                .unwrap_or((kind.track_id() * 2, kind.track_id() * 2 + 1));
            self.channels.set_track(kind, TrackChannel::Interleaved { rtp, rtcp });
            TransportHeader {
                interleaved: Some((rtp, rtcp)),
                ..offer
            }
        } else if offer.profile.to_ascii_uppercase().starts_with("RTP/AVP") {
            let (rtp, rtcp) = match offer.client_port {
                Some(ports) => ports,
                None => return self.ctx.messages.error(400, cseq),
            };
            let remote = Some((self.remote.ip(), Ports::new(rtp, rtcp)));
            match bind_udp_pair(self.local.ip(), remote).await {
                Ok((ports, channel)) => {
                    self.channels.set_track(kind, channel);
                    offer.with_server_port(ports.rtp, ports.rtcp)
                }
                Err(e) => {
                    warn!("RtspServerConnection: cannot bind UDP pair: {}", e);
                    return self.ctx.messages.error(500, cseq);
                }
            }
        } else {
            return self.ctx.messages.error(461, cseq);
        };

        let ssrc = match self.prepare_packetizer(kind) {
            Some(ssrc) => ssrc,
            None => {
                self.channels.clear_track(kind);
                return self.ctx.messages.error(503, cseq);
            }
        };
        if let Some(protocol) = self.channels.protocol(kind) {
            self.peer.stats.set_protocol(protocol);
        }
        info!("RtspServerConnection [{}] SETUP {:?} over {}", self.remote, kind, answer.profile);
        let answer = TransportHeader {
            ssrc: Some(ssrc),
            ..answer
        };
        self.ctx.messages.setup(cseq, &self.peer.session_id, &answer)
    }

    /// Builds the packetizer of `kind` from the current parameters with a
    /// random SSRC and initial sequence number.
    fn prepare_packetizer(&mut self, kind: MediaKind) -> Option<u32> {
        let ssrc = rand::random::<u32>();
        match kind {
            MediaKind::Video => {
                let params = self.video_params.borrow_and_update().clone().filter(|p| p.is_ok())?;
                let mut packetizer = VideoPacketizer::new(&params);
                packetizer.set_ssrc(ssrc);
                packetizer.set_initial_seq(rand::random());
                self.video = Some(packetizer);
            }
            MediaKind::Audio => {
                let params = (*self.ctx.audio.read())?;
                let mut packetizer = AudioPacketizer::new(&params);
                packetizer.set_ssrc(ssrc);
                packetizer.set_initial_seq(rand::random());
                self.audio = Some(packetizer);
            }
        }
        if let Some(reporter) = &self.reporter {
            reporter.set_ssrc(kind, ssrc);
        }
        Some(ssrc)
    }

    fn play(&mut self, request: &Request) -> String {
        let cseq = request.cseq();
        if self.video.is_none() && self.audio.is_none() {
            return self.ctx.messages.error(455, cseq);
        }
        self.waiting_for_key_frame = matches!(
            self.video.as_ref().map(|p| p.codec()),
            Some(VideoCodec::H264) | Some(VideoCodec::H265)
        );

        if self.reporter.is_none() {
            let reporter = RtcpReporter::new(self.channels.clone(), self.audio.is_some());
            if let Some(p) = &self.video {
                reporter.set_ssrc(MediaKind::Video, p.ssrc());
            }
            if let Some(p) = &self.audio {
                reporter.set_ssrc(MediaKind::Audio, p.ssrc());
            }
            reporter.start();
            self.reporter = Some(reporter);
        }

        let base = request.uri.trim_end_matches('/');
        let mut tracks = Vec::new();
        if let Some(p) = &self.video {
            tracks.push(RtpInfo {
                track_id: MediaKind::Video.track_id(),
                url: format!("{}/trackID=0", base),
                seq: p.sequence_number().wrapping_add(1),
                rtptime: self.ctx.clock.rtp_time(VIDEO_CLOCK_RATE),
            });
        }
        if let Some(p) = &self.audio {
            tracks.push(RtpInfo {
                track_id: MediaKind::Audio.track_id(),
                url: format!("{}/trackID=1", base),
                seq: p.sequence_number().wrapping_add(1),
                rtptime: self.ctx.clock.rtp_time(p.clock_rate()),
            });
        }

        self.streaming = true;
        info!("RtspServerConnection [{}] PLAY", self.remote);
        self.ctx.messages.play(cseq, &self.peer.session_id, &tracks)
    }

    /// Drains both queues, alternating tracks.
    async fn flush(&mut self) -> io::Result<()> {
        loop {
            let video = self.peer.pop(MediaKind::Video);
            let audio = self.peer.pop(MediaKind::Audio);
            if video.is_none() && audio.is_none() {
                return Ok(());
            }
            if let Some(frame) = video {
                self.send_video(&frame).await?;
            }
            if let Some(frame) = audio {
                self.send_audio(&frame).await?;
            }
        }
    }

    async fn send_video(&mut self, frame: &SharedFrame) -> io::Result<()> {
        if self.video_params.has_changed().unwrap_or(false) {
            let params = self.video_params.borrow_and_update().clone();
            if let (Some(packetizer), Some(params)) = (self.video.as_mut(), params) {
                if params.codec == packetizer.codec() {
                    debug!("RtspServerConnection: new {} parameter sets", params.codec);
                    packetizer.set_video_params(&params);
                    self.waiting_for_key_frame = params.codec != VideoCodec::Av1;
                }
            }
        }
        let packetizer = match self.video.as_mut() {
            Some(packetizer) => packetizer,
            None => return Ok(()),
        };
        if self.waiting_for_key_frame {
            if !frame.is_key_frame {
                trace!("RtspServerConnection: waiting for key frame");
                return Ok(());
            }
            self.waiting_for_key_frame = false;
        }
        if frame.is_key_frame {
            self.last_injection = Some(Instant::now());
        } else if self.last_injection.map_or(true, |at| at.elapsed() >= PARAMS_INJECT_INTERVAL) {
            packetizer.force_params_once();
            self.last_injection = Some(Instant::now());
        }
        let packets = packetizer.create_packets(&frame.to_media_frame());
        self.send_packets(&packets).await
    }

    async fn send_audio(&mut self, frame: &SharedFrame) -> io::Result<()> {
        let packets = match self.audio.as_mut() {
            Some(packetizer) => packetizer.create_packets(&frame.to_media_frame()),
            None => return Ok(()),
        };
        self.send_packets(&packets).await
    }

    async fn send_packets(&self, packets: &[RtpFrame]) -> io::Result<()> {
        for packet in packets {
            let sent = self.channels.send_rtp(packet).await?;
            self.peer.stats.sent(packet.kind, sent);
            if let Some(reporter) = &self.reporter {
                reporter.update(packet).await;
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.streaming = false;
        if let Some(reporter) = self.reporter.take() {
            reporter.close().await;
        }
        self.channels.clear();
        self.peer.clear();
    }
}

/// Track id from a `.../trackID=N` control URL.
fn track_id(uri: &str) -> Option<u32> {
    let (_, rest) = uri.rsplit_once("trackID=")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
