use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, sleep};

use super::channel::{bind_udp_pair, MediaChannels, TrackChannel};
use super::connection::{control_writer, read_message, write_all, ControlWriter};
use super::queue::{FrameQueue, QueueStats, QueuedItem};
use super::{
    ClientMessages, EventSink, Method, Protocol, ProtocolPolicy, Response, RtspUrl, TransportEvent, TransportHeader,
    RESPONSE_TIMEOUT,
};
use crate::av::{AudioParams, MediaFrame, MediaKind, Ports, VideoParams};
use crate::error::{Result, SessionError, StreamError};
use crate::format::rtcp::RtcpReporter;
use crate::format::rtp::{AudioPacketizer, RtpFrame, RtpPacketizer, VideoPacketizer};
use crate::utils::BitrateCalculator;

/// How long `connect` waits for complete video parameters.
pub const PARAMS_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for the farewell `TEARDOWN` round trip.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);
/// How long `disconnect` waits for the session task before aborting it.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Send loop poll period while the queue is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Queue occupancy (percent) from which non-key video frames are skipped.
const CONGESTION_PERCENT: u32 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Streaming,
}

/// Options of a publish session.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub policy: ProtocolPolicy,
    /// Never set up an audio track, even when audio parameters are known.
    pub only_video: bool,
    pub app_name: String,
    pub app_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            policy: ProtocolPolicy::default(),
            only_video: true,
            app_name: env!("CARGO_PKG_NAME").to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_audio(mut self, enable: bool) -> Self {
        self.only_video = !enable;
        self
    }

    pub fn with_app(mut self, name: &str, version: &str) -> Self {
        self.app_name = name.to_string();
        self.app_version = version.to_string();
        self
    }
}

struct Inner {
    url: RtspUrl,
    options: ClientOptions,
    generation: u64,
    events: EventSink,
    state: Mutex<ClientState>,
    queue: FrameQueue,
    video_params: watch::Sender<Option<VideoParams>>,
    audio_params: Mutex<Option<AudioParams>>,
}

/// Control connection of a publish session.
struct Control {
    reader: BufReader<OwnedReadHalf>,
    writer: ControlWriter,
    messages: ClientMessages,
    local: SocketAddr,
    peer: SocketAddr,
}

/// Media side of an established session.
struct MediaPath {
    channels: Arc<MediaChannels>,
    reporter: RtcpReporter,
    bitrate: BitrateCalculator,
}

#[derive(Default)]
struct Link {
    control: Option<Control>,
    media: Option<MediaPath>,
}

/// Publishes encoded media to an RTSP server (`ANNOUNCE`/`RECORD`).
///
/// `connect` spawns the session task and returns at once; progress is
/// reported through the event sink tagged with the generation the client
/// was created with.
pub struct RtspClient {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl RtspClient {
    pub fn new(url: RtspUrl, options: ClientOptions, generation: u64, events: EventSink) -> Self {
        let (video_params, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                url,
                options,
                generation,
                events,
                state: Mutex::new(ClientState::Idle),
                queue: FrameQueue::default(),
                video_params,
                audio_params: Mutex::new(None),
            }),
            task: Mutex::new(None),
            shutdown: Mutex::new(None),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.lock()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    pub fn has_congestion(&self, threshold_percent: u32) -> bool {
        self.inner.queue.has_congestion(threshold_percent)
    }

    /// New parameter sets: handed to the send loop while streaming, kept for
    /// the next `ANNOUNCE` otherwise.
    pub fn set_video_params(&self, params: VideoParams) {
        debug!("RtspClient set_video_params: {}", params.codec);
        let state = self.inner.state.lock();
        if *state == ClientState::Streaming {
            self.inner.queue.push_params(params);
        } else {
            self.inner.video_params.send_replace(Some(params));
        }
    }

    pub fn set_audio_params(&self, params: AudioParams) -> Result<()> {
        debug!("RtspClient set_audio_params: {}", params.codec);
        let state = self.inner.state.lock();
        if *state == ClientState::Streaming {
            return Err(SessionError::Setup("Cannot change audio codec while streaming".into()).into());
        }
        if self.inner.options.only_video {
            return Err(SessionError::Setup("Cannot change audio codec in only video mode".into()).into());
        }
        *self.inner.audio_params.lock() = Some(params);
        Ok(())
    }

    /// Never blocks. Frames that cannot be queued are released on the spot.
    pub fn enqueue_frame(&self, frame: MediaFrame) -> bool {
        if frame.kind() == MediaKind::Audio && self.inner.options.only_video {
            frame.release();
            return false;
        }
        self.inner.queue.push_frame(frame)
    }

    /// Starts the session task. Fails unless the client is idle.
    pub fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != ClientState::Idle {
                return Err(SessionError::Setup("Cannot connect while streaming".into()).into());
            }
            *state = ClientState::Connecting;
        }
        info!("RtspClient connecting to {}", self.inner.url.base_uri());

        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);
        let inner = self.inner.clone();
        *self.task.lock() = Some(tokio::spawn(async move { inner.run(rx).await }));
        Ok(())
    }

    /// Stops the session, waiting for its `TEARDOWN` within a bounded time.
    pub async fn disconnect(&self) {
        debug!("RtspClient disconnect");
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if time::timeout(DISCONNECT_TIMEOUT, &mut task).await.is_err() {
                warn!("RtspClient disconnect timed out, aborting session task");
                task.abort();
                self.inner.finish();
            }
        }
        debug!("RtspClient disconnect: Done");
    }
}

impl Drop for RtspClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
        self.inner.queue.close();
    }
}

impl Inner {
    fn emit(&self, event: TransportEvent) {
        (self.events)(self.generation, event);
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock() = state;
        trace!("RtspClient state: {:?}", state);
    }

    /// Returns to idle and forgets per-session data.
    fn finish(&self) {
        let mut state = self.state.lock();
        *state = ClientState::Idle;
        self.queue.close();
        self.queue.reset_stats();
        self.video_params.send_replace(None);
        *self.audio_params.lock() = None;
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut link = Link::default();
        let result = tokio::select! {
            result = self.session(&mut link) => result,
            _ = shutdown.wait_for(|stop| *stop) => Ok(()),
        };

        if let Some(media) = link.media.take() {
            media.reporter.close().await;
            media.bitrate.stop();
        }
        if let Some(mut control) = link.control.take() {
            control.teardown().await;
        }
        self.finish();

        match result {
            Ok(()) => {
                info!("RtspClient disconnected");
                self.emit(TransportEvent::Disconnected);
            }
            Err(err) => {
                let err = SessionError::from(err);
                warn!("RtspClient connection error: {}", err);
                self.emit(TransportEvent::Error(err));
            }
        }
    }

    async fn session(&self, link: &mut Link) -> Result<()> {
        let video = self.wait_video_params().await?;
        let audio = if self.options.only_video {
            None
        } else {
            self.audio_params.lock().clone()
        };

        let messages = ClientMessages::new(&self.url, &self.options.app_name, &self.options.app_version);
        let control = link.control.insert(Control::connect(&self.url, messages).await?);
        let channels = Arc::new(control.handshake(self.options.policy, &video, audio.as_ref()).await?);
        info!("RtspClient connected to {}", control.peer);
        self.emit(TransportEvent::ConnectedOk);

        let events = self.events.clone();
        let generation = self.generation;
        let media = link.media.insert(MediaPath {
            reporter: RtcpReporter::new(channels.clone(), audio.is_some()),
            bitrate: BitrateCalculator::new(move |bps| events(generation, TransportEvent::BitrateSample(bps))),
            channels,
        });

        tokio::select! {
            result = control.keep_alive() => result,
            result = self.send_loop(media, &video, audio.as_ref()) => result,
        }
    }

    async fn wait_video_params(&self) -> Result<VideoParams> {
        let mut params = self.video_params.subscribe();
        let ready = time::timeout(PARAMS_TIMEOUT, params.wait_for(|p| p.as_ref().map_or(false, |p| p.is_ok()))).await;
        match ready {
            Ok(Ok(params)) => params
                .clone()
                .ok_or_else(|| SessionError::Setup("SPS/PPS/VPS not set".into()).into()),
            _ => Err(SessionError::Setup("SPS/PPS/VPS not set or incomplete for video codec.".into()).into()),
        }
    }

    async fn send_loop(&self, media: &MediaPath, video: &VideoParams, audio: Option<&AudioParams>) -> Result<()> {
        let mut video_packetizer = VideoPacketizer::new(video);
        let video_ssrc = rand::random::<u32>();
        video_packetizer.set_ssrc(video_ssrc);
        media.reporter.set_ssrc(MediaKind::Video, video_ssrc);

        let mut audio_packetizer = audio.map(|params| {
            let mut packetizer = AudioPacketizer::new(params);
            let ssrc = rand::random::<u32>();
            packetizer.set_ssrc(ssrc);
            media.reporter.set_ssrc(MediaKind::Audio, ssrc);
            packetizer
        });

        let late = {
            let mut state = self.state.lock();
            *state = ClientState::Streaming;
            self.queue.clear();
            self.queue.open();
            // parameter sets replaced during the handshake never reach the queue
            self.video_params.borrow().clone().filter(|p| p != video && p.is_ok())
        };
        if let Some(params) = late {
            apply_video_params(&mut video_packetizer, media, &params);
        }
        debug!("RtspClient streaming");
        media.reporter.start();
        media.bitrate.start();

        loop {
            let item = match self.queue.pop_timeout(POLL_INTERVAL).await {
                Some(item) => item,
                None => continue,
            };

            match item {
                QueuedItem::Frame(frame) => {
                    if frame.kind() == MediaKind::Video
                        && !frame.is_key_frame()
                        && self.queue.has_congestion(CONGESTION_PERCENT)
                    {
                        trace!("RtspClient congested, skipping video frame");
                        frame.release();
                        continue;
                    }
                    let packets = match frame.kind() {
                        MediaKind::Video => video_packetizer.create_packets(&frame),
                        MediaKind::Audio => match audio_packetizer.as_mut() {
                            Some(packetizer) => packetizer.create_packets(&frame),
                            None => Vec::new(),
                        },
                    };
                    let sent = send_packets(media, &packets).await;
                    frame.release();
                    if let Err(e) = sent {
                        warn!("RtspClient error sending packet: {}", e);
                        return Err(SessionError::Failed(format!("Error sending packet: {}", e)).into());
                    }
                }
                QueuedItem::NewVideoParams(params) => apply_video_params(&mut video_packetizer, media, &params),
            }
        }
    }
}

/// Restarts the video stream under a fresh SSRC with the new parameter sets.
fn apply_video_params(packetizer: &mut VideoPacketizer, media: &MediaPath, params: &VideoParams) {
    if params.codec != packetizer.codec() {
        warn!("RtspClient ignoring {} params for {} stream", params.codec, packetizer.codec());
        return;
    }
    info!("RtspClient applying new {} parameter sets", params.codec);
    packetizer.reset();
    let ssrc = rand::random::<u32>();
    packetizer.set_ssrc(ssrc);
    packetizer.set_video_params(params);
    media.reporter.set_ssrc(MediaKind::Video, ssrc);
}

async fn send_packets(media: &MediaPath, packets: &[RtpFrame]) -> std::io::Result<()> {
    for packet in packets {
        let sent = media.channels.send_rtp(packet).await?;
        media.bitrate.add(sent);
        media.reporter.update(packet).await;
    }
    Ok(())
}

impl Control {
    async fn connect(url: &RtspUrl, messages: ClientMessages) -> Result<Self> {
        if url.tls {
            return Err(StreamError::Tls("rtsps transport is not available".into()));
        }
        let address = lookup_host((url.host.as_str(), url.port))
            .await
            .ok()
            .and_then(|mut addresses| addresses.next())
            .ok_or_else(|| StreamError::InvalidAddress(url.host.clone()))?;

        let stream = time::timeout(RESPONSE_TIMEOUT, TcpStream::connect(address)).await??;
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: control_writer(write),
            messages,
            local,
            peer,
        })
    }

    async fn roundtrip(&mut self, request: String) -> Result<Response> {
        trace!("RtspClient >>\n{}", request);
        let cseq = self.messages.cseq();
        write_all(&self.writer, request.as_bytes()).await?;

        let response = time::timeout(RESPONSE_TIMEOUT, async {
            loop {
                let (head, body) = read_message(&mut self.reader).await?;
                let response = Response::parse(&head, &body)?;
                match response.cseq() {
                    Some(seq) if seq < cseq => debug!("RtspClient skipping stale response CSeq {}", seq),
                    _ => return Ok::<_, StreamError>(response),
                }
            }
        })
        .await??;

        trace!("RtspClient << {} {}", response.status, response.reason);
        self.messages.on_response(&response);
        Ok(response)
    }

    /// One request with a single authenticated retry on 401.
    async fn exchange<F>(&mut self, method: Method, uri: &str, label: &str, build: F) -> Result<Response>
    where
        F: Fn(&mut ClientMessages) -> String,
    {
        let request = build(&mut self.messages);
        let mut response = self.roundtrip(request).await?;
        if response.status == 401 {
            let challenge = response.www_authenticate().unwrap_or_default().to_string();
            if !self.messages.apply_auth(method, uri, &challenge) {
                return Err(SessionError::NoCredentials.into());
            }
            debug!("RtspClient retrying {} with credentials", method);
            let request = build(&mut self.messages);
            response = self.roundtrip(request).await?;
        }
        match response.status {
            200..=299 => Ok(response),
            401 => Err(SessionError::Auth.into()),
            403 => Err(SessionError::AccessDenied.into()),
            status => Err(SessionError::Failed(format!("{}: [{}] {}", label, status, response.reason)).into()),
        }
    }

    async fn handshake(
        &mut self,
        policy: ProtocolPolicy,
        video: &VideoParams,
        audio: Option<&AudioParams>,
    ) -> Result<MediaChannels> {
        self.messages.reset();
        let base = self.messages.base_uri().to_string();

        self.exchange(Method::Options, &base, "OPTIONS", |m| m.options()).await?;
        self.exchange(Method::Announce, &base, "ANNOUNCE", |m| m.announce(video, audio))
            .await?;
        debug!("RtspClient ANNOUNCE success");

        let channels = MediaChannels::new(self.writer.clone());
        let video_protocol = self.setup_track(&channels, MediaKind::Video, policy).await?;
        if policy == ProtocolPolicy::Auto {
            info!("RtspClient auto selected transport: {}", video_protocol);
        }

        if audio.is_some() {
            let audio_policy = match (policy, video_protocol) {
                (ProtocolPolicy::Auto, Protocol::Udp) => ProtocolPolicy::Udp,
                (ProtocolPolicy::Auto, Protocol::Tcp) => ProtocolPolicy::Tcp,
                (policy, _) => policy,
            };
            self.setup_track(&channels, MediaKind::Audio, audio_policy).await?;
        }

        self.exchange(Method::Record, &base, "RECORD", |m| m.record()).await?;
        Ok(channels)
    }

    async fn setup_track(&mut self, channels: &MediaChannels, kind: MediaKind, policy: ProtocolPolicy) -> Result<Protocol> {
        let track_id = kind.track_id();
        let uri = self.messages.track_uri(track_id);
        let label = format!("SETUP track {}", track_id);

        let (offer, udp) = match policy {
            ProtocolPolicy::Tcp => (TransportHeader::tcp_record(track_id), None),
            ProtocolPolicy::Udp | ProtocolPolicy::Auto => {
                let (ports, channel) = bind_udp_pair(self.local.ip(), None).await?;
                (TransportHeader::udp_record(ports.rtp, ports.rtcp), Some(channel))
            }
        };

        let response = self
            .exchange(Method::Setup, &uri, &label, |m| m.setup(track_id, &offer))
            .await?;
        let answer = response.headers.transport().and_then(TransportHeader::parse);
        let missing = || SessionError::Failed(format!("{}: Missing/invalid Transport header", label));

        match (policy, answer) {
            (ProtocolPolicy::Tcp, Some(TransportHeader { interleaved: Some((rtp, rtcp)), .. }))
            | (ProtocolPolicy::Auto, Some(TransportHeader { interleaved: Some((rtp, rtcp)), .. })) => {
                channels.set_track(kind, TrackChannel::Interleaved { rtp, rtcp });
                Ok(Protocol::Tcp)
            }
            (ProtocolPolicy::Tcp, _) => Err(missing().into()),
            (ProtocolPolicy::Udp, Some(TransportHeader { interleaved: Some(_), .. })) => {
                Err(SessionError::Failed(format!("{}: Unexpected TCP Transport", label)).into())
            }
            (_, Some(TransportHeader { server_port: Some((rtp, rtcp)), .. })) => {
                let channel = udp.ok_or_else(missing)?;
                channels.set_track(kind, channel);
                channels.connect_udp(kind, self.peer.ip(), Ports::new(rtp, rtcp)).await?;
                Ok(Protocol::Udp)
            }
            _ => Err(missing().into()),
        }
    }

    async fn keep_alive(&mut self) -> Result<()> {
        loop {
            sleep(self.messages.keep_alive_delay()).await;
            let method = if self.messages.has_session() {
                Method::GetParameter
            } else {
                Method::Options
            };
            let uri = self.messages.base_uri().to_string();
            let result = self
                .exchange(method, &uri, method.as_str(), |m| m.keep_alive().1)
                .await;
            if let Err(err) = result {
                let err = match SessionError::from(err) {
                    err if err.is_client_error() && !matches!(err, SessionError::Connection(_)) => err,
                    err => SessionError::Failed(format!("Keep-alive failed: {}", err)),
                };
                return Err(err.into());
            }
            trace!("RtspClient keep-alive ok");
        }
    }

    /// Best effort; the connection is dropped right after.
    async fn teardown(&mut self) {
        let request = self.messages.teardown();
        let result = time::timeout(TEARDOWN_TIMEOUT, self.roundtrip(request)).await;
        match result {
            Ok(Ok(response)) => debug!("RtspClient TEARDOWN: {}", response.status),
            Ok(Err(e)) => debug!("RtspClient TEARDOWN failed: {}", e),
            Err(_) => debug!("RtspClient TEARDOWN timed out"),
        }
    }
}
