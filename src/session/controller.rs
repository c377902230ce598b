use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;

use super::collaborators::{
    AudioCodecInfo, AudioEncoder, CaptureSurface, Collaborators, DiscoveryFilter, DisplayMetrics, VideoCapabilities,
    VideoCodecInfo, VideoConfig, VideoEncoder,
};
use super::events::{Band, Command, Event, EventQueue};
use super::resize::adjust_resize_factor;
use super::sink::{FrameRouter, MediaSink, Route};
use super::state::{RtspBinding, SessionStatus, StreamMode, ViewState};
use crate::av::{AudioParams, MediaClock, VideoParams};
use crate::config::StreamSettings;
use crate::error::{Result, SessionError};
use crate::format::rtsp::{ClientOptions, EventSink, RtspClient, RtspServer, RtspUrl, ServerOptions, TransportEvent};

/// Upper bound for `destroy` to wait on the teardown.
pub const DESTROY_TIMEOUT: Duration = Duration::from_secs(3);
/// Retries after discovery found no interface, one second apart.
pub const MAX_DISCOVERY_RETRIES: u32 = 3;
const DISCOVERY_RETRY_DELAY: Duration = Duration::from_secs(1);
const SETTINGS_DEBOUNCE: Duration = Duration::from_millis(200);
const CONNECTIVITY_DEBOUNCE: Duration = Duration::from_millis(150);
const RECONFIGURE_DEBOUNCE: Duration = Duration::from_millis(120);
const STATS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ServerRole {
    generation: u64,
    server: Option<Arc<RtspServer>>,
    bindings: Vec<RtspBinding>,
    is_active: bool,
    heartbeat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ClientStatus {
    #[default]
    Idle,
    Starting,
    Active,
    Error,
}

#[derive(Default)]
struct ClientRole {
    generation: u64,
    client: Option<Arc<RtspClient>>,
    status: ClientStatus,
    bitrate: Option<u64>,
}

enum Role {
    Serve(ServerRole),
    Publish(ClientRole),
}

impl Role {
    fn for_mode(mode: StreamMode) -> Self {
        match mode {
            StreamMode::Serve => Role::Serve(ServerRole::default()),
            StreamMode::Publish => Role::Publish(ClientRole::default()),
        }
    }
}

/// Encoders and capture of the running stream. Dropping it stops them,
/// so an aborted worker does not leave them producing.
struct ActiveStream {
    video: Box<dyn VideoEncoder>,
    capture: Box<dyn CaptureSurface>,
    audio: Option<Box<dyn AudioEncoder>>,
    config: VideoConfig,
    display: DisplayMetrics,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.capture.stop();
        self.video.stop();
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
    }
}

fn pick<'a, T>(available: &'a [T], name: Option<&str>, name_of: impl Fn(&T) -> &str) -> Option<&'a T> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .and_then(|n| available.iter().find(|c| name_of(c).eq_ignore_ascii_case(n)))
        .or_else(|| available.first())
}

fn same_network_scope(a: &StreamSettings, b: &StreamSettings) -> bool {
    a.interface_filter == b.interface_filter
        && a.address_filter == b.address_filter
        && a.enable_ipv4 == b.enable_ipv4
        && a.enable_ipv6 == b.enable_ipv6
        && a.server_port == b.server_port
        && a.server_path == b.server_path
        && a.server_protocol == b.server_protocol
}

fn clamp_to(value: u32, start: u32, end: u32) -> u32 {
    value.max(start).min(end)
}

/// Owns every piece of controller state and processes one event at a time.
pub(crate) struct Worker {
    settings: StreamSettings,
    collaborators: Collaborators,
    queue: Arc<EventQueue>,
    state: watch::Sender<ViewState>,
    router: Arc<FrameRouter>,
    clock: MediaClock,
    display: DisplayMetrics,
    role: Role,
    /// Last generation handed to a transport.
    generation: u64,
    /// Identifies the current stream to encoder callbacks.
    stream: u64,
    active: Option<ActiveStream>,
    selected_video: Option<VideoCodecInfo>,
    selected_audio: Option<AudioCodecInfo>,
    last_video_params: Option<VideoParams>,
    last_audio_params: Option<AudioParams>,
    audio_capture_disabled: bool,
    current_error: Option<SessionError>,
    previous_error: Option<SessionError>,
    destroy_done: Option<oneshot::Sender<()>>,
    destroyed: bool,
}

impl Worker {
    pub(crate) fn new(
        settings: StreamSettings,
        collaborators: Collaborators,
        queue: Arc<EventQueue>,
        state: watch::Sender<ViewState>,
    ) -> Self {
        Self {
            role: Role::for_mode(settings.mode),
            display: collaborators.display,
            settings,
            collaborators,
            queue,
            state,
            router: Arc::new(FrameRouter::default()),
            clock: MediaClock::new(),
            generation: 0,
            stream: 0,
            active: None,
            selected_video: None,
            selected_audio: None,
            last_video_params: None,
            last_audio_params: None,
            audio_capture_disabled: false,
            current_error: None,
            previous_error: None,
            destroy_done: None,
            destroyed: false,
        }
    }

    pub(crate) async fn run(mut self) {
        while !self.destroyed {
            let event = self.queue.next().await;
            self.handle(event).await;
        }
        debug!("SessionController worker finished");
    }

    pub(crate) async fn handle(&mut self, event: Event) {
        debug!("SessionController: {}", event.name());
        if let Err(error) = self.process(event).await {
            self.fail(error).await;
        }
        if let Some(done) = self.destroy_done.take() {
            let _ = done.send(());
        }
        self.publish_state();
        self.notify_error();
    }

    async fn process(&mut self, event: Event) -> std::result::Result<(), SessionError> {
        match event {
            Event::InitState => self.init_state().await,
            Event::ChangeMode(mode) => {
                if mode == self.settings.mode {
                    debug!("ChangeMode: already {}", mode);
                    return Ok(());
                }
                info!("ChangeMode: {} -> {}", self.settings.mode, mode);
                self.stop_stream(true).await;
                self.settings.mode = mode;
                self.queue.push(Event::InitState);
                if mode == StreamMode::Serve {
                    self.discover("ModeChanged", Duration::ZERO);
                }
            }
            Event::SelectVideoCodec(name) => self.select_video(name.as_deref())?,
            Event::SelectAudioCodec(name) => self.select_audio(name.as_deref())?,
            Event::SettingsChanged(settings) => self.apply_settings(*settings),
            Event::ConnectivityChanged => {
                if self.settings.mode == StreamMode::Serve {
                    self.discover("ConnectivityChanged", CONNECTIVITY_DEBOUNCE);
                }
            }
            Event::RetryBindings => {
                if self.settings.mode != StreamMode::Serve {
                    debug!("RetryBindings: not serving, ignoring");
                } else if self.active.is_some() {
                    debug!("RetryBindings: streaming, ignoring");
                } else {
                    self.discover("RetryBindings", Duration::ZERO);
                }
            }
            Event::StartStream => self.start_stream()?,
            Event::StopStream(reason) => {
                info!("StopStream: {}", reason);
                self.stop_stream(false).await;
            }
            Event::RecoverError => {
                self.stop_stream(true).await;
                self.queue.remove_band(Band::Recover);
                self.queue.push(Event::InitState);
                if self.settings.mode == StreamMode::Serve {
                    self.discover("RecoverError", Duration::ZERO);
                }
            }
            Event::ConfigurationChanged(metrics) => self.configuration_changed(metrics),
            Event::ContentResized { width, height } => {
                if self.active.is_none() {
                    debug!("ContentResized: not streaming, ignoring");
                } else if width == 0 || height == 0 {
                    warn!("ContentResized: invalid size {}x{}, ignoring", width, height);
                } else {
                    self.schedule_video_reconfigure(width, height, "ContentResized");
                }
            }
            Event::ApplyVideoReconfigure { width, height } => self.apply_video_reconfigure(width, height)?,
            Event::Destroy(done) => {
                self.stop_stream(true).await;
                self.collaborators.notifier.hide_error();
                self.destroy_done = Some(done);
                self.destroyed = true;
            }
            Event::VideoParams { stream, params } => {
                if self.is_current_stream(stream) {
                    self.last_video_params = Some(params);
                }
            }
            Event::AudioParams { stream, params } => {
                if self.is_current_stream(stream) && !self.audio_capture_disabled {
                    self.last_audio_params = Some(params);
                }
            }
            Event::EncoderError { stream, message } => {
                if self.is_current_stream(stream) {
                    return Err(SessionError::Unknown(message));
                }
            }
            Event::AudioCaptureError { stream, cause } => {
                if self.is_current_stream(stream) {
                    self.disable_audio(&cause);
                }
            }
            Event::Client { generation, event } => self.on_client_event(generation, event).await,
            Event::Server { generation, event } => self.on_server_event(generation, event).await,
            Event::DiscoverAddress { reason, attempt } => self.discover_address(reason, attempt).await?,
            Event::StatsHeartbeat { generation } => {
                if let Role::Serve(role) = &self.role {
                    if role.heartbeat && role.generation == generation {
                        self.queue.push_delayed(Event::StatsHeartbeat { generation }, STATS_INTERVAL);
                    }
                }
            }
        }
        Ok(())
    }

    /// Precondition failures only surface; anything else also tears the stream down.
    async fn fail(&mut self, error: SessionError) {
        if let SessionError::Setup(_) = error {
            warn!("SessionController: {}", error);
            self.current_error = Some(error);
            return;
        }
        error!("SessionController: {}", error);
        self.stop_stream(true).await;
        self.set_error(error);
    }

    fn set_error(&mut self, error: SessionError) {
        self.current_error = Some(error);
        match &mut self.role {
            Role::Serve(role) => role.is_active = false,
            Role::Publish(role) => role.status = ClientStatus::Error,
        }
    }

    fn is_current_stream(&self, stream: u64) -> bool {
        self.active.is_some() && stream == self.stream
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn transport_sink(&self, serve: bool) -> EventSink {
        let queue = self.queue.clone();
        if serve {
            Arc::new(move |generation, event| {
                queue.push(Event::Server { generation, event });
            })
        } else {
            Arc::new(move |generation, event| {
                queue.push(Event::Client { generation, event });
            })
        }
    }

    fn discover(&self, reason: &str, delay: Duration) {
        self.queue.push_delayed(
            Event::DiscoverAddress {
                reason: reason.to_string(),
                attempt: 0,
            },
            delay,
        );
    }

    async fn init_state(&mut self) {
        self.stop_stream(true).await;
        self.role = Role::for_mode(self.settings.mode);
        self.current_error = None;
        self.audio_capture_disabled = false;
    }

    fn select_video(&mut self, name: Option<&str>) -> std::result::Result<(), SessionError> {
        if self.active.is_some() {
            return Err(SessionError::Setup("Cannot change codec while streaming".into()));
        }
        let available = self.collaborators.catalog.video_encoders();
        let selected = pick(&available, name, |c| c.name.as_str())
            .cloned()
            .ok_or_else(|| SessionError::Setup("No suitable video encoders available".into()))?;
        info!("Video encoder: {} ({})", selected.name, selected.codec);
        self.selected_video = Some(selected);
        Ok(())
    }

    fn select_audio(&mut self, name: Option<&str>) -> std::result::Result<(), SessionError> {
        if self.active.is_some() {
            return Err(SessionError::Setup("Cannot change codec while streaming".into()));
        }
        let available = self.collaborators.catalog.audio_encoders();
        self.selected_audio = pick(&available, name, |c| c.name.as_str()).cloned();
        match &self.selected_audio {
            Some(selected) => info!("Audio encoder: {} ({:?})", selected.name, selected.codec),
            None if self.settings.enable_audio => {
                return Err(SessionError::Setup("No suitable audio encoders available".into()))
            }
            None => debug!("No audio encoder available"),
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: StreamSettings) {
        let mode = settings.mode;
        let rebind = !same_network_scope(&self.settings, &settings);
        let current = self.settings.mode;
        self.settings = StreamSettings { mode: current, ..settings };
        if mode != current {
            self.queue.push(Event::ChangeMode(mode));
        } else if rebind && current == StreamMode::Serve {
            self.discover("SettingsChanged", SETTINGS_DEBOUNCE);
        }
    }

    fn video_config(&self, caps: &VideoCapabilities, width: u32, height: u32) -> VideoConfig {
        let factor = self.settings.video_resize_factor as f32 / 100.0;
        let (_, width, height) = adjust_resize_factor(caps, width, height, factor);
        VideoConfig {
            width,
            height,
            fps: clamp_to(self.settings.video_fps, *caps.frame_rates.start(), *caps.frame_rates.end()),
            bitrate: clamp_to(self.settings.video_bitrate, *caps.bitrates.start(), *caps.bitrates.end()),
        }
    }

    fn start_stream(&mut self) -> std::result::Result<(), SessionError> {
        if self.active.is_some() {
            debug!("StartStream: already streaming");
            return Ok(());
        }
        let video_info = self
            .selected_video
            .clone()
            .ok_or_else(|| SessionError::Setup("No video encoder selected".into()))?;
        let audio_info = match (self.settings.enable_audio, &self.selected_audio) {
            (false, _) => None,
            (true, Some(info)) => Some(info.clone()),
            (true, None) => return Err(SessionError::Setup("No audio encoder selected".into())),
        };

        let serve_target = match &self.role {
            Role::Serve(role) => match (&role.server, role.is_active) {
                (Some(server), true) => Some(Route::Server(server.clone())),
                _ => return Err(SessionError::Setup("RTSP server is not ready".into())),
            },
            Role::Publish(_) => None,
        };
        let target = match serve_target {
            Some(target) => target,
            None => {
                let url = RtspUrl::parse(&self.settings.server_url)
                    .map_err(|e| SessionError::Unknown(format!("Invalid server address: {}", e)))?;
                let generation = self.next_generation();
                let options = ClientOptions::new()
                    .with_policy(self.settings.client_protocol)
                    .with_audio(audio_info.is_some())
                    .with_app(&self.settings.app_name, &self.settings.app_version);
                let client = Arc::new(RtspClient::new(url, options, generation, self.transport_sink(false)));
                if let Role::Publish(role) = &mut self.role {
                    role.generation = generation;
                    role.client = Some(client.clone());
                }
                Route::Client(client)
            }
        };

        self.clock.reset();
        self.stream += 1;
        self.router.set(self.stream, target);
        let sink = MediaSink::new(
            self.router.clone(),
            self.queue.clone(),
            self.stream,
            self.clock.clone(),
            video_info.codec,
            audio_info.as_ref().map(|a| a.codec),
        );

        let config = self.video_config(&video_info.capabilities, self.display.width, self.display.height);
        let mut active = self.open_video(&video_info, sink.clone(), config)?;
        if let Some(info) = &audio_info {
            match self.open_audio(info, sink) {
                Ok(audio) => active.audio = Some(audio),
                Err(e) => {
                    warn!("StartStream: audio unavailable, streaming video only: {}", e);
                    self.audio_capture_disabled = true;
                }
            }
        }
        info!(
            "Stream started: {}x{} @{}fps {}bps",
            config.width, config.height, config.fps, config.bitrate
        );
        self.active = Some(active);

        match &mut self.role {
            Role::Serve(role) => {
                role.heartbeat = true;
                self.queue.push_delayed(
                    Event::StatsHeartbeat {
                        generation: role.generation,
                    },
                    STATS_INTERVAL,
                );
            }
            Role::Publish(role) => {
                if let Some(client) = &role.client {
                    client.connect()?;
                }
                role.status = ClientStatus::Starting;
            }
        }
        self.collaborators.notifier.set_foreground(true);
        Ok(())
    }

    fn open_video(&self, info: &VideoCodecInfo, sink: MediaSink, config: VideoConfig) -> Result<ActiveStream> {
        let media = &self.collaborators.media;
        let mut video = media.video_encoder(info, sink)?;
        video.prepare(&config)?;
        let mut capture = match media.start_capture(config.width, config.height, self.display.density_dpi) {
            Ok(capture) => capture,
            Err(e) => {
                video.stop();
                return Err(e);
            }
        };
        if let Err(e) = video.start() {
            capture.stop();
            video.stop();
            return Err(e);
        }
        Ok(ActiveStream {
            video,
            capture,
            audio: None,
            config,
            display: self.display,
        })
    }

    fn open_audio(&self, info: &AudioCodecInfo, sink: MediaSink) -> Result<Box<dyn AudioEncoder>> {
        let mut audio = self.collaborators.media.audio_encoder(info, sink)?;
        audio.start()?;
        Ok(audio)
    }

    fn disable_audio(&mut self, cause: &str) {
        if self.audio_capture_disabled {
            return;
        }
        warn!("Audio capture failed, continuing without audio: {}", cause);
        self.audio_capture_disabled = true;
        self.last_audio_params = None;
        if let Some(mut audio) = self.active.as_mut().and_then(|a| a.audio.take()) {
            audio.stop();
        }
        if let Role::Serve(ServerRole { server: Some(server), .. }) = &self.role {
            server.set_audio_params(None);
        }
    }

    fn configuration_changed(&mut self, metrics: DisplayMetrics) {
        self.display = metrics;
        let active = match &mut self.active {
            Some(active) => active,
            None => {
                debug!("ConfigurationChanged: not streaming, ignoring");
                return;
            }
        };
        if self.settings.stop_on_configuration_change {
            self.queue.push(Event::StopStream("ConfigurationChanged".into()));
            return;
        }
        if active.display == metrics {
            debug!("ConfigurationChanged: nothing relevant changed");
            return;
        }
        active.display = metrics;
        self.schedule_video_reconfigure(metrics.width, metrics.height, "ConfigurationChanged");
    }

    fn reconfigured_size(&self, width: u32, height: u32) -> Option<(VideoConfig, VideoConfig)> {
        let active = self.active.as_ref()?;
        let info = self.selected_video.as_ref()?;
        Some((self.video_config(&info.capabilities, width, height), active.config))
    }

    fn schedule_video_reconfigure(&mut self, width: u32, height: u32, source: &str) {
        let (next, current) = match self.reconfigured_size(width, height) {
            Some(sizes) => sizes,
            None => return,
        };
        if (next.width, next.height) == (current.width, current.height) {
            debug!("{}: no change relevant for streaming", source);
            return;
        }
        debug!("{}: reconfigure to {}x{} scheduled", source, next.width, next.height);
        self.queue
            .push_delayed(Event::ApplyVideoReconfigure { width, height }, RECONFIGURE_DEBOUNCE);
    }

    fn apply_video_reconfigure(&mut self, width: u32, height: u32) -> Result<()> {
        let (next, current) = match self.reconfigured_size(width, height) {
            Some(sizes) => sizes,
            None => return Ok(()),
        };
        if (next.width, next.height) == (current.width, current.height) {
            return Ok(());
        }
        let active = match &mut self.active {
            Some(active) => active,
            None => return Ok(()),
        };
        info!("Reconfigure video: {}x{} -> {}x{}", current.width, current.height, next.width, next.height);
        active.video.stop();
        active.video.prepare(&next)?;
        active.capture.resize(next.width, next.height, active.display.density_dpi)?;
        active.video.start()?;
        active.config = next;
        Ok(())
    }

    async fn stop_client(&mut self) {
        if let Role::Publish(role) = &mut self.role {
            self.generation += 1;
            role.generation = self.generation;
            role.status = ClientStatus::Idle;
            role.bitrate = None;
            if let Some(client) = role.client.take() {
                client.disconnect().await;
            }
        }
    }

    /// Full stop drops the listener; otherwise only its players and params go.
    async fn stop_server(&mut self, stop_listener: bool) {
        if let Role::Serve(role) = &mut self.role {
            role.heartbeat = false;
            if stop_listener {
                self.generation += 1;
                role.generation = self.generation;
                role.is_active = false;
                role.bindings.clear();
                if let Some(server) = role.server.take() {
                    server.stop().await;
                }
            } else if let Some(server) = role.server.clone() {
                server.disconnect_all().await;
                server.clear_params();
            }
        }
    }

    /// Encoders go first; transport teardown may wait on the network.
    async fn stop_stream(&mut self, stop_server: bool) {
        self.queue.remove_band(Band::VideoReconfigure);
        self.audio_capture_disabled = false;
        self.router.clear();
        if let Some(active) = self.active.take() {
            drop(active);
            self.collaborators.notifier.set_foreground(false);
            info!("Stream stopped");
        }
        self.stop_client().await;
        self.stop_server(stop_server).await;
        self.last_video_params = None;
        self.last_audio_params = None;
    }

    async fn on_client_event(&mut self, generation: u64, event: TransportEvent) {
        match &self.role {
            Role::Publish(role) if role.generation == generation => {}
            _ => {
                debug!("Client event from generation {}: stale, ignoring", generation);
                return;
            }
        }
        match event {
            TransportEvent::ConnectedOk => {
                if let Role::Publish(role) = &mut self.role {
                    role.status = ClientStatus::Active;
                }
                self.current_error = None;
            }
            TransportEvent::Disconnected => self.stop_stream(true).await,
            TransportEvent::BitrateSample(bitrate) => {
                if let Role::Publish(role) = &mut self.role {
                    role.bitrate = Some(bitrate);
                }
            }
            TransportEvent::Error(error) => {
                self.stop_stream(true).await;
                self.set_error(error);
            }
            other => trace!("Client event ignored: {:?}", other),
        }
    }

    async fn on_server_event(&mut self, generation: u64, event: TransportEvent) {
        match &self.role {
            Role::Serve(role) if role.generation == generation => {}
            _ => {
                debug!("Server event from generation {}: stale, ignoring", generation);
                return;
            }
        }
        match event {
            TransportEvent::ServerStarted => {
                if let Role::Serve(role) = &mut self.role {
                    role.is_active = true;
                }
                self.current_error = None;
            }
            TransportEvent::Error(error) => {
                self.stop_stream(true).await;
                self.set_error(error);
            }
            TransportEvent::ServerStopped => self.stop_server(true).await,
            // the state rebuild reads fresh stats
            TransportEvent::ClientsChanged(_) => {}
            other => trace!("Server event ignored: {:?}", other),
        }
    }

    async fn discover_address(&mut self, reason: String, attempt: u32) -> Result<()> {
        if self.settings.mode != StreamMode::Serve {
            debug!("DiscoverAddress[{}]: not serving, ignoring", reason);
            return Ok(());
        }
        self.stop_server(true).await;

        let filter = DiscoveryFilter {
            interface_filter: self.settings.interface_filter,
            address_filter: self.settings.address_filter,
            enable_ipv4: self.settings.enable_ipv4,
            enable_ipv6: self.settings.enable_ipv6,
        };
        let discovery = self.collaborators.discovery.clone();
        let interfaces = discovery.interfaces(&filter).await?;
        if interfaces.is_empty() {
            if attempt < MAX_DISCOVERY_RETRIES {
                warn!("DiscoverAddress[{}]: no address, retry {}", reason, attempt + 1);
                self.queue.push_delayed(
                    Event::DiscoverAddress {
                        reason,
                        attempt: attempt + 1,
                    },
                    DISCOVERY_RETRY_DELAY,
                );
            } else {
                error!("DiscoverAddress[{}]: no address after {} retries", reason, attempt);
                self.stop_stream(true).await;
                self.current_error = Some(SessionError::AddressNotFound);
            }
            return Ok(());
        }
        if self.current_error == Some(SessionError::AddressNotFound) {
            self.current_error = None;
        }

        let generation = self.next_generation();
        let options = ServerOptions::new()
            .with_port(self.settings.server_port)
            .with_path(&self.settings.server_path)
            .with_app(&self.settings.app_name, &self.settings.app_version)
            .with_policy(self.settings.server_protocol)
            .with_clock(self.clock.clone());
        let server = Arc::new(RtspServer::new(options, generation, self.transport_sink(true)));
        let addresses: Vec<IpAddr> = interfaces.iter().map(|i| i.address).collect();
        info!("DiscoverAddress[{}]: starting on {} interfaces", reason, addresses.len());
        server.start(&addresses).await;

        let bound = server.local_addrs();
        let bindings = interfaces
            .iter()
            .filter_map(|i| {
                bound
                    .iter()
                    .find(|a| a.ip() == i.address)
                    .map(|a| RtspBinding::new(&i.label, a.ip(), a.port(), &self.settings.server_path))
            })
            .collect();

        if let Some(params) = &self.last_video_params {
            server.set_video_params(params.clone());
        }
        server.set_audio_params(self.last_audio_params);
        let streaming = match &mut self.active {
            Some(active) => {
                active.video.request_key_frame();
                true
            }
            None => false,
        };
        if streaming {
            self.router.set(self.stream, Route::Server(server.clone()));
            self.queue
                .push_delayed(Event::StatsHeartbeat { generation }, STATS_INTERVAL);
        }
        if let Role::Serve(role) = &mut self.role {
            role.generation = generation;
            role.server = Some(server);
            role.bindings = bindings;
            role.heartbeat = streaming;
        }
        Ok(())
    }

    fn is_publish_error(&self, error: &SessionError) -> bool {
        self.settings.mode == StreamMode::Publish && error.is_client_error()
    }

    fn build_state(&self) -> ViewState {
        let blocking_error = self
            .current_error
            .as_ref()
            .map_or(false, |e| !self.is_publish_error(e));
        let (status, ready, connection_stats, bitrate) = match &self.role {
            Role::Serve(role) => {
                let status = match &self.current_error {
                    Some(error) => SessionStatus::Error(error.clone()),
                    None if role.is_active => SessionStatus::Active(role.bindings.clone()),
                    None if role.server.is_some() => SessionStatus::Starting(role.bindings.clone()),
                    None => SessionStatus::Idle,
                };
                let stats = role.server.as_ref().map(|s| s.client_stats()).unwrap_or_default();
                (status, role.is_active, stats, None)
            }
            Role::Publish(role) => {
                let status = match (&self.current_error, role.status) {
                    (Some(error), _) => SessionStatus::Error(error.clone()),
                    (None, ClientStatus::Idle) => SessionStatus::Idle,
                    (None, ClientStatus::Starting) => SessionStatus::Connecting,
                    (None, ClientStatus::Active) => SessionStatus::Active(Vec::new()),
                    (None, ClientStatus::Error) => SessionStatus::Error(SessionError::Unknown("Client error".into())),
                };
                let ready = self.selected_video.is_some() && (!self.settings.enable_audio || self.selected_audio.is_some());
                (status, ready, Vec::new(), role.bitrate)
            }
        };
        ViewState {
            is_busy: self.queue.is_destroy_pending() || blocking_error || !ready,
            is_streaming: self.active.is_some(),
            mode: self.settings.mode,
            status,
            selected_video: self.selected_video.clone(),
            selected_audio: self.selected_audio.clone(),
            connection_stats,
            bitrate,
            error: self.current_error.clone(),
        }
    }

    fn publish_state(&self) {
        let next = self.build_state();
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn notify_error(&mut self) {
        if self.previous_error == self.current_error {
            return;
        }
        self.previous_error = self.current_error.clone();
        match &self.current_error {
            Some(error) if !self.is_publish_error(error) => self.collaborators.notifier.show_error(error),
            _ => self.collaborators.notifier.hide_error(),
        }
    }
}

/// Drives streaming for the host: takes [`Command`]s from any thread and
/// publishes a [`ViewState`] after every processed event.
///
/// All state lives in one worker task; encoders and transports talk to it
/// only through its queue.
pub struct SessionController {
    queue: Arc<EventQueue>,
    state: watch::Receiver<ViewState>,
    worker: Mutex<Option<Worker>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(settings: StreamSettings, collaborators: Collaborators) -> Self {
        let queue = Arc::new(EventQueue::new());
        let (tx, rx) = watch::channel(ViewState::new(settings.mode));
        let worker = Worker::new(settings, collaborators, queue.clone(), tx);
        Self {
            queue,
            state: rx,
            worker: Mutex::new(Some(worker)),
            task: Mutex::new(None),
        }
    }

    /// Spawns the worker on the current runtime, picks the default
    /// encoders and, when serving, discovers addresses.
    pub fn start(&self) {
        let worker = match self.worker.lock().take() {
            Some(worker) => worker,
            None => {
                warn!("SessionController already started");
                return;
            }
        };
        let serve = worker.settings.mode == StreamMode::Serve;
        self.queue.push(Event::InitState);
        self.queue.push(Event::SelectVideoCodec(None));
        self.queue.push(Event::SelectAudioCodec(None));
        if serve {
            worker.discover("Start", Duration::ZERO);
        }
        *self.task.lock() = Some(tokio::spawn(worker.run()));
    }

    /// Queues a command. `false` once a destroy is pending.
    pub fn send_command(&self, command: Command) -> bool {
        self.queue.push(command.into())
    }

    pub fn observe_state(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Tears everything down, waiting at most [`DESTROY_TIMEOUT`] before
    /// aborting the worker.
    pub async fn destroy(&self) {
        let (tx, rx) = oneshot::channel();
        if !self.queue.push(Event::Destroy(tx)) {
            debug!("SessionController destroy already pending");
            return;
        }
        let task = self.task.lock().take();
        let mut task = match task {
            Some(task) => task,
            None => return,
        };
        match time::timeout(DESTROY_TIMEOUT, rx).await {
            Ok(_) => {
                if time::timeout(DESTROY_TIMEOUT, &mut task).await.is_err() {
                    task.abort();
                }
            }
            Err(_) => {
                warn!("SessionController destroy timed out, aborting worker");
                task.abort();
            }
        }
        debug!("SessionController destroyed");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

