//! Serve side: a listener per bound address and one task per player.

mod connection;
mod stats;

pub use stats::{ClientConnectionStats, MediaStats};

use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, sleep};

use self::connection::{Peer, ServeContext, SharedFrame};
use super::{binding_url, EventSink, ProtocolPolicy, ServerMessages, TransportEvent};
use crate::av::{AudioParams, MediaClock, MediaFrame, VideoParams};
use crate::error::SessionError;

/// How long `stop` waits for connections to say goodbye before aborting them.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);
/// Back-off after a failed `accept`.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Options of the serve listener.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub port: u16,
    /// Stream path without the leading `/`.
    pub path: String,
    pub app_name: String,
    pub app_version: String,
    /// Media transports players may choose in `SETUP`.
    pub policy: ProtocolPolicy,
    /// Clock the producer stamps frames with; `PLAY` reports RTP times from it.
    pub clock: MediaClock,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 8554,
            path: "screen".to_string(),
            app_name: env!("CARGO_PKG_NAME").to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            policy: ProtocolPolicy::Auto,
            clock: MediaClock::new(),
        }
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.trim_start_matches('/').to_string();
        self
    }

    pub fn with_app(mut self, name: &str, version: &str) -> Self {
        self.app_name = name.to_string();
        self.app_version = version.to_string();
        self
    }

    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: MediaClock) -> Self {
        self.clock = clock;
        self
    }
}

struct Inner {
    ctx: Arc<ServeContext>,
    generation: u64,
    events: EventSink,
    peers: Mutex<Vec<Arc<Peer>>>,
    connections: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

/// Accepts players on every bound address and streams to each of them.
///
/// Frames handed to [`RtspServer::on_frame`] are copied once and the
/// producer's buffer is released before the call returns.
pub struct RtspServer {
    inner: Arc<Inner>,
    options: ServerOptions,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    bound: RwLock<Vec<SocketAddr>>,
    /// Bumped to close every player connection; present while started.
    shutdown: Mutex<Option<watch::Sender<u64>>>,
}

impl RtspServer {
    pub fn new(options: ServerOptions, generation: u64, events: EventSink) -> Self {
        let (video, _) = watch::channel(None);
        let ctx = ServeContext {
            app_name: options.app_name.clone(),
            messages: ServerMessages::new(&options.app_name, &options.app_version),
            clock: options.clock.clone(),
            policy: options.policy,
            video,
            audio: RwLock::new(None),
        };
        Self {
            inner: Arc::new(Inner {
                ctx: Arc::new(ctx),
                generation,
                events,
                peers: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            options,
            listeners: Mutex::new(Vec::new()),
            bound: RwLock::new(Vec::new()),
            shutdown: Mutex::new(None),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    /// Addresses the listener is bound to, with the actual ports.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.bound.read().clone()
    }

    /// Player URLs for the bound addresses.
    pub fn urls(&self) -> Vec<String> {
        self.bound
            .read()
            .iter()
            .map(|a| binding_url(a.ip(), a.port(), &self.options.path))
            .collect()
    }

    pub fn set_video_params(&self, params: VideoParams) {
        debug!("RtspServer set_video_params: {}", params.codec);
        self.inner.ctx.video.send_replace(Some(params));
    }

    pub fn set_audio_params(&self, params: Option<AudioParams>) {
        *self.inner.ctx.audio.write() = params;
    }

    /// Binds `port` on every address. Emits `ServerStarted` when at least one
    /// bind succeeded and an error otherwise. Returns the number of listeners.
    pub async fn start(&self, addresses: &[IpAddr]) -> usize {
        if self.is_running() {
            warn!("RtspServer already started");
            return self.bound.read().len();
        }
        let (tx, rx) = watch::channel(0u64);
        let mut bound = Vec::new();
        let mut listeners = Vec::new();
        for address in addresses {
            match TcpListener::bind(SocketAddr::new(*address, self.options.port)).await {
                Ok(listener) => {
                    let local = match listener.local_addr() {
                        Ok(local) => local,
                        Err(e) => {
                            warn!("RtspServer: no local address for {}: {}", address, e);
                            continue;
                        }
                    };
                    info!("RtspServer listening on {}", local);
                    bound.push(local);
                    let inner = self.inner.clone();
                    listeners.push(tokio::spawn(inner.accept_loop(listener, rx.clone())));
                }
                Err(e) => warn!("RtspServer: cannot bind {}:{}: {}", address, self.options.port, e),
            }
        }

        if bound.is_empty() {
            self.inner.emit(TransportEvent::Error(SessionError::Connection(format!(
                "Cannot bind port {}",
                self.options.port
            ))));
            return 0;
        }
        let count = bound.len();
        *self.bound.write() = bound;
        *self.listeners.lock() = listeners;
        *self.shutdown.lock() = Some(tx);
        self.inner.emit(TransportEvent::ServerStarted);
        count
    }

    /// Closes the listeners and every player connection, then emits
    /// `ServerStopped`. A server that was never started stays silent.
    pub async fn stop(&self) {
        let shutdown = match self.shutdown.lock().take() {
            Some(shutdown) => shutdown,
            None => return,
        };
        debug!("RtspServer stop");
        shutdown.send_modify(|epoch| *epoch += 1);
        for listener in self.listeners.lock().drain(..) {
            listener.abort();
        }
        self.inner.join_connections().await;
        self.bound.write().clear();
        info!("RtspServer stopped");
        self.inner.emit(TransportEvent::ServerStopped);
    }

    /// Drops every player but keeps listening.
    pub async fn disconnect_all(&self) {
        match self.shutdown.lock().as_ref() {
            Some(shutdown) => shutdown.send_modify(|epoch| *epoch += 1),
            None => return,
        }
        debug!("RtspServer disconnect_all");
        self.inner.join_connections().await;
    }

    /// Forgets the stream parameters; `DESCRIBE` answers 503 until new ones arrive.
    pub fn clear_params(&self) {
        self.inner.ctx.video.send_replace(None);
        *self.inner.ctx.audio.write() = None;
    }

    /// Fans a frame out to every player. Never blocks.
    pub fn on_frame(&self, frame: MediaFrame) {
        let peers = self.inner.peers.lock().clone();
        if peers.is_empty() {
            frame.release();
            return;
        }
        let frame = SharedFrame::from_frame(frame);
        for peer in &peers {
            peer.offer(&frame);
        }
    }

    pub fn client_count(&self) -> usize {
        self.inner.peers.lock().len()
    }

    pub fn client_stats(&self) -> Vec<ClientConnectionStats> {
        self.inner.client_stats()
    }
}

impl Drop for RtspServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.get_mut().take() {
            shutdown.send_modify(|epoch| *epoch += 1);
        }
        for listener in self.listeners.get_mut().drain(..) {
            listener.abort();
        }
        for connection in self.inner.connections.lock().drain(..) {
            connection.abort();
        }
    }
}

impl Inner {
    fn emit(&self, event: TransportEvent) {
        (self.events)(self.generation, event);
    }

    fn client_stats(&self) -> Vec<ClientConnectionStats> {
        self.peers.lock().iter().map(|p| p.stats.snapshot()).collect()
    }

    fn clients_changed(&self) {
        self.emit(TransportEvent::ClientsChanged(self.client_stats()));
    }

    async fn join_connections(&self) {
        let mut connections = std::mem::take(&mut *self.connections.lock());
        if time::timeout(STOP_TIMEOUT, join_all(connections.iter_mut())).await.is_err() {
            warn!("RtspServer: aborting {} connections", connections.len());
            for connection in &connections {
                connection.abort();
            }
        }
        self.peers.lock().clear();
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, shutdown: watch::Receiver<u64>) {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    // only later bumps close this connection
                    let mut shutdown = shutdown.clone();
                    shutdown.borrow_and_update();
                    self.spawn_connection(stream, remote, shutdown)
                }
                Err(e) => {
                    warn!("RtspServer accept failed: {}", e);
                    sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr, shutdown: watch::Receiver<u64>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = Arc::new(Peer::new(id, remote));
        info!("RtspServer client connected: {} (session {})", remote, peer.session_id);
        self.peers.lock().push(peer.clone());
        self.clients_changed();

        let inner = self.clone();
        let task = tokio::spawn(async move {
            connection::serve(inner.ctx.clone(), peer, stream, shutdown).await;
            inner.peers.lock().retain(|p| p.id != id);
            info!("RtspServer client disconnected: {}", remote);
            inner.clients_changed();
        });
        let mut connections = self.connections.lock();
        connections.retain(|c| !c.is_finished());
        connections.push(task);
    }
}

#[cfg(test)]
mod tests;
