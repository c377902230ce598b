use async_trait::async_trait;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::{get_ntp_timestamp, goodbye, sender_report};
use crate::av::MediaKind;
use crate::format::rtp::{RtpFrame, RTP_HEADER_LENGTH};

/// Minimum spacing between two Sender Reports of one track.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(2);
const TICK: Duration = Duration::from_secs(1);

/// Where RTCP packets go: the RTCP socket of a UDP track or the odd
/// interleaved channel of a TCP session.
#[async_trait]
pub trait RtcpSink: Send + Sync {
    async fn send_rtcp(&self, kind: MediaKind, packet: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Default, Clone)]
struct TrackState {
    ssrc: u32,
    packet_count: u32,
    octet_count: u32,
    rtp_timestamp: u32,
    last_report: Option<Instant>,
    last_packet: Option<Instant>,
}

impl TrackState {
    fn report(&mut self, now: Instant) -> [u8; 28] {
        self.last_report = Some(now);
        sender_report(
            self.ssrc,
            get_ntp_timestamp(),
            self.rtp_timestamp,
            self.packet_count,
            self.octet_count,
        )
    }

    /// Due when the interval has passed and the track sent something recently.
    fn is_due(&self, now: Instant, interval: Duration) -> bool {
        let active = match self.last_packet {
            Some(at) => now.duration_since(at) <= interval * 2,
            None => false,
        };
        let elapsed = match self.last_report {
            Some(at) => now.duration_since(at) >= interval,
            None => true,
        };
        active && elapsed
    }
}

struct Inner {
    tracks: Mutex<[TrackState; 2]>,
    sink: Arc<dyn RtcpSink>,
    audio_enabled: bool,
    interval: Duration,
    closed: AtomicBool,
}

impl Inner {
    async fn send(&self, kind: MediaKind, packet: &[u8]) {
        if let Err(e) = self.sink.send_rtcp(kind, packet).await {
            warn!("RTCP {:?} send failed: {}", kind, e);
        }
    }

    async fn tick(&self) {
        let now = Instant::now();
        let due: Vec<(MediaKind, [u8; 28])> = {
            let mut tracks = self.tracks.lock();
            [MediaKind::Video, MediaKind::Audio]
                .into_iter()
                .filter_map(|kind| {
                    let track = &mut tracks[kind.track_id() as usize];
                    track.is_due(now, self.interval).then(|| (kind, track.report(now)))
                })
                .collect()
        };
        for (kind, packet) in due {
            trace!("RTCP SR {:?}", kind);
            self.send(kind, &packet).await;
        }
    }
}

/// Emits Sender Reports and BYEs for the tracks of one session.
///
/// Counters are updated from the send loop through [`RtcpReporter::update`];
/// a background ticker sends periodic reports. All send failures are logged
/// and swallowed.
pub struct RtcpReporter {
    inner: Arc<Inner>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RtcpReporter {
    pub fn new(sink: Arc<dyn RtcpSink>, audio_enabled: bool) -> Self {
        Self::with_interval(sink, audio_enabled, REPORT_INTERVAL)
    }

    pub fn with_interval(sink: Arc<dyn RtcpSink>, audio_enabled: bool, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tracks: Mutex::new([TrackState::default(), TrackState::default()]),
                sink,
                audio_enabled,
                interval,
                closed: AtomicBool::new(false),
            }),
            ticker: Mutex::new(None),
        }
    }

    /// Starts the periodic ticker. Must be called from within a runtime.
    pub fn start(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() || self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        *ticker = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                inner.tick().await;
            }
        }));
    }

    /// Assigns the SSRC of a track and restarts its counters.
    pub fn set_ssrc(&self, kind: MediaKind, ssrc: u32) {
        let mut tracks = self.inner.tracks.lock();
        tracks[kind.track_id() as usize] = TrackState {
            ssrc,
            ..TrackState::default()
        };
    }

    /// Accounts one sent RTP packet. The first packet of a track triggers an
    /// immediate report so players get the NTP/RTP mapping early.
    pub async fn update(&self, frame: &RtpFrame) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let first = {
            let mut tracks = self.inner.tracks.lock();
            let track = &mut tracks[frame.kind.track_id() as usize];
            let now = Instant::now();
            track.packet_count = track.packet_count.wrapping_add(1);
            let payload = frame.len().saturating_sub(RTP_HEADER_LENGTH) as u32;
            track.octet_count = track.octet_count.wrapping_add(payload);
            track.rtp_timestamp = frame.timestamp;
            track.last_packet = Some(now);
            track.last_report.is_none().then(|| track.report(now))
        };
        if let Some(packet) = first {
            debug!("RTCP first SR {:?}", frame.kind);
            self.inner.send(frame.kind, &packet).await;
        }
    }

    /// Stops the ticker and says goodbye: video always, audio when enabled.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        let (video, audio) = {
            let tracks = self.inner.tracks.lock();
            (tracks[0].ssrc, tracks[1].ssrc)
        };
        self.inner.send(MediaKind::Video, &goodbye(video)).await;
        if self.inner.audio_enabled {
            self.inner.send(MediaKind::Audio, &goodbye(audio)).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Drop for RtcpReporter {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}
