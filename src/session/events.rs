use log::{trace, warn};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::{self, Instant};

use super::collaborators::DisplayMetrics;
use super::state::StreamMode;
use crate::av::{AudioParams, VideoParams};
use crate::config::StreamSettings;
use crate::format::rtsp::TransportEvent;

/// Coalescing group of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// Never removed once queued.
    None,
    /// Removed only by `Destroy`.
    Destroy,
    Recover,
    Restart,
    VideoReconfigure,
}

/// What the host asks of the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ChangeMode(StreamMode),
    /// `None` picks the first available encoder.
    SelectVideoCodec(Option<String>),
    SelectAudioCodec(Option<String>),
    /// New settings snapshot; network scope changes rebind the listener.
    SettingsChanged(StreamSettings),
    /// Re-enumerate interfaces and restart the listener (serve only).
    DiscoverAddresses(String),
    /// Network connectivity changed.
    ConnectivityChanged,
    RetryBindings,
    StartStream,
    StopStream(String),
    RecoverError,
    ConfigurationChanged(DisplayMetrics),
    ContentResized { width: u32, height: u32 },
}

#[derive(Debug)]
pub(crate) enum Event {
    InitState,
    ChangeMode(StreamMode),
    SelectVideoCodec(Option<String>),
    SelectAudioCodec(Option<String>),
    SettingsChanged(Box<StreamSettings>),
    ConnectivityChanged,
    RetryBindings,
    StartStream,
    StopStream(String),
    RecoverError,
    ConfigurationChanged(DisplayMetrics),
    ContentResized { width: u32, height: u32 },
    ApplyVideoReconfigure { width: u32, height: u32 },
    Destroy(oneshot::Sender<()>),

    /// Encoder callbacks, tagged with the stream they belong to.
    VideoParams { stream: u64, params: VideoParams },
    AudioParams { stream: u64, params: AudioParams },
    EncoderError { stream: u64, message: String },
    AudioCaptureError { stream: u64, cause: String },

    /// Publish client completions.
    Client { generation: u64, event: TransportEvent },
    /// Serve listener completions.
    Server { generation: u64, event: TransportEvent },
    DiscoverAddress { reason: String, attempt: u32 },
    StatsHeartbeat { generation: u64 },
}

impl From<Command> for Event {
    fn from(command: Command) -> Self {
        match command {
            Command::ChangeMode(mode) => Event::ChangeMode(mode),
            Command::SelectVideoCodec(name) => Event::SelectVideoCodec(name),
            Command::SelectAudioCodec(name) => Event::SelectAudioCodec(name),
            Command::SettingsChanged(settings) => Event::SettingsChanged(Box::new(settings)),
            Command::DiscoverAddresses(reason) => Event::DiscoverAddress { reason, attempt: 0 },
            Command::ConnectivityChanged => Event::ConnectivityChanged,
            Command::RetryBindings => Event::RetryBindings,
            Command::StartStream => Event::StartStream,
            Command::StopStream(reason) => Event::StopStream(reason),
            Command::RecoverError => Event::RecoverError,
            Command::ConfigurationChanged(metrics) => Event::ConfigurationChanged(metrics),
            Command::ContentResized { width, height } => Event::ContentResized { width, height },
        }
    }
}

impl Event {
    pub(crate) fn band(&self) -> Band {
        match self {
            Event::InitState
            | Event::SelectVideoCodec(_)
            | Event::SelectAudioCodec(_)
            | Event::SettingsChanged(_)
            | Event::VideoParams { .. }
            | Event::AudioParams { .. }
            | Event::StatsHeartbeat { .. } => Band::Destroy,
            Event::ChangeMode(_)
            | Event::ConnectivityChanged
            | Event::RetryBindings
            | Event::StartStream
            | Event::StopStream(_)
            | Event::RecoverError
            | Event::ConfigurationChanged(_)
            | Event::ContentResized { .. }
            | Event::EncoderError { .. }
            | Event::AudioCaptureError { .. } => Band::Recover,
            Event::ApplyVideoReconfigure { .. } => Band::VideoReconfigure,
            Event::DiscoverAddress { .. } => Band::Restart,
            Event::Destroy(_) => Band::None,
            Event::Client { event, .. } | Event::Server { event, .. } => match event {
                TransportEvent::ConnectedOk | TransportEvent::ServerStarted | TransportEvent::Error(_) => Band::Recover,
                TransportEvent::Disconnected
                | TransportEvent::BitrateSample(_)
                | TransportEvent::ServerStopped
                | TransportEvent::ClientsChanged(_) => Band::Destroy,
            },
        }
    }

    /// Pending bands a newly queued event supersedes.
    fn supersedes(&self) -> &'static [Band] {
        match self {
            Event::ApplyVideoReconfigure { .. } => &[Band::VideoReconfigure],
            Event::DiscoverAddress { .. } => &[Band::Restart],
            Event::RecoverError => &[Band::Restart, Band::VideoReconfigure, Band::Recover],
            Event::Destroy(_) => &[Band::Restart, Band::VideoReconfigure, Band::Recover, Band::Destroy],
            _ => &[],
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Event::InitState => "InitState",
            Event::ChangeMode(_) => "ChangeMode",
            Event::SelectVideoCodec(_) => "SelectVideoCodec",
            Event::SelectAudioCodec(_) => "SelectAudioCodec",
            Event::SettingsChanged(_) => "SettingsChanged",
            Event::ConnectivityChanged => "ConnectivityChanged",
            Event::RetryBindings => "RetryBindings",
            Event::StartStream => "StartStream",
            Event::StopStream(_) => "StopStream",
            Event::RecoverError => "RecoverError",
            Event::ConfigurationChanged(_) => "ConfigurationChanged",
            Event::ContentResized { .. } => "ContentResized",
            Event::ApplyVideoReconfigure { .. } => "ApplyVideoReconfigure",
            Event::Destroy(_) => "Destroy",
            Event::VideoParams { .. } => "VideoParams",
            Event::AudioParams { .. } => "AudioParams",
            Event::EncoderError { .. } => "EncoderError",
            Event::AudioCaptureError { .. } => "AudioCaptureError",
            Event::Client { .. } => "Client",
            Event::Server { .. } => "Server",
            Event::DiscoverAddress { .. } => "DiscoverAddress",
            Event::StatsHeartbeat { .. } => "StatsHeartbeat",
        }
    }
}

struct Entry {
    seq: u64,
    due: Instant,
    band: Band,
    event: Event,
}

#[derive(Default)]
struct Pending {
    entries: Vec<Entry>,
    next_seq: u64,
    destroy_pending: bool,
}

/// The controller's inbox: entries become ready at their due time and are
/// taken in due order, ties in arrival order.
#[derive(Default)]
pub(crate) struct EventQueue {
    pending: Mutex<Pending>,
    notify: Notify,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: Event) -> bool {
        self.push_delayed(event, Duration::ZERO)
    }

    /// Queues `event` after removing what it supersedes. Rejected once a
    /// destroy is queued.
    pub(crate) fn push_delayed(&self, event: Event, delay: Duration) -> bool {
        let mut pending = self.pending.lock();
        if pending.destroy_pending {
            warn!("EventQueue: destroy pending, ignoring {}", event.name());
            return false;
        }
        if matches!(event, Event::Destroy(_)) {
            pending.destroy_pending = true;
        }
        let superseded = event.supersedes();
        if !superseded.is_empty() {
            pending.entries.retain(|e| !superseded.contains(&e.band));
        }

        trace!("EventQueue: {} in {:?}", event.name(), delay);
        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.entries.push(Entry {
            seq,
            due: Instant::now() + delay,
            band: event.band(),
            event,
        });
        drop(pending);
        self.notify.notify_one();
        true
    }

    pub(crate) fn remove_band(&self, band: Band) {
        self.pending.lock().entries.retain(|e| e.band != band);
    }

    pub(crate) fn is_destroy_pending(&self) -> bool {
        self.pending.lock().destroy_pending
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Waits for the next due event.
    pub(crate) async fn next(&self) -> Event {
        loop {
            let notified = self.notify.notified();
            let wake_at = {
                let mut pending = self.pending.lock();
                let next = pending
                    .entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| (e.due, e.seq))
                    .map(|(index, e)| (index, e.due));
                match next {
                    Some((index, due)) if due <= Instant::now() => {
                        return pending.entries.remove(index).event;
                    }
                    Some((_, due)) => Some(due),
                    None => None,
                }
            };
            match wake_at {
                Some(due) => {
                    tokio::select! {
                        _ = time::sleep_until(due) => {}
                        _ = notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}
