use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::net::SocketAddr;

use crate::av::MediaKind;
use crate::format::rtsp::Protocol;

/// Counters of one track of one player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_dropped: u64,
    pub enqueued: u64,
    pub queue_size: usize,
    pub queue_capacity: usize,
}

/// Snapshot of one connected player.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConnectionStats {
    pub session_id: String,
    pub remote_address: SocketAddr,
    /// Lower transport of the first set-up track, if any.
    pub protocol: Option<Protocol>,
    pub connected_since: DateTime<Utc>,
    pub last_sent: Option<DateTime<Utc>>,
    pub video: MediaStats,
    pub audio: MediaStats,
}

impl ClientConnectionStats {
    pub fn bytes_sent(&self) -> u64 {
        self.video.bytes_sent + self.audio.bytes_sent
    }
}

/// Live counters behind a [`ClientConnectionStats`] snapshot.
#[derive(Debug)]
pub(crate) struct StatsRecorder {
    stats: Mutex<ClientConnectionStats>,
}

impl StatsRecorder {
    pub fn new(session_id: String, remote_address: SocketAddr, video_capacity: usize, audio_capacity: usize) -> Self {
        Self {
            stats: Mutex::new(ClientConnectionStats {
                session_id,
                remote_address,
                protocol: None,
                connected_since: Utc::now(),
                last_sent: None,
                video: MediaStats {
                    queue_capacity: video_capacity,
                    ..MediaStats::default()
                },
                audio: MediaStats {
                    queue_capacity: audio_capacity,
                    ..MediaStats::default()
                },
            }),
        }
    }

    fn with_media<F: FnOnce(&mut MediaStats)>(&self, kind: MediaKind, f: F) {
        let mut stats = self.stats.lock();
        match kind {
            MediaKind::Video => f(&mut stats.video),
            MediaKind::Audio => f(&mut stats.audio),
        }
    }

    pub fn set_protocol(&self, protocol: Protocol) {
        let mut stats = self.stats.lock();
        if stats.protocol.is_none() {
            stats.protocol = Some(protocol);
        }
    }

    pub fn enqueued(&self, kind: MediaKind, queue_size: usize) {
        self.with_media(kind, |m| {
            m.enqueued += 1;
            m.queue_size = queue_size;
        });
    }

    pub fn dropped(&self, kind: MediaKind, count: u64) {
        self.with_media(kind, |m| m.packets_dropped += count);
    }

    pub fn dequeued(&self, kind: MediaKind, queue_size: usize) {
        self.with_media(kind, |m| m.queue_size = queue_size);
    }

    pub fn sent(&self, kind: MediaKind, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.last_sent = Some(Utc::now());
        let media = match kind {
            MediaKind::Video => &mut stats.video,
            MediaKind::Audio => &mut stats.audio,
        };
        media.packets_sent += 1;
        media.bytes_sent += bytes as u64;
    }

    pub fn snapshot(&self) -> ClientConnectionStats {
        self.stats.lock().clone()
    }
}
