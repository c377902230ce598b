use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::av::{MediaFrame, MediaKind, VideoParams};

/// Items a publish session holds between the encoder and the send loop.
pub const QUEUE_CAPACITY: usize = 32;

#[derive(Debug)]
pub enum QueuedItem {
    Frame(MediaFrame),
    /// New parameter sets after a resize; applied in place by the send loop.
    NewVideoParams(VideoParams),
}

/// Per-track intake counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub video_enqueued: u64,
    pub video_dropped: u64,
    pub audio_enqueued: u64,
    pub audio_dropped: u64,
}

impl QueueStats {
    fn count(&mut self, kind: MediaKind, accepted: bool) {
        let counter = match (kind, accepted) {
            (MediaKind::Video, true) => &mut self.video_enqueued,
            (MediaKind::Video, false) => &mut self.video_dropped,
            (MediaKind::Audio, true) => &mut self.audio_enqueued,
            (MediaKind::Audio, false) => &mut self.audio_dropped,
        };
        *counter += 1;
    }
}

#[derive(Debug, Default)]
struct State {
    items: VecDeque<QueuedItem>,
    open: bool,
    stats: QueueStats,
}

/// Bounded FIFO between a non-blocking producer and one consumer.
///
/// When full the incoming frame is dropped, never an older one. A closed
/// queue accepts nothing; rejected frames are released on the spot.
#[derive(Debug)]
pub struct FrameQueue {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY)
    }
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Starts accepting items.
    pub fn open(&self) {
        self.state.lock().open = true;
    }

    /// Stops accepting items and releases everything pending.
    pub fn close(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.open = false;
            std::mem::take(&mut state.items)
        };
        if !pending.is_empty() {
            debug!("FrameQueue closed, releasing {} pending items", pending.len());
        }
        drop(pending);
        self.notify.notify_one();
    }

    /// Releases everything pending without changing whether the queue is open.
    pub fn clear(&self) {
        let pending = std::mem::take(&mut self.state.lock().items);
        drop(pending);
    }

    /// Enqueues a frame without blocking. Returns false when the frame was
    /// dropped (queue full or closed); the frame has been released by then.
    pub fn push_frame(&self, frame: MediaFrame) -> bool {
        let kind = frame.kind();
        let rejected = {
            let mut state = self.state.lock();
            let accepted = state.open && state.items.len() < self.capacity;
            if state.open {
                state.stats.count(kind, accepted);
            }
            if accepted {
                state.items.push_back(QueuedItem::Frame(frame));
                None
            } else {
                Some(frame)
            }
        };
        match rejected {
            None => {
                self.notify.notify_one();
                true
            }
            Some(frame) => {
                trace!("FrameQueue dropped {:?} frame", kind);
                frame.release();
                false
            }
        }
    }

    /// Enqueues new video parameters. A full queue gives up its pending
    /// frames first; they were encoded against the old parameters anyway.
    pub fn push_params(&self, params: VideoParams) -> bool {
        let stale = {
            let mut state = self.state.lock();
            if !state.open {
                return false;
            }
            let stale = if state.items.len() >= self.capacity {
                std::mem::take(&mut state.items)
            } else {
                VecDeque::new()
            };
            state.items.push_back(QueuedItem::NewVideoParams(params));
            stale
        };
        if !stale.is_empty() {
            debug!("FrameQueue full on new video params, dropped {} frames", stale.len());
        }
        drop(stale);
        self.notify.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<QueuedItem> {
        self.state.lock().items.pop_front()
    }

    /// Waits up to `wait` for the next item.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<QueuedItem> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// True when occupancy is at least `threshold_percent` of capacity.
    pub fn has_congestion(&self, threshold_percent: u32) -> bool {
        let len = self.len();
        len * 100 >= self.capacity * threshold_percent.min(100) as usize
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = QueueStats::default();
    }
}

impl Drop for FrameQueue {
    fn drop(&mut self) {
        self.state.get_mut().items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::VideoCodec;
    use quickcheck_macros::quickcheck;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted(kind: MediaKind, key: bool, released: &Arc<AtomicUsize>) -> MediaFrame {
        let released = released.clone();
        MediaFrame::new(kind, vec![0u8; 8], 0)
            .with_key_flag(key)
            .with_release(move || {
                released.fetch_add(1, Ordering::SeqCst);
            })
    }

    fn params() -> VideoParams {
        VideoParams::new(VideoCodec::H264, &[0x67, 0x42], Some(&[0x68]), None)
    }

    #[test]
    fn test_closed_queue_releases_immediately() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(4);
        assert!(!queue.push_frame(counted(MediaKind::Video, true, &released)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.stats(), QueueStats::default());
        assert!(!queue.push_params(params()));
    }

    #[test]
    fn test_full_queue_drops_new_and_counts_per_track() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(2);
        queue.open();
        assert!(queue.push_frame(counted(MediaKind::Video, true, &released)));
        assert!(queue.push_frame(counted(MediaKind::Audio, false, &released)));
        assert!(!queue.push_frame(counted(MediaKind::Audio, false, &released)));
        assert!(!queue.push_frame(counted(MediaKind::Video, false, &released)));

        assert_eq!(queue.len(), 2);
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(
            queue.stats(),
            QueueStats {
                video_enqueued: 1,
                video_dropped: 1,
                audio_enqueued: 1,
                audio_dropped: 1,
            }
        );

        // the oldest frame is still first
        match queue.try_pop() {
            Some(QueuedItem::Frame(frame)) => assert!(frame.is_key_frame()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_congestion_threshold() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(4);
        queue.open();
        assert!(!queue.has_congestion(75));
        for _ in 0..3 {
            queue.push_frame(counted(MediaKind::Video, false, &released));
        }
        assert!(queue.has_congestion(75));
        assert!(!queue.has_congestion(80));
    }

    #[test]
    fn test_params_on_full_queue_replace_pending_frames() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(2);
        queue.open();
        queue.push_frame(counted(MediaKind::Video, true, &released));
        queue.push_frame(counted(MediaKind::Video, false, &released));
        assert!(queue.push_params(params()));
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(matches!(queue.try_pop(), Some(QueuedItem::NewVideoParams(_))));
    }

    #[test]
    fn test_close_releases_pending() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(8);
        queue.open();
        for _ in 0..5 {
            queue.push_frame(counted(MediaKind::Audio, false, &released));
        }
        queue.close();
        assert_eq!(released.load(Ordering::SeqCst), 5);
        assert!(!queue.is_open());
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_timeout() {
        let queue = Arc::new(FrameQueue::new(4));
        queue.open();
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(100)).await.is_none());
        assert_eq!(start.elapsed(), Duration::from_millis(100));

        let producer = queue.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(30)).await;
            producer.push_frame(MediaFrame::audio(vec![1u8], 0));
        });
        let item = queue.pop_timeout(Duration::from_millis(100)).await;
        assert!(matches!(item, Some(QueuedItem::Frame(_))));
    }

    #[quickcheck]
    fn prop_every_frame_released_once(ops: Vec<(bool, bool)>) -> bool {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(QUEUE_CAPACITY);
        queue.open();
        let mut pushed = 0;
        for (push, audio) in ops {
            if push {
                let kind = if audio { MediaKind::Audio } else { MediaKind::Video };
                queue.push_frame(counted(kind, false, &released));
                pushed += 1;
            } else {
                drop(queue.try_pop());
            }
            if queue.len() > QUEUE_CAPACITY {
                return false;
            }
        }
        queue.close();
        released.load(Ordering::SeqCst) == pushed
    }
}
