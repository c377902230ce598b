use bytes::Bytes;
use std::fmt;

use super::MediaKind;

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// An encoded frame handed over by the encoder.
///
/// The encoder keeps the underlying buffer until the frame is released.
/// Release happens exactly once: on [`MediaFrame::release`] or when the
/// frame is dropped, whichever comes first.
pub struct MediaFrame {
    kind: MediaKind,
    data: Bytes,
    offset: usize,
    size: usize,
    timestamp_us: i64,
    is_key_frame: bool,
    on_release: Option<ReleaseFn>,
}

impl MediaFrame {
    pub fn new(kind: MediaKind, data: impl Into<Bytes>, timestamp_us: i64) -> Self {
        let data = data.into();
        let size = data.len();
        Self {
            kind,
            data,
            offset: 0,
            size,
            timestamp_us,
            is_key_frame: false,
            on_release: None,
        }
    }

    pub fn video(data: impl Into<Bytes>, timestamp_us: i64, is_key_frame: bool) -> Self {
        Self::new(MediaKind::Video, data, timestamp_us).with_key_flag(is_key_frame)
    }

    pub fn audio(data: impl Into<Bytes>, timestamp_us: i64) -> Self {
        Self::new(MediaKind::Audio, data, timestamp_us)
    }

    /// Restricts the payload to `size` bytes starting at `offset`.
    pub fn with_range(mut self, offset: usize, size: usize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn with_key_flag(mut self, is_key_frame: bool) -> Self {
        self.is_key_frame = is_key_frame;
        self
    }

    /// Installs the producer's release callback.
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_release = Some(Box::new(release));
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    pub fn is_key_frame(&self) -> bool {
        self.is_key_frame
    }

    /// Payload bytes, clamped to the underlying buffer.
    pub fn payload(&self) -> &[u8] {
        let start = self.offset.min(self.data.len());
        let end = self.offset.saturating_add(self.size).min(self.data.len());
        &self.data[start..end]
    }

    /// Payload as a cheap `Bytes` slice of the frame buffer.
    pub fn payload_bytes(&self) -> Bytes {
        let start = self.offset.min(self.data.len());
        let end = self.offset.saturating_add(self.size).min(self.data.len());
        self.data.slice(start..end)
    }

    pub fn len(&self) -> usize {
        self.payload().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    /// Returns the frame to its producer.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for MediaFrame {
    fn drop(&mut self) {
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

impl fmt::Debug for MediaFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFrame")
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("timestamp_us", &self.timestamp_us)
            .field("is_key_frame", &self.is_key_frame)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted(counter: &Arc<AtomicUsize>) -> MediaFrame {
        let c = counter.clone();
        MediaFrame::video(vec![1, 2, 3, 4], 1000, true).with_release(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_release_runs_once_explicit() {
        let counter = Arc::new(AtomicUsize::new(0));
        counted(&counter).release();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_runs_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _frame = counted(&counter);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_payload_range_is_clamped() {
        let frame = MediaFrame::audio(vec![0, 1, 2, 3, 4, 5], 0).with_range(2, 3);
        assert_eq!(frame.payload(), &[2, 3, 4]);
        assert_eq!(&frame.payload_bytes()[..], &[2, 3, 4]);

        let frame = MediaFrame::audio(vec![0, 1, 2], 0).with_range(1, 10);
        assert_eq!(frame.payload(), &[1, 2]);

        let frame = MediaFrame::audio(vec![0, 1, 2], 0).with_range(5, 1);
        assert!(frame.is_empty());
    }
}
