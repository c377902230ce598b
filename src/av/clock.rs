use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Monotonic media clock shared by the encoder side and the sessions of one stream.
///
/// Cloning shares the origin; [`MediaClock::reset`] moves it for every clone.
#[derive(Debug, Clone)]
pub struct MediaClock {
    origin: Arc<Mutex<Instant>>,
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            origin: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn reset(&self) {
        *self.origin.lock() = Instant::now();
    }

    /// Microseconds since the last reset.
    pub fn elapsed_us(&self) -> i64 {
        let origin = *self.origin.lock();
        i64::try_from(origin.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    /// RTP timestamp for "now" at `clock_rate`.
    pub fn rtp_time(&self, clock_rate: u32) -> u32 {
        rtp_time_from_us(self.elapsed_us(), clock_rate)
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a microsecond timestamp into RTP units, wrapping at 32 bits.
pub fn rtp_time_from_us(timestamp_us: i64, clock_rate: u32) -> u32 {
    let ticks = (timestamp_us as i128) * (clock_rate as i128) / 1_000_000;
    ticks as u32
}
