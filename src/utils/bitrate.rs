use log::trace;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub const SAMPLE_WINDOW: Duration = Duration::from_secs(1);

type SampleFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Counts bytes handed to the network and reports bits per second once per window.
pub struct BitrateCalculator {
    bytes: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    on_sample: SampleFn,
}

impl BitrateCalculator {
    pub fn new<F>(on_sample: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        Self {
            bytes: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            on_sample: Arc::new(on_sample),
        }
    }

    /// Starts sampling. Calling it again while running does nothing.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bytes.store(0, Ordering::SeqCst);

        let bytes = self.bytes.clone();
        let running = self.running.clone();
        let on_sample = self.on_sample.clone();
        let handle = tokio::spawn(async move {
            let mut last = Instant::now();
            let mut ticker = time::interval_at(last + SAMPLE_WINDOW, SAMPLE_WINDOW);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let now = Instant::now();
                let elapsed = now.duration_since(last).as_nanos().max(1);
                last = now;
                let sent = bytes.swap(0, Ordering::SeqCst) as u128;
                let bps = (sent * 8 * 1_000_000_000 / elapsed) as u64;
                trace!("bitrate sample: {} bit/s", bps);
                on_sample(bps);
            }
        });
        *self.task.lock() = Some(handle);
    }

    /// Stops sampling; later additions are ignored. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.bytes.store(0, Ordering::SeqCst);
    }

    pub fn add(&self, bytes: usize) {
        if self.running.load(Ordering::SeqCst) {
            self.bytes.fetch_add(bytes as u64, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for BitrateCalculator {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (BitrateCalculator, Arc<Mutex<Vec<u64>>>) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = samples.clone();
        let calculator = BitrateCalculator::new(move |bps| sink.lock().push(bps));
        (calculator, samples)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_per_window() {
        let (calculator, samples) = recording();
        calculator.start();
        calculator.add(1000);
        time::sleep(Duration::from_millis(1_001)).await;
        assert_eq!(*samples.lock(), vec![8000]);

        calculator.add(250);
        calculator.add(250);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*samples.lock(), vec![8000, 4000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uniform_feed_matches_rate() {
        let (calculator, samples) = recording();
        calculator.start();
        // 100 KB/s in 10 ms slices for three seconds
        for _ in 0..300 {
            calculator.add(1_000);
            time::sleep(Duration::from_millis(10)).await;
        }
        let samples = samples.lock().clone();
        assert!(samples.len() >= 2);
        for bps in &samples[..2] {
            let diff = (*bps as i64 - 800_000).abs();
            assert!(diff <= 8_000, "sample {} too far from 800000", bps);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_idempotent() {
        let (calculator, samples) = recording();
        calculator.start();
        calculator.start();
        calculator.add(10);
        calculator.stop();
        calculator.stop();
        assert!(!calculator.is_running());

        calculator.add(5_000);
        time::sleep(Duration::from_secs(3)).await;
        assert!(samples.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_discards_old_bytes() {
        let (calculator, samples) = recording();
        calculator.start();
        calculator.add(99);
        calculator.stop();
        calculator.start();
        calculator.add(125);
        time::sleep(Duration::from_millis(1_001)).await;
        assert_eq!(*samples.lock(), vec![1000]);
    }
}
