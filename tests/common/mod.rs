#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rtspcast::av::{AudioCodec, VideoCodec};
use rtspcast::session::{
    AudioCodecInfo, AudioEncoder, CaptureSurface, CodecCatalog, Collaborators, DiscoveryFilter, DisplayMetrics,
    HostNotifier, MediaSink, MediaSource, NetInterface, NetworkDiscovery, VideoCapabilities, VideoCodecInfo,
    VideoConfig, VideoEncoder,
};
use rtspcast::{Result, SessionError};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const SPS: [u8; 4] = [0x67, 0x42, 0xc0, 0x1f];
pub const PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

/// Everything the mocks are asked to do, in order.
pub type Calls = mpsc::UnboundedReceiver<String>;

pub struct Catalog;

impl CodecCatalog for Catalog {
    fn video_encoders(&self) -> Vec<VideoCodecInfo> {
        vec![VideoCodecInfo {
            name: "mock.h264.encoder".to_string(),
            codec: VideoCodec::H264,
            vendor: "mock".to_string(),
            is_hardware_accelerated: false,
            is_cbr_supported: true,
            capabilities: VideoCapabilities {
                widths: 64..=1920,
                heights: 64..=1088,
                width_alignment: 16,
                height_alignment: 8,
                frame_rates: 1..=60,
                bitrates: 100_000..=8_000_000,
                max_pixels: None,
            },
        }]
    }

    fn audio_encoders(&self) -> Vec<AudioCodecInfo> {
        vec![AudioCodecInfo {
            name: "mock.opus.encoder".to_string(),
            codec: AudioCodec::Opus,
            vendor: "mock".to_string(),
            is_hardware_accelerated: false,
            is_cbr_supported: true,
            bitrates: Some(32_000..=256_000),
        }]
    }
}

struct Device {
    calls: mpsc::UnboundedSender<String>,
    sink: Option<MediaSink>,
}

impl Device {
    fn record(&self, call: impl Into<String>) {
        let _ = self.calls.send(call.into());
    }
}

impl VideoEncoder for Device {
    fn prepare(&mut self, config: &VideoConfig) -> Result<()> {
        self.record(format!("video.prepare {}x{}", config.width, config.height));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.record("video.start");
        // a real encoder reports its parameter sets once running
        if let Some(sink) = &self.sink {
            sink.on_video_params(&SPS, Some(&PPS), None);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.record("video.stop");
    }

    fn request_key_frame(&mut self) {
        self.record("video.key_frame");
    }
}

impl AudioEncoder for Device {
    fn start(&mut self) -> Result<()> {
        self.record("audio.start");
        Ok(())
    }

    fn stop(&mut self) {
        self.record("audio.stop");
    }
}

impl CaptureSurface for Device {
    fn resize(&mut self, width: u32, height: u32, _density_dpi: u32) -> Result<()> {
        self.record(format!("capture.resize {}x{}", width, height));
        Ok(())
    }

    fn stop(&mut self) {
        self.record("capture.stop");
    }
}

pub struct Media {
    calls: mpsc::UnboundedSender<String>,
    /// Sink of the most recent video encoder, for pushing frames by hand.
    pub sink: Arc<Mutex<Option<MediaSink>>>,
}

impl MediaSource for Media {
    fn video_encoder(&self, _codec: &VideoCodecInfo, sink: MediaSink) -> Result<Box<dyn VideoEncoder>> {
        *self.sink.lock() = Some(sink.clone());
        Ok(Box::new(Device {
            calls: self.calls.clone(),
            sink: Some(sink),
        }))
    }

    fn audio_encoder(&self, _codec: &AudioCodecInfo, _sink: MediaSink) -> Result<Box<dyn AudioEncoder>> {
        Ok(Box::new(Device {
            calls: self.calls.clone(),
            sink: None,
        }))
    }

    fn start_capture(&self, width: u32, height: u32, _density_dpi: u32) -> Result<Box<dyn CaptureSurface>> {
        let _ = self.calls.send(format!("capture.start {}x{}", width, height));
        Ok(Box::new(Device {
            calls: self.calls.clone(),
            sink: None,
        }))
    }
}

/// Answers with a fixed interface list and remembers when it was asked.
pub struct Discovery {
    pub interfaces: Vec<NetInterface>,
    pub asked: Arc<Mutex<Vec<Instant>>>,
}

#[async_trait]
impl NetworkDiscovery for Discovery {
    async fn interfaces(&self, _filter: &DiscoveryFilter) -> Result<Vec<NetInterface>> {
        self.asked.lock().push(Instant::now());
        Ok(self.interfaces.clone())
    }
}

pub struct Notifier(pub mpsc::UnboundedSender<String>);

impl HostNotifier for Notifier {
    fn show_error(&self, error: &SessionError) {
        let _ = self.0.send(format!("show {}", error));
    }

    fn hide_error(&self) {
        let _ = self.0.send("hide".to_string());
    }

    fn set_foreground(&self, streaming: bool) {
        let _ = self.0.send(format!("foreground {}", streaming));
    }
}

pub fn loopback() -> NetInterface {
    NetInterface {
        label: "lo".to_string(),
        address: IpAddr::from([127, 0, 0, 1]),
    }
}

pub struct Mocks {
    pub collaborators: Collaborators,
    pub calls: Calls,
    pub notices: Calls,
    pub asked: Arc<Mutex<Vec<Instant>>>,
    pub sink: Arc<Mutex<Option<MediaSink>>>,
}

pub fn mocks(interfaces: Vec<NetInterface>) -> Mocks {
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let (notices_tx, notices) = mpsc::unbounded_channel();
    let asked = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::new(Mutex::new(None));
    let collaborators = Collaborators {
        catalog: Arc::new(Catalog),
        media: Arc::new(Media {
            calls: calls_tx,
            sink: sink.clone(),
        }),
        discovery: Arc::new(Discovery {
            interfaces,
            asked: asked.clone(),
        }),
        notifier: Arc::new(Notifier(notices_tx)),
        display: DisplayMetrics {
            width: 1280,
            height: 720,
            density_dpi: 320,
        },
    };
    Mocks {
        collaborators,
        calls,
        notices,
        asked,
        sink,
    }
}

/// Drains whatever has been recorded so far.
pub fn drain(calls: &mut Calls) -> Vec<String> {
    let mut seen = Vec::new();
    while let Ok(call) = calls.try_recv() {
        seen.push(call);
    }
    seen
}
