//! Interfaces of the outside world the controller drives: codec catalog,
//! capture and encoders, network discovery and host notifications.

use async_trait::async_trait;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;

use super::sink::MediaSink;
use crate::av::{AudioCodec, VideoCodec};
use crate::error::{Result, SessionError};

/// What a video encoder accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCapabilities {
    pub widths: RangeInclusive<u32>,
    pub heights: RangeInclusive<u32>,
    pub width_alignment: u32,
    pub height_alignment: u32,
    pub frame_rates: RangeInclusive<u32>,
    pub bitrates: RangeInclusive<u32>,
    /// Largest frame area in pixels, if the encoder has a limit below `widths x heights`.
    pub max_pixels: Option<u64>,
}

impl VideoCapabilities {
    pub fn is_size_supported(&self, width: u32, height: u32) -> bool {
        self.widths.contains(&width)
            && self.heights.contains(&height)
            && width % self.width_alignment.max(1) == 0
            && height % self.height_alignment.max(1) == 0
            && self.max_pixels.map_or(true, |max| width as u64 * height as u64 <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCodecInfo {
    pub name: String,
    pub codec: VideoCodec,
    pub vendor: String,
    pub is_hardware_accelerated: bool,
    pub is_cbr_supported: bool,
    pub capabilities: VideoCapabilities,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCodecInfo {
    pub name: String,
    pub codec: AudioCodec,
    pub vendor: String,
    pub is_hardware_accelerated: bool,
    pub is_cbr_supported: bool,
    pub bitrates: Option<RangeInclusive<u32>>,
}

/// Ordered lists of usable encoders; the first entry is the automatic pick.
pub trait CodecCatalog: Send + Sync {
    fn video_encoders(&self) -> Vec<VideoCodecInfo>;
    fn audio_encoders(&self) -> Vec<AudioCodecInfo>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
}

/// Size of the captured display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMetrics {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
}

pub trait VideoEncoder: Send {
    fn prepare(&mut self, config: &VideoConfig) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn request_key_frame(&mut self);
}

pub trait AudioEncoder: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
}

/// The capture surface feeding the video encoder.
pub trait CaptureSurface: Send {
    fn resize(&mut self, width: u32, height: u32, density_dpi: u32) -> Result<()>;
    fn stop(&mut self);
}

/// Creates capture and encoders for one stream. Encoders report through
/// the [`MediaSink`] they are created with.
pub trait MediaSource: Send + Sync {
    fn video_encoder(&self, codec: &VideoCodecInfo, sink: MediaSink) -> Result<Box<dyn VideoEncoder>>;
    fn audio_encoder(&self, codec: &AudioCodecInfo, sink: MediaSink) -> Result<Box<dyn AudioEncoder>>;
    fn start_capture(&self, width: u32, height: u32, density_dpi: u32) -> Result<Box<dyn CaptureSurface>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoveryFilter {
    pub interface_filter: u32,
    pub address_filter: u32,
    pub enable_ipv4: bool,
    pub enable_ipv6: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub label: String,
    pub address: IpAddr,
}

#[async_trait]
pub trait NetworkDiscovery: Send + Sync {
    /// Interfaces the serve listener may bind, in display order.
    async fn interfaces(&self, filter: &DiscoveryFilter) -> Result<Vec<NetInterface>>;
}

/// Host plumbing: persistent error notification and foreground execution.
pub trait HostNotifier: Send + Sync {
    fn show_error(&self, error: &SessionError);
    fn hide_error(&self);
    fn set_foreground(&self, streaming: bool);
}

#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CodecCatalog>,
    pub media: Arc<dyn MediaSource>,
    pub discovery: Arc<dyn NetworkDiscovery>,
    pub notifier: Arc<dyn HostNotifier>,
    /// Display size at start; later changes arrive as commands.
    pub display: DisplayMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_support() {
        let caps = VideoCapabilities {
            widths: 64..=1920,
            heights: 64..=1088,
            width_alignment: 16,
            height_alignment: 8,
            frame_rates: 1..=60,
            bitrates: 100_000..=20_000_000,
            max_pixels: Some(1920 * 1080),
        };
        assert!(caps.is_size_supported(1280, 720));
        assert!(!caps.is_size_supported(1281, 720));
        assert!(!caps.is_size_supported(1920, 1088));
        assert!(!caps.is_size_supported(32, 720));
    }
}
