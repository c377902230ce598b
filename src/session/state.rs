use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use super::collaborators::{AudioCodecInfo, VideoCodecInfo};
use crate::error::SessionError;
use crate::format::rtsp::{binding_url, ClientConnectionStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamMode {
    /// Accept RTSP players.
    #[default]
    Serve,
    /// Push to a remote media server.
    Publish,
}

impl FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serve" | "server" => Ok(StreamMode::Serve),
            "publish" | "client" => Ok(StreamMode::Publish),
            other => Err(format!("unknown stream mode: {}", other)),
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMode::Serve => f.write_str("serve"),
            StreamMode::Publish => f.write_str("publish"),
        }
    }
}

/// One address the serve listener is reachable on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspBinding {
    /// Interface label for display, e.g. `wlan0`.
    pub label: String,
    pub url: String,
}

impl RtspBinding {
    pub fn new(label: &str, address: IpAddr, port: u16, path: &str) -> Self {
        Self {
            label: label.to_string(),
            url: binding_url(address, port, path),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Idle,
    /// Serve listener (re)starting on these bindings.
    Starting(Vec<RtspBinding>),
    /// Publish session handshaking.
    Connecting,
    /// Listener up (with its bindings) or publish session streaming (none).
    Active(Vec<RtspBinding>),
    Error(SessionError),
}

/// Read-only snapshot for the host, republished after every event.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub is_busy: bool,
    pub is_streaming: bool,
    pub mode: StreamMode,
    pub status: SessionStatus,
    pub selected_video: Option<VideoCodecInfo>,
    pub selected_audio: Option<AudioCodecInfo>,
    pub connection_stats: Vec<ClientConnectionStats>,
    /// Last publish bitrate sample, bits per second.
    pub bitrate: Option<u64>,
    pub error: Option<SessionError>,
}

impl ViewState {
    pub fn new(mode: StreamMode) -> Self {
        Self {
            is_busy: true,
            is_streaming: false,
            mode,
            status: SessionStatus::Idle,
            selected_video: None,
            selected_audio: None,
            connection_stats: Vec::new(),
            bitrate: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_mode_parse() {
        assert_eq!("Publish".parse::<StreamMode>(), Ok(StreamMode::Publish));
        assert_eq!(" server ".parse::<StreamMode>(), Ok(StreamMode::Serve));
        assert!("relay".parse::<StreamMode>().is_err());
        assert_eq!(StreamMode::Publish.to_string(), "publish");
    }

    #[test]
    fn test_binding_url() {
        let binding = RtspBinding::new("eth0", IpAddr::V6(Ipv6Addr::LOCALHOST), 8554, "/screen");
        assert_eq!(binding.url, "rtsp://[::1]:8554/screen");
        assert_eq!(binding.label, "eth0");
    }
}
