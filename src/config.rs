use log::{debug, warn};
use parking_lot::RwLock;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::format::rtsp::ProtocolPolicy;
use crate::session::StreamMode;

static SETTINGS: OnceLock<RwLock<StreamSettings>> = OnceLock::new();

const ENV_PREFIX: &str = "RTSPCAST_";
const CONFIG_PATHS: [&str; 2] = ["./config.toml", "./rtspcast.toml"];

/// User settings the session controller reads. Persisting them is the
/// host's business; this crate only loads them.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub mode: StreamMode,
    pub server_url: String,
    pub client_protocol: ProtocolPolicy,
    /// Transports serve-mode players may pick.
    pub server_protocol: ProtocolPolicy,
    pub server_port: u16,
    pub server_path: String,
    pub interface_filter: u32,
    pub address_filter: u32,
    pub enable_ipv4: bool,
    pub enable_ipv6: bool,
    pub enable_audio: bool,
    pub stop_on_configuration_change: bool,
    /// Percent, 10..=100.
    pub video_resize_factor: u32,
    pub video_fps: u32,
    pub video_bitrate: u32,
    pub app_name: String,
    pub app_version: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            mode: StreamMode::Serve,
            server_url: String::new(),
            client_protocol: ProtocolPolicy::Tcp,
            server_protocol: ProtocolPolicy::Auto,
            server_port: 8554,
            server_path: "screen".to_string(),
            interface_filter: 0,
            address_filter: 0,
            enable_ipv4: true,
            enable_ipv6: false,
            enable_audio: false,
            stop_on_configuration_change: false,
            video_resize_factor: 100,
            video_fps: 30,
            video_bitrate: 4_000_000,
            app_name: env!("CARGO_PKG_NAME").to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn parse_into<T: FromStr>(target: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!("config: ignoring invalid {} = {}", key, value),
    }
}

fn parse_bool(target: &mut bool, key: &str, value: &str) {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => *target = true,
        "0" | "false" | "no" | "off" => *target = false,
        _ => warn!("config: ignoring invalid {} = {}", key, value),
    }
}

impl StreamSettings {
    /// Defaults, then `RTSPCAST_*` environment variables, then the first
    /// readable config file.
    pub fn load() -> Self {
        let mut settings = StreamSettings::default();

        for (key, value) in env::vars() {
            if let Some(key) = key.strip_prefix(ENV_PREFIX) {
                settings.apply(&key.to_ascii_lowercase(), &value);
            }
        }

        for path in &CONFIG_PATHS {
            if let Ok(content) = fs::read_to_string(path) {
                debug!("config: reading {}", path);
                settings.apply_file(&content);
                break;
            }
        }

        settings
    }

    /// Applies `key = value` lines; `#` starts a comment.
    pub fn apply_file(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                self.apply(key.trim(), value);
            }
        }
    }

    /// Sets one value by key. Unknown keys and bad values are logged and skipped.
    pub fn apply(&mut self, key: &str, value: &str) {
        let value = value.trim();
        match key {
            "mode" => parse_into(&mut self.mode, key, value),
            "server_url" => self.server_url = value.to_string(),
            "client_protocol" => parse_into(&mut self.client_protocol, key, value),
            "server_protocol" => parse_into(&mut self.server_protocol, key, value),
            "server_port" => parse_into(&mut self.server_port, key, value),
            "server_path" => self.server_path = value.trim_start_matches('/').to_string(),
            "interface_filter" => parse_into(&mut self.interface_filter, key, value),
            "address_filter" => parse_into(&mut self.address_filter, key, value),
            "enable_ipv4" => parse_bool(&mut self.enable_ipv4, key, value),
            "enable_ipv6" => parse_bool(&mut self.enable_ipv6, key, value),
            "enable_audio" => parse_bool(&mut self.enable_audio, key, value),
            "stop_on_configuration_change" => parse_bool(&mut self.stop_on_configuration_change, key, value),
            "video_resize_factor" => {
                parse_into(&mut self.video_resize_factor, key, value);
                self.video_resize_factor = self.video_resize_factor.clamp(10, 100);
            }
            "video_fps" => parse_into(&mut self.video_fps, key, value),
            "video_bitrate" => parse_into(&mut self.video_bitrate, key, value),
            "app_name" => self.app_name = value.to_string(),
            "app_version" => self.app_version = value.to_string(),
            _ => debug!("config: unknown key {}", key),
        }
    }
}

fn cell() -> &'static RwLock<StreamSettings> {
    SETTINGS.get_or_init(|| RwLock::new(StreamSettings::load()))
}

/// Process-wide settings snapshot, loaded on first use.
pub fn settings() -> StreamSettings {
    cell().read().clone()
}

/// Re-reads environment and config file.
pub fn reload() {
    let fresh = StreamSettings::load();
    *cell().write() = fresh;
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# rtspcast configuration
# Environment variables RTSPCAST_<KEY> are read first; this file wins.

# serve | publish
mode = "serve"

# Publish target: rtsp[s]://[user:pass@]host[:port]/path
server_url = ""
# tcp | udp | auto
client_protocol = "tcp"

# Serve listener; tcp | udp | auto
server_protocol = "auto"
server_port = 8554
server_path = "screen"
interface_filter = 0
address_filter = 0
enable_ipv4 = true
enable_ipv6 = false

enable_audio = false
stop_on_configuration_change = false
video_resize_factor = 100
video_fps = 30
video_bitrate = 4000000
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}
