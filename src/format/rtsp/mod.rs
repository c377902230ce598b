//! # Real Time Streaming Protocol (RTSP)
//!
//! Text protocol codec and the two transport sessions built on it:
//!
//! - [`RtspClient`] publishes to a media server (`OPTIONS`, `ANNOUNCE`,
//!   `SETUP`, `RECORD`, keep-alive, `TEARDOWN`)
//! - [`RtspServer`] accepts players and answers `DESCRIBE`/`SETUP`/`PLAY`
//!
//! Both carry RTP over UDP or interleaved on the control connection and
//! report back to their owner through [`TransportEvent`]s.

mod address;
mod auth;
mod channel;
mod client;
mod connection;
mod message;
mod queue;
mod request;
mod response;
mod sdp;
pub mod server;
mod transport;

pub use address::{binding_url, RtspUrl};
pub use auth::{basic_authorization, Authenticator, Challenge, DigestChallenge};
pub use channel::{MediaChannels, TrackChannel};
pub use client::{ClientOptions, ClientState, RtspClient};
pub use connection::{read_incoming, read_message, ControlWriter, Incoming};
pub use message::{Headers, Request, Response};
pub use queue::{FrameQueue, QueueStats, QueuedItem, QUEUE_CAPACITY};
pub use request::ClientMessages;
pub use response::{RtpInfo, ServerMessages, ALLOWED_METHODS};
pub use sdp::SdpBuilder;
pub use server::{ClientConnectionStats, MediaStats, RtspServer, ServerOptions};
pub use transport::{CastType, TransportHeader};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::{SessionError, StreamError};

pub const RTSP_VERSION: &str = "RTSP/1.0";
pub const DEFAULT_PORT: u16 = 554;
/// How long a request waits for its response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);
/// Session timeout advertised by the serve side.
pub const SESSION_TIMEOUT_SECS: u32 = 60;

#[derive(Debug, Error)]
pub enum RTSPError {
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Connection closed by peer")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<RTSPError> for StreamError {
    fn from(err: RTSPError) -> Self {
        match err {
            RTSPError::Closed => StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Connection closed by peer",
            )),
            RTSPError::Io(e) => StreamError::Io(e),
            other => StreamError::Protocol(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Pause,
    Record,
    Teardown,
    GetParameter,
    Unknown,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Record => "RECORD",
            Method::Teardown => "TEARDOWN",
            Method::GetParameter => "GET_PARAMETER",
            Method::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "OPTIONS" => Method::Options,
            "DESCRIBE" => Method::Describe,
            "ANNOUNCE" => Method::Announce,
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "PAUSE" => Method::Pause,
            "RECORD" => Method::Record,
            "TEARDOWN" => Method::Teardown,
            "GET_PARAMETER" => Method::GetParameter,
            _ => Method::Unknown,
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower transport of a media channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

/// Publish transport policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolPolicy {
    #[default]
    Tcp,
    Udp,
    /// Offer UDP and follow the server's answer.
    Auto,
}

impl FromStr for ProtocolPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(ProtocolPolicy::Tcp),
            "udp" => Ok(ProtocolPolicy::Udp),
            "auto" => Ok(ProtocolPolicy::Auto),
            other => Err(format!("unknown protocol policy: {}", other)),
        }
    }
}

/// What a transport session reports to its owner. Every event carries the
/// generation the session was created with.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectedOk,
    Disconnected,
    BitrateSample(u64),
    Error(SessionError),
    ServerStarted,
    ServerStopped,
    ClientsChanged(Vec<ClientConnectionStats>),
}

pub type EventSink = Arc<dyn Fn(u64, TransportEvent) + Send + Sync>;
