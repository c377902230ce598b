//! Session controller: one worker task owning mode, encoders, transports
//! and errors, driven by queued events.
//!
//! The host talks to it through [`SessionController::send_command`] and
//! [`SessionController::observe_state`]. Encoders report through the
//! [`MediaSink`] they are created with; encoded frames go straight to the
//! active transport and never wait on the worker.

mod collaborators;
mod controller;
mod events;
mod resize;
mod sink;
mod state;

pub use collaborators::{
    AudioCodecInfo, AudioEncoder, CaptureSurface, Collaborators, CodecCatalog, DiscoveryFilter, DisplayMetrics,
    HostNotifier, MediaSource, NetInterface, NetworkDiscovery, VideoCapabilities, VideoCodecInfo, VideoConfig,
    VideoEncoder,
};
pub use controller::{SessionController, DESTROY_TIMEOUT, MAX_DISCOVERY_RETRIES};
pub use events::Command;
pub use resize::adjust_resize_factor;
pub use sink::MediaSink;
pub use state::{RtspBinding, SessionStatus, StreamMode, ViewState};
