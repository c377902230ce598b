//! Wire formats and transports.

pub mod rtcp;
pub mod rtp;
pub mod rtsp;
