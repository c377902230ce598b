use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

use super::connection::{write_interleaved, ControlWriter};
use super::Protocol;
use crate::av::{MediaKind, Ports};
use crate::format::rtcp::RtcpSink;
use crate::format::rtp::{interleaved_header, RtpFrame};

const BIND_ATTEMPTS: usize = 16;
const FIRST_UDP_PORT: u16 = 10_000;
const UDP_PORT_PAIRS: u16 = 25_000;

/// Where the RTP and RTCP packets of one track go.
#[derive(Debug, Clone)]
pub enum TrackChannel {
    /// Framed on the control connection with these channel ids.
    Interleaved { rtp: u8, rtcp: u8 },
    /// A connected socket pair.
    Udp { rtp: Arc<UdpSocket>, rtcp: Arc<UdpSocket> },
}

impl TrackChannel {
    pub fn protocol(&self) -> Protocol {
        match self {
            TrackChannel::Interleaved { .. } => Protocol::Tcp,
            TrackChannel::Udp { .. } => Protocol::Udp,
        }
    }

    /// Interleaved channels for track `track_id` by convention, `2N-2N+1`.
    pub fn interleaved_for(track_id: u8) -> Self {
        TrackChannel::Interleaved {
            rtp: track_id * 2,
            rtcp: track_id * 2 + 1,
        }
    }
}

/// Binds an even/odd UDP port pair on `local` and connects it to `remote`.
pub async fn bind_udp_pair(local: IpAddr, remote: Option<(IpAddr, Ports)>) -> io::Result<(Ports, TrackChannel)> {
    let mut last_err = io::Error::new(io::ErrorKind::AddrInUse, "no free UDP port pair");
    for _ in 0..BIND_ATTEMPTS {
        let port = FIRST_UDP_PORT + (rand::random::<u16>() % UDP_PORT_PAIRS) * 2;
        let rtp = match UdpSocket::bind(SocketAddr::new(local, port)).await {
            Ok(socket) => socket,
            Err(e) => {
                last_err = e;
                continue;
            }
        };
        let rtcp = match UdpSocket::bind(SocketAddr::new(local, port + 1)).await {
            Ok(socket) => socket,
            Err(e) => {
                last_err = e;
                continue;
            }
        };
        if let Some((address, ports)) = remote {
            rtp.connect(SocketAddr::new(address, ports.rtp)).await?;
            rtcp.connect(SocketAddr::new(address, ports.rtcp)).await?;
        }
        return Ok((
            Ports::new(port, port + 1),
            TrackChannel::Udp {
                rtp: Arc::new(rtp),
                rtcp: Arc::new(rtcp),
            },
        ));
    }
    Err(last_err)
}

/// Media path of one session: the shared control writer plus one channel
/// per set-up track.
pub struct MediaChannels {
    writer: ControlWriter,
    tracks: Mutex<[Option<TrackChannel>; 2]>,
}

impl MediaChannels {
    pub fn new(writer: ControlWriter) -> Self {
        Self {
            writer,
            tracks: Mutex::new([None, None]),
        }
    }

    pub fn set_track(&self, kind: MediaKind, channel: TrackChannel) {
        self.tracks.lock()[kind.track_id() as usize] = Some(channel);
    }

    /// Connects an already bound UDP pair to the peer's ports.
    pub async fn connect_udp(&self, kind: MediaKind, remote: IpAddr, ports: Ports) -> io::Result<()> {
        let channel = self.track(kind);
        if let Some(TrackChannel::Udp { rtp, rtcp }) = channel {
            rtp.connect(SocketAddr::new(remote, ports.rtp)).await?;
            rtcp.connect(SocketAddr::new(remote, ports.rtcp)).await?;
        }
        Ok(())
    }

    pub fn track(&self, kind: MediaKind) -> Option<TrackChannel> {
        self.tracks.lock()[kind.track_id() as usize].clone()
    }

    pub fn has_track(&self, kind: MediaKind) -> bool {
        self.tracks.lock()[kind.track_id() as usize].is_some()
    }

    pub fn protocol(&self, kind: MediaKind) -> Option<Protocol> {
        self.track(kind).map(|c| c.protocol())
    }

    pub fn clear_track(&self, kind: MediaKind) {
        self.tracks.lock()[kind.track_id() as usize] = None;
    }

    pub fn clear(&self) {
        *self.tracks.lock() = [None, None];
    }

    /// Sends one RTP packet and returns the bytes put on the wire,
    /// interleaved header included.
    pub async fn send_rtp(&self, frame: &RtpFrame) -> io::Result<usize> {
        self.send(frame.kind, false, &frame.data).await
    }

    async fn send(&self, kind: MediaKind, rtcp: bool, data: &[u8]) -> io::Result<usize> {
        let channel = self
            .track(kind)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, format!("no {:?} channel", kind)))?;
        match channel {
            TrackChannel::Interleaved { rtp: rtp_id, rtcp: rtcp_id } => {
                let id = if rtcp { rtcp_id } else { rtp_id };
                let header = interleaved_header(id, data.len())
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "packet exceeds interleaved frame"))?;
                write_interleaved(&self.writer, &header, data).await?;
                Ok(data.len() + header.len())
            }
            TrackChannel::Udp { rtp, rtcp: rtcp_socket } => {
                let socket = if rtcp { rtcp_socket } else { rtp };
                socket.send(data).await
            }
        }
    }
}

#[async_trait]
impl RtcpSink for MediaChannels {
    async fn send_rtcp(&self, kind: MediaKind, packet: &[u8]) -> io::Result<()> {
        trace!("RTCP {:?} {} bytes", kind, packet.len());
        self.send(kind, true, packet).await.map(|_| ())
    }
}
