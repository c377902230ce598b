use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Unicast,
    Multicast,
}

/// A parsed `Transport` header (RFC 2326 §12.39).
///
/// Only the first alternative of a comma separated list is kept. Port pairs
/// are `(rtp, rtcp)`; a single port `p` means `p-(p+1)`. Parameters this
/// type does not model are kept verbatim and in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub profile: String,
    pub cast_type: CastType,
    pub interleaved: Option<(u8, u8)>,
    pub client_port: Option<(u16, u16)>,
    pub server_port: Option<(u16, u16)>,
    pub ssrc: Option<u32>,
    pub mode: Option<String>,
    pub mode_quoted: bool,
    pub extra_params: Vec<String>,
}

fn parse_pair<T: std::str::FromStr + Copy>(value: &str, next: impl Fn(T) -> Option<T>) -> Option<(T, T)> {
    let parts: Vec<T> = value.split('-').filter_map(|p| p.trim().parse().ok()).collect();
    match parts.as_slice() {
        [a, b] => Some((*a, *b)),
        [a] => Some((*a, next(*a)?)),
        _ => None,
    }
}

impl TransportHeader {
    fn with_profile(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
            cast_type: CastType::Unicast,
            interleaved: None,
            client_port: None,
            server_port: None,
            ssrc: None,
            mode: None,
            mode_quoted: false,
            extra_params: Vec::new(),
        }
    }

    /// UDP offer of the publish side.
    pub fn udp_record(rtp: u16, rtcp: u16) -> Self {
        Self {
            client_port: Some((rtp, rtcp)),
            mode: Some("record".to_string()),
            ..Self::with_profile("RTP/AVP")
        }
    }

    /// TCP interleaved offer of the publish side, channels `2N-2N+1`.
    pub fn tcp_record(track_id: u8) -> Self {
        Self {
            interleaved: Some((track_id * 2, track_id * 2 + 1)),
            mode: Some("record".to_string()),
            ..Self::with_profile("RTP/AVP/TCP")
        }
    }

    pub fn parse(transport: &str) -> Option<Self> {
        let first = transport.split(',').next()?.trim();
        let mut tokens = first.split(';').map(str::trim).filter(|t| !t.is_empty());
        let mut info = Self::with_profile(tokens.next()?);

        for token in tokens {
            let lower = token.to_ascii_lowercase();
            if lower == "unicast" {
                info.cast_type = CastType::Unicast;
                continue;
            }
            if lower == "multicast" {
                info.cast_type = CastType::Multicast;
                continue;
            }
            match token.split_once('=') {
                Some((key, value)) if key.trim().eq_ignore_ascii_case("interleaved") => {
                    if let Some(pair) = parse_pair::<u8>(value, |c| c.checked_add(1)) {
                        info.interleaved = Some(pair);
                    }
                }
                Some((key, value)) if key.trim().eq_ignore_ascii_case("client_port") => {
                    if let Some(pair) = parse_pair::<u16>(value, |p| p.checked_add(1)) {
                        info.client_port = Some(pair);
                    }
                }
                Some((key, value)) if key.trim().eq_ignore_ascii_case("server_port") => {
                    if let Some(pair) = parse_pair::<u16>(value, |p| p.checked_add(1)) {
                        info.server_port = Some(pair);
                    }
                }
                Some((key, value)) if key.trim().eq_ignore_ascii_case("ssrc") => {
                    let value = value.trim();
                    let hex = value.trim_start_matches("0x").trim_start_matches("0X");
                    info.ssrc = u32::from_str_radix(hex, 16).ok();
                }
                Some((key, value)) if key.trim().eq_ignore_ascii_case("mode") => {
                    let raw = value.trim();
                    info.mode_quoted = raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"');
                    info.mode = Some(raw.trim_matches('"').to_string());
                }
                _ => info.extra_params.push(token.to_string()),
            }
        }

        Some(info)
    }

    pub fn is_tcp(&self) -> bool {
        self.profile.to_ascii_uppercase().ends_with("/TCP") || self.interleaved.is_some()
    }

    pub fn with_server_port(mut self, rtp: u16, rtcp: u16) -> Self {
        self.server_port = Some((rtp, rtcp));
        self
    }
}

impl fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![self.profile.clone()];

        parts.push(
            match self.cast_type {
                CastType::Unicast => "unicast",
                CastType::Multicast => "multicast",
            }
            .to_string(),
        );

        if let Some((rtp, rtcp)) = self.interleaved {
            parts.push(format!("interleaved={}-{}", rtp, rtcp));
        }
        if let Some((rtp, rtcp)) = self.client_port {
            parts.push(format!("client_port={}-{}", rtp, rtcp));
        }
        if let Some((rtp, rtcp)) = self.server_port {
            parts.push(format!("server_port={}-{}", rtp, rtcp));
        }
        if let Some(ssrc) = self.ssrc {
            parts.push(format!("ssrc={:08X}", ssrc));
        }
        if let Some(ref mode) = self.mode {
            if self.mode_quoted {
                parts.push(format!("mode=\"{}\"", mode));
            } else {
                parts.push(format!("mode={}", mode));
            }
        }
        parts.extend(self.extra_params.iter().cloned());

        f.write_str(&parts.join(";"))
    }
}
