use percent_encoding::percent_decode_str;
use std::net::IpAddr;
use url::Url;

use super::DEFAULT_PORT;
use crate::error::{Result, StreamError};

/// A publish target, `rtsp[s]://[user:pass@]host[:port]/path[?query]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspUrl {
    pub tls: bool,
    pub host: String,
    pub port: u16,
    /// Path with a leading `/`, query included.
    pub full_path: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl RtspUrl {
    pub fn parse(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint.trim())
            .map_err(|e| StreamError::InvalidAddress(format!("{}: {}", endpoint, e)))?;

        let tls = match url.scheme() {
            "rtsp" => false,
            "rtsps" => true,
            other => return Err(StreamError::InvalidAddress(format!("Invalid protocol: {}", other))),
        };

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.trim_start_matches('[').trim_end_matches(']').to_string(),
            _ => return Err(StreamError::InvalidAddress(format!("Invalid/missing host: {}", endpoint))),
        };

        let path = url.path().trim().trim_start_matches('/');
        let full_path = match url.query().filter(|q| !q.is_empty()) {
            Some(query) => format!("/{}?{}", path, query),
            None => format!("/{}", path),
        };

        let user = Some(url.username()).filter(|u| !u.is_empty()).map(decode);
        let password = user.as_ref().map(|_| url.password().map(decode).unwrap_or_default());

        Ok(Self {
            tls,
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            full_path,
            user,
            password,
        })
    }

    pub fn has_auth(&self) -> bool {
        self.user.as_deref().map_or(false, |u| !u.is_empty())
    }

    /// Host as it appears in a URI; IPv6 literals are bracketed.
    pub fn host_for_uri(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// `rtsp://host:port/path` without credentials, the request URI base.
    pub fn base_uri(&self) -> String {
        format!("rtsp://{}:{}{}", self.host_for_uri(), self.port, self.full_path)
    }
}

/// Percent-decodes userinfo; `+` stays literal.
fn decode(value: &str) -> String {
    percent_decode_str(value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// URL players use to reach a serve binding. IPv6 addresses are bracketed
/// and lose their `%scope` suffix.
pub fn binding_url(address: IpAddr, port: u16, path: &str) -> String {
    let base = match address {
        IpAddr::V4(v4) => format!("rtsp://{}:{}", v4, port),
        IpAddr::V6(v6) => {
            let text = v6.to_string();
            let host = text.split('%').next().unwrap_or(&text);
            format!("rtsp://[{}]:{}", host, port)
        }
    };
    match path.trim_start_matches('/') {
        "" => base,
        path => format!("{}/{}", base, path),
    }
}
