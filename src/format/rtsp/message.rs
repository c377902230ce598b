use super::{Method, RTSPError};

/// Header list in wire order; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get("CSeq")?.trim().parse().ok()
    }

    pub fn content_length(&self) -> usize {
        self.get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Session id up to the first `;`.
    pub fn session_id(&self) -> Option<&str> {
        let value = self.get("Session")?;
        let id = value.split(';').next()?.trim();
        (!id.is_empty()).then_some(id)
    }

    /// The `timeout=` attribute of the `Session` header, in seconds.
    pub fn session_timeout(&self) -> Option<u32> {
        self.get("Session")?
            .split(';')
            .skip(1)
            .filter_map(|p| p.trim().split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("timeout"))
            .and_then(|(_, v)| v.trim().parse().ok())
            .filter(|t| *t > 0)
    }

    pub fn transport(&self) -> Option<&str> {
        self.get("Transport")
    }

    /// Headers of a raw message head; the start line is skipped.
    pub fn from_head(head: &str) -> Self {
        Self::parse_lines(head.lines().skip(1))
    }

    fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Self {
        let mut headers = Headers::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.push(name.trim(), value.trim());
            }
        }
        headers
    }
}

/// An inbound request on the serve side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: String,
}

impl Request {
    /// Parses a request head (request line plus headers, without the blank line).
    pub fn parse(head: &str, body: &str) -> Result<Self, RTSPError> {
        let mut lines = head.lines().map(str::trim_end).filter(|l| !l.is_empty());
        let request_line = lines
            .next()
            .ok_or_else(|| RTSPError::Malformed("empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let (method, uri, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(u), Some(v)) => (m, u, v),
            _ => return Err(RTSPError::Malformed(format!("bad request line: {}", request_line))),
        };
        if !version.starts_with("RTSP/") {
            return Err(RTSPError::Malformed(format!("not an RTSP request: {}", version)));
        }

        Ok(Self {
            method: method.parse().unwrap_or(Method::Unknown),
            uri: uri.to_string(),
            version: version.to_string(),
            headers: Headers::parse_lines(lines),
            body: body.to_string(),
        })
    }

    pub fn cseq(&self) -> Option<u32> {
        self.headers.cseq()
    }
}

/// A response read by the publish side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    /// Parses a response head; the body is delimited by the caller.
    pub fn parse(head: &str, body: &str) -> Result<Self, RTSPError> {
        let mut lines = head.lines().map(str::trim_end).filter(|l| !l.is_empty());
        let status_line = lines
            .next()
            .ok_or_else(|| RTSPError::Malformed("empty response".into()))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("RTSP/") {
            return Err(RTSPError::Malformed(format!("bad status line: {}", status_line)));
        }
        let status = parts
            .next()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| RTSPError::Malformed(format!("bad status code: {}", status_line)))?;
        let reason = parts.next().unwrap_or_default().trim().to_string();

        Ok(Self {
            status,
            reason,
            headers: Headers::parse_lines(lines),
            body: body.to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn cseq(&self) -> Option<u32> {
        self.headers.cseq()
    }

    /// Picks the strongest challenge: Digest when offered, else the first one.
    pub fn www_authenticate(&self) -> Option<&str> {
        let mut all = self.headers.get_all("WWW-Authenticate");
        let first = all.next()?;
        if first.trim_start().to_ascii_lowercase().starts_with("digest") {
            return Some(first);
        }
        Some(
            all.find(|v| v.trim_start().to_ascii_lowercase().starts_with("digest"))
                .unwrap_or(first),
        )
    }
}
