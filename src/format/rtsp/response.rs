use chrono::Utc;
use std::fmt::Write as _;

use super::transport::TransportHeader;
use super::{RTSP_VERSION, SESSION_TIMEOUT_SECS};

/// Methods a player may use on the serve side.
pub const ALLOWED_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER";

/// Seconds a player is asked to wait when no stream parameters are known yet.
pub const RETRY_AFTER_SECS: u32 = 2;

pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        415 => "Unsupported Media Type",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown Error",
    }
}

/// One response under construction. `Date`, `Cache-Control` and
/// `Content-Length` are filled in by [`ResponseBuilder::build`].
#[must_use]
struct ResponseBuilder {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Option<String>,
}

impl ResponseBuilder {
    fn new(status: u16, cseq: Option<u32>) -> Self {
        let mut builder = Self {
            status,
            headers: Vec::new(),
            body: None,
        };
        if let Some(cseq) = cseq {
            builder = builder.header("CSeq", cseq.to_string());
        }
        builder
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn session(self, id: &str, timeout: Option<u32>) -> Self {
        match timeout {
            Some(t) if t > 0 => self.header("Session", format!("{};timeout={}", id, t)),
            _ => self.header("Session", id),
        }
    }

    fn body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    fn build(self, server: &str) -> String {
        let mut out = String::new();
        let _ = write!(out, "{} {} {}\r\n", RTSP_VERSION, self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            let _ = write!(out, "{}: {}\r\n", name, value);
        }
        let _ = write!(out, "Server: {}\r\n", server);
        let _ = write!(out, "Date: {}\r\n", Utc::now().format("%a, %d %b %Y %H:%M:%S GMT"));
        out.push_str("Cache-Control: no-cache\r\n");
        match self.body {
            Some(body) => {
                let _ = write!(out, "Content-Length: {}\r\n\r\n", body.len());
                out.push_str(&body);
            }
            None => out.push_str("\r\n"),
        }
        out
    }
}

/// Per-track values for the `RTP-Info` header of a PLAY response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpInfo {
    pub track_id: u8,
    pub url: String,
    pub seq: u16,
    pub rtptime: u32,
}

/// Response builder for the serve side.
#[derive(Debug, Clone)]
pub struct ServerMessages {
    server: String,
}

impl ServerMessages {
    pub fn new(app_name: &str, app_version: &str) -> Self {
        Self {
            server: format!("{}/{}", app_name, app_version),
        }
    }

    pub fn options(&self, cseq: Option<u32>) -> String {
        ResponseBuilder::new(200, cseq)
            .header("Public", ALLOWED_METHODS)
            .build(&self.server)
    }

    pub fn describe(&self, cseq: Option<u32>, base_uri: &str, sdp: String) -> String {
        ResponseBuilder::new(200, cseq)
            .header("Content-Base", format!("{}/", base_uri.trim_end_matches('/')))
            .header("Content-Type", "application/sdp")
            .body(sdp)
            .build(&self.server)
    }

    pub fn setup(&self, cseq: Option<u32>, session_id: &str, transport: &TransportHeader) -> String {
        ResponseBuilder::new(200, cseq)
            .session(session_id, Some(SESSION_TIMEOUT_SECS))
            .header("Transport", transport.to_string())
            .build(&self.server)
    }

    pub fn play(&self, cseq: Option<u32>, session_id: &str, tracks: &[RtpInfo]) -> String {
        let mut tracks = tracks.to_vec();
        tracks.sort_by_key(|t| t.track_id);
        let rtp_info = tracks
            .iter()
            .map(|t| format!("url={};seq={};rtptime={}", t.url, t.seq, t.rtptime))
            .collect::<Vec<_>>()
            .join(",");
        let mut builder = ResponseBuilder::new(200, cseq)
            .session(session_id, None)
            .header("Range", "npt=0.000-");
        if !rtp_info.is_empty() {
            builder = builder.header("RTP-Info", rtp_info);
        }
        builder.build(&self.server)
    }

    /// Plain 200 for PAUSE, TEARDOWN and GET_PARAMETER.
    pub fn ok(&self, cseq: Option<u32>, session_id: Option<&str>) -> String {
        let builder = ResponseBuilder::new(200, cseq);
        match session_id.filter(|s| !s.is_empty()) {
            Some(id) => builder.session(id, None),
            None => builder,
        }
        .build(&self.server)
    }

    pub fn error(&self, code: u16, cseq: Option<u32>) -> String {
        let mut builder = ResponseBuilder::new(code, cseq);
        if code == 405 {
            builder = builder.header("Allow", ALLOWED_METHODS).header("Public", ALLOWED_METHODS);
        }
        if code == 503 {
            builder = builder.header("Retry-After", RETRY_AFTER_SECS.to_string());
        }
        builder.build(&self.server)
    }
}
