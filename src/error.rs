use std::num::ParseIntError;
use thiserror::Error;

/// Errors raised while building, parsing or moving media.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("timeout")]
    Timeout,

    #[error("tls error: {0}")]
    Tls(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<tokio::time::error::Elapsed> for StreamError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StreamError::Timeout
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors surfaced to the host through the session state.
///
/// Values are compared to decide whether the host must be notified again,
/// so every variant is `Clone + PartialEq`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A precondition of the requested operation does not hold.
    #[error("setup error: {0}")]
    Setup(String),

    /// The control connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected the supplied credentials.
    #[error("authentication failed")]
    Auth,

    /// The server requires credentials and none were configured.
    #[error("server requires credentials")]
    NoCredentials,

    /// The server answered 403.
    #[error("access denied")]
    AccessDenied,

    /// Non-2xx RTSP status outside of the auth retry path.
    #[error("{0}")]
    Failed(String),

    /// No network interface qualified for the serve listener.
    #[error("no network address to bind")]
    AddressNotFound,

    /// Anything unexpected caught at the controller boundary.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl SessionError {
    /// True for the errors a publish session reports about its remote server.
    ///
    /// These stay in the view state but never raise a host notification.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SessionError::Connection(_)
                | SessionError::Auth
                | SessionError::NoCredentials
                | SessionError::AccessDenied
                | SessionError::Failed(_)
        )
    }
}

impl From<StreamError> for SessionError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Session(e) => e,
            StreamError::InvalidAddress(_) => SessionError::Connection("Invalid address".into()),
            StreamError::Timeout => SessionError::Connection("Timeout".into()),
            StreamError::Tls(_) => SessionError::Connection("TLS error".into()),
            StreamError::Io(e) => SessionError::Connection(e.to_string()),
            StreamError::Protocol(msg) => SessionError::Failed(msg),
            other => SessionError::Unknown(other.to_string()),
        }
    }
}
