//! Error types for the reflector library.

use std::fmt;

/// Errors that can occur anywhere in the reflector stack.
///
/// Variants map to the error kinds from the error-handling design: parse
/// errors, authorization errors, state errors, resource errors, capacity
/// errors and duplicate-push errors each have a direct status-code mapping
/// in [`crate::rtsp::response::status_for_error`].
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Failed to parse or validate an SDP body.
    #[error("SDP error: {0}")]
    Sdp(String),

    /// An ANNOUNCE body parsed as SDP but carried no `m=` line.
    #[error("SDP has no media description")]
    NoMedia,

    /// No session with the given ID exists in the registry.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No presentation registered under this key.
    #[error("presentation not found: {0}")]
    PresentationNotFound(String),

    /// SETUP referenced a track ID that doesn't exist on the presentation.
    #[error("unknown track: {0}")]
    UnknownTrack(u32),

    /// A method was invoked out of order for the session's current state
    /// (e.g. PLAY before SETUP, SETUP after PLAY).
    #[error("session state error: {0}")]
    State(String),

    /// SETUP has not been completed for this session (no transport negotiated).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// The `Transport` header did not name a spec the server understands.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// A second RECORD/ANNOUNCE arrived for a presentation that already has
    /// a live broadcaster and duplicates are not permitted.
    #[error("duplicate broadcast rejected for: {0}")]
    DuplicateBroadcast(String),

    /// A second SETUP arrived for a track that is already set up on a pull
    /// session (459 Aggregate Option Not Allowed).
    #[error("track already set up: {0}")]
    AggregateNotAllowed(u32),

    /// Authentication failed or was not presented.
    #[error("authentication required")]
    Unauthorized,

    /// Authenticated but not permitted to perform the action.
    #[error("forbidden")]
    Forbidden,

    /// UDP or bandwidth/connection capacity exhausted.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Server-side UDP port allocation exhausted its configured range.
    #[error("UDP port range exhausted")]
    PortRangeExhausted,

    /// [`crate::server::Server::start`] has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`crate::server::Server::start`] was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` bytes were not fully available yet; caller should
    /// keep reading rather than treat this as a hard failure.
    IncompleteBody,
    /// `Content-Length` value was not a valid integer.
    InvalidContentLength,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::IncompleteBody => write!(f, "incomplete body"),
            Self::InvalidContentLength => write!(f, "invalid content-length"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
