//! Socket I/O shared types.
//!
//! TCP connections carry RTSP signaling (and, for interleaved clients,
//! framed RTP/RTCP) over a blocking per-connection socket, one thread per
//! [`crate::rtsp::session::RtspSession`] — the same synchronous model the
//! teacher crate uses. UDP socket pairs carry RTP media to pull clients
//! and from a push broadcaster when it chose UDP transport; those sends
//! are non-blocking and surface `WouldBlock` as [`IoOutcome::Pending`]
//! rather than parking a worker thread, since they're driven from the RTP
//! scheduler task rather than a dedicated reader thread.

pub mod udp_pool;

/// Outcome of a single non-blocking I/O attempt.
#[derive(Debug)]
pub enum IoOutcome {
    /// `n` bytes were transferred.
    Done(usize),
    /// The operation would have blocked; caller should retry once the
    /// socket becomes ready again.
    Pending,
    /// The peer closed the connection.
    Closed,
}
