//! RTSP control plane: request/response types, interleaved framing,
//! authentication, and the per-connection session state machine.

pub mod auth;
pub mod interleave;
pub mod request;
pub mod response;
pub mod session;

pub use auth::{AllowAll, AuthProvider, UserProfile};
pub use interleave::{InterleaveScanner, InterleaveWriter, InterleavedFrame, ScanItem};
pub use request::RtspRequest;
pub use response::{RtspResponse, status_for_error};
pub use session::{RtspSession, ServerContext};
