//! RTP session/stream transmission plane.

pub mod header;
pub mod rtcp;
pub mod session;
pub mod stream;
pub mod transport;

pub use session::{PlaybackState, RtpSession};
pub use stream::RtpStream;
pub use transport::RtpTransport;
