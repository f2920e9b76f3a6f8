//! The reflector: per-presentation ingestion, buffering and fan-out.

pub mod output;
pub mod ring;
pub mod session;
pub mod stream;
pub mod thinning;

pub use output::ReflectorOutput;
pub use ring::{BufferedPacket, Channel};
pub use session::ReflectorSession;
pub use stream::ReflectorStream;
