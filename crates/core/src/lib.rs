//! # reflector — RTSP/RTP reflector for live media streaming
//!
//! Accepts live media pushed by one broadcaster (ANNOUNCE + RECORD) and
//! retransmits each track's RTP packets to many pull clients (DESCRIBE +
//! SETUP + PLAY) over UDP, reliable UDP, or RTP-over-RTSP interleaved TCP.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet header rewriting, sender/receiver reports |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Normalization on ANNOUNCE, rewriting on DESCRIBE |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │  Server          — listener threads, ServerContext │
//! ├───────────────────────────────────────────────────┤
//! │  rtsp            — codec, interleaving, state machine
//! │  registry        — PresentationKey -> ReflectorSession
//! ├───────────────────────────────────────────────────┤
//! │  reflector       — ingestion ring, fan-out, thinning
//! │  rtp             — per-client scheduler, transport
//! ├───────────────────────────────────────────────────┤
//! │  net             — UDP pool, shared I/O outcome type
//! │  runtime         — cooperative task pool + timers
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use reflector::{Server, ServerConfig};
//!
//! let config = ServerConfig::default().with_rtsp_ports(vec![8554]);
//! let mut server = Server::with_config(config);
//! server.start().unwrap();
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — [`Server`] orchestrator, binds the configured ports.
//! - [`config`] — [`ServerConfig`] and its documented defaults.
//! - [`registry`] — [`registry::SessionRegistry`], [`registry::PresentationKey`], [`registry::SdpCache`].
//! - [`reflector`] — ingestion ring, per-track fan-out, congestion thinning.
//! - [`rtp`] — per-client RTP scheduler, outbound transport, RTCP.
//! - [`rtsp`] — request/response codec, interleaved framing, the session state machine.
//! - [`net`] — the UDP port-pair pool and the [`net::IoOutcome`] type
//!   shared by its non-blocking sends and the RTP transports.
//! - [`runtime`] — the cooperative task runtime every long-lived object runs on.
//! - [`sdp`] — SDP parsing, normalization, and DESCRIBE-time rewriting.
//! - [`error`] — [`RtspError`] and [`Result`].

pub mod config;
pub mod error;
pub mod net;
pub mod reflector;
pub mod registry;
pub mod rtp;
pub mod rtsp;
pub mod runtime;
pub mod sdp;
pub mod server;

pub use config::ServerConfig;
pub use error::{Result, RtspError};
pub use server::Server;
