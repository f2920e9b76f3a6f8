//! Outbound transport for one `RtpStream`: a UDP destination pair or two
//! TCP-interleaved channel numbers multiplexed onto the owning RTSP
//! session's socket.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::net::IoOutcome;

/// Upper bound on unacknowledged packets retained for retransmission
///; oldest entries are dropped once exceeded
/// rather than growing without bound under a client that never acks.
const RELIABLE_UDP_MAX_PENDING: usize = 512;

struct PendingPacket {
    seq: u16,
    sent_at: Instant,
    bytes: Vec<u8>,
}

/// Implemented by whatever owns the RTSP TCP socket (the `RtspSession`),
/// so an `RtpStream` can write interleaved frames without owning the
/// socket itself.
pub trait InterleavedSink: Send + Sync {
    /// Attempt to write one `$`-framed chunk. A `try_lock` failure on the
    /// session mutex (another task mid-write) is surfaced as
    /// `IoOutcome::Pending`.
    fn send_frame(&self, channel: u8, payload: &[u8]) -> io::Result<IoOutcome>;
}

/// One direction's wire destination: a UDP socket/peer pair, or an
/// interleaved channel on a shared TCP sink.
pub enum Destination {
    Udp {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
    /// "our-retransmit" reliable UDP: every sent
    /// RTP packet is retained until the client's cumulative RTCP RR ack
    /// (the "highest sequence number received" field) passes it, and
    /// blindly re-sent once it has sat unacknowledged past `ack_timeout`.
    ReliableUdp {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        ack_timeout: Duration,
        pending: Mutex<VecDeque<PendingPacket>>,
    },
    Interleaved {
        sink: Arc<dyn InterleavedSink>,
        channel: u8,
    },
}

impl Destination {
    pub fn send(&self, payload: &[u8]) -> io::Result<IoOutcome> {
        match self {
            Destination::Udp { socket, peer } => {
                match socket.send_to(payload, peer) {
                    Ok(n) => Ok(IoOutcome::Done(n)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoOutcome::Pending),
                    Err(e) => Err(e),
                }
            }
            Destination::ReliableUdp { socket, peer, pending, .. } => {
                match socket.send_to(payload, peer) {
                    Ok(n) => {
                        if payload.len() >= 4 {
                            let seq = u16::from_be_bytes([payload[2], payload[3]]);
                            let mut pending = pending.lock();
                            if pending.len() >= RELIABLE_UDP_MAX_PENDING {
                                pending.pop_front();
                            }
                            pending.push_back(PendingPacket {
                                seq,
                                sent_at: Instant::now(),
                                bytes: payload.to_vec(),
                            });
                        }
                        Ok(IoOutcome::Done(n))
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoOutcome::Pending),
                    Err(e) => Err(e),
                }
            }
            Destination::Interleaved { sink, channel } => sink.send_frame(*channel, payload),
        }
    }

    /// Re-send anything still unacknowledged past its `ack_timeout`. A
    /// no-op for non-reliable destinations.
    pub fn retransmit_overdue(&self) -> io::Result<usize> {
        let Destination::ReliableUdp { socket, peer, ack_timeout, pending } = self else {
            return Ok(0);
        };
        let now = Instant::now();
        let mut resent = 0;
        for packet in pending.lock().iter_mut() {
            if now.duration_since(packet.sent_at) >= *ack_timeout {
                socket.send_to(&packet.bytes, peer)?;
                packet.sent_at = now;
                resent += 1;
            }
        }
        Ok(resent)
    }

    /// Drop every pending packet at or before `highest_seq`, the
    /// cumulative ack recovered from the client's RTCP RR.
    pub fn acknowledge_through(&self, highest_seq: u16) {
        if let Destination::ReliableUdp { pending, .. } = self {
            pending
                .lock()
                .retain(|p| (p.seq.wrapping_sub(highest_seq) as i16) > 0);
        }
    }
}

/// The RTP and RTCP destinations for one client track.
pub struct RtpTransport {
    pub rtp: Destination,
    pub rtcp: Destination,
}

impl RtpTransport {
    pub fn new_udp(rtp_socket: UdpSocket, rtcp_socket: UdpSocket, client_rtp: SocketAddr, client_rtcp: SocketAddr) -> Self {
        Self::new_udp_with_reliability(rtp_socket, rtcp_socket, client_rtp, client_rtcp, None)
    }

    /// Like [`Self::new_udp`], but if `ack_timeout` is `Some`, the RTP
    /// destination retains and retransmits unacknowledged packets, per
    /// the `x-Retransmit: our-retransmit` transport option. RTCP is
    /// never made reliable.
    pub fn new_udp_with_reliability(
        rtp_socket: UdpSocket,
        rtcp_socket: UdpSocket,
        client_rtp: SocketAddr,
        client_rtcp: SocketAddr,
        ack_timeout: Option<Duration>,
    ) -> Self {
        let rtp = match ack_timeout {
            Some(ack_timeout) => Destination::ReliableUdp {
                socket: Arc::new(rtp_socket),
                peer: client_rtp,
                ack_timeout,
                pending: Mutex::new(VecDeque::new()),
            },
            None => Destination::Udp {
                socket: Arc::new(rtp_socket),
                peer: client_rtp,
            },
        };
        Self {
            rtp,
            rtcp: Destination::Udp {
                socket: Arc::new(rtcp_socket),
                peer: client_rtcp,
            },
        }
    }

    pub fn new_interleaved(sink: Arc<dyn InterleavedSink>, rtp_channel: u8, rtcp_channel: u8) -> Self {
        Self {
            rtp: Destination::Interleaved {
                sink: sink.clone(),
                channel: rtp_channel,
            },
            rtcp: Destination::Interleaved {
                sink,
                channel: rtcp_channel,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        frames: Mutex<Vec<(u8, Vec<u8>)>>,
    }

    impl InterleavedSink for RecordingSink {
        fn send_frame(&self, channel: u8, payload: &[u8]) -> io::Result<IoOutcome> {
            self.frames.lock().unwrap().push((channel, payload.to_vec()));
            Ok(IoOutcome::Done(payload.len()))
        }
    }

    #[test]
    fn interleaved_destination_routes_to_sink_with_channel() {
        let sink = Arc::new(RecordingSink { frames: Mutex::new(Vec::new()) });
        let transport = RtpTransport::new_interleaved(sink.clone(), 0, 1);
        transport.rtp.send(b"hello").unwrap();
        transport.rtcp.send(b"bye").unwrap();
        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames[0], (0, b"hello".to_vec()));
        assert_eq!(frames[1], (1, b"bye".to_vec()));
    }
}
