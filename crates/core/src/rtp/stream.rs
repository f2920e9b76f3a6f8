//! Per-track, per-client outbound RTP state.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::reflector::output::{Poll as OutputPoll, ReflectorOutput};
use crate::reflector::ring::Channel;
use crate::reflector::thinning::MAX_QUALITY_LEVEL;
use crate::rtp::header::{rebase_sequence, rebase_timestamp, rewrite_header, RtpHeaderView};
use crate::rtp::rtcp::{build_sender_report, is_receiver_report};
use crate::rtp::transport::RtpTransport;

/// Minimum interval between RTCP sender reports per stream.
const SENDER_REPORT_INTERVAL_MS: u64 = 7_000;
/// RTCP RR fraction-lost (RFC 3550 §6.4.1, 8-bit fixed point) above which
/// the output's thinning level is raised.
const LOSS_RAISE_THRESHOLD: u8 = (0.05 * 256.0) as u8;
/// Fraction-lost below which the thinning level is lowered (hysteresis
/// band below the raise threshold).
const LOSS_LOWER_THRESHOLD: u8 = (0.01 * 256.0) as u8;

/// Result of one scheduler pass over a stream's pending packets.
pub struct PumpOutcome {
    pub sent: usize,
    /// `true` if the transport returned `Pending` and this stream wants
    /// a writable-event wakeup to resume draining.
    pub flow_controlled: bool,
}

/// Outbound RTP/RTCP state for one track of one client `RtpSession`.
pub struct RtpStream {
    pub track_id: usize,
    output: Arc<ReflectorOutput>,
    transport: RtpTransport,
    ssrc: u32,
    seq_offset: u16,
    ts_offset: u32,
    /// `(input_seq_base, input_ts_base)`, captured from the first packet
    /// actually forwarded to this output.
    base: Mutex<Option<(u16, u32)>>,
    last_sr_sent_ms: AtomicU64,
    /// RFC 3550 §6.4.1 8-bit fixed-point fraction lost, most recently
    /// reported by the client's RTCP RR.
    receiver_loss_fraction: AtomicU8,
    quality_level: AtomicU32,
}

impl RtpStream {
    pub fn new(
        track_id: usize,
        output: Arc<ReflectorOutput>,
        transport: RtpTransport,
        ssrc: u32,
        seq_offset: u16,
        ts_offset: u32,
    ) -> Self {
        Self {
            track_id,
            output,
            transport,
            ssrc,
            seq_offset,
            ts_offset,
            base: Mutex::new(None),
            last_sr_sent_ms: AtomicU64::new(0),
            receiver_loss_fraction: AtomicU8::new(0),
            quality_level: AtomicU32::new(0),
        }
    }

    pub fn output(&self) -> &Arc<ReflectorOutput> {
        &self.output
    }

    /// Whether this stream's RTP destination is reliable UDP and
    /// therefore needs a periodic tick to notice overdue retransmits
    /// even with no new packets arriving.
    pub fn needs_retransmit_tick(&self) -> bool {
        matches!(self.transport.rtp, crate::rtp::transport::Destination::ReliableUdp { .. })
    }

    /// Drain as many ring packets as are ready, rewriting and
    /// transmitting each. Stops at the first `WOULD_BLOCK`; the
    /// output's cursor is rolled back explicitly so the un-sent packet
    /// is retried rather than skipped.
    pub fn pump(&self) -> io::Result<PumpOutcome> {
        let mut sent = 0usize;
        loop {
            match self.output.poll() {
                OutputPoll::Empty | OutputPoll::StreamGone => {
                    return Ok(PumpOutcome {
                        sent,
                        flow_controlled: false,
                    });
                }
                OutputPoll::Packet(packet) => {
                    let mut bytes = packet.bytes;
                    let destination = match packet.channel {
                        Channel::Rtp => {
                            if let Some(header) = RtpHeaderView::parse(&bytes) {
                                let mut base = self.base.lock();
                                let (seq_base, ts_base) = *base.get_or_insert((header.sequence, header.timestamp));
                                drop(base);
                                let seq = rebase_sequence(header.sequence, seq_base, self.seq_offset);
                                let ts = rebase_timestamp(header.timestamp, ts_base, self.ts_offset);
                                rewrite_header(&mut bytes, self.ssrc, seq, ts);
                            }
                            &self.transport.rtp
                        }
                        Channel::Rtcp => &self.transport.rtcp,
                    };

                    match destination.send(&bytes)? {
                        crate::net::IoOutcome::Done(_) => sent += 1,
                        crate::net::IoOutcome::Pending => {
                            return Ok(PumpOutcome {
                                sent,
                                flow_controlled: true,
                            });
                        }
                        crate::net::IoOutcome::Closed => {
                            return Ok(PumpOutcome {
                                sent,
                                flow_controlled: false,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Emit a rebased RTCP sender report if one is cached and the
    /// minimum interval has elapsed.
    pub fn maybe_send_sender_report(&self, now_ms: u64, reflector_stream: &crate::reflector::ReflectorStream) -> io::Result<()> {
        let last = self.last_sr_sent_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < SENDER_REPORT_INTERVAL_MS {
            return Ok(());
        }
        let Some(cache) = reflector_stream.cached_sender_report() else {
            return Ok(());
        };
        let ts_offset = self
            .base
            .lock()
            .map(|(_, ts_base)| self.ts_offset.wrapping_sub(ts_base))
            .unwrap_or(self.ts_offset);
        let report = build_sender_report(self.ssrc, &cache, ts_offset);
        self.transport.rtcp.send(&report)?;
        self.last_sr_sent_ms.store(now_ms, Ordering::Relaxed);
        Ok(())
    }

    /// Feed an inbound RTCP receiver report's fraction-lost field into
    /// the congestion-adaptive thinning level, and its cumulative "highest sequence number received"
    /// into the reliable-UDP ack cursor, if this stream uses it.
    pub fn record_receiver_feedback(&self, rtcp_bytes: &[u8]) {
        if !is_receiver_report(rtcp_bytes) || rtcp_bytes.len() < 12 {
            return;
        }
        let fraction_lost = rtcp_bytes[12];
        self.receiver_loss_fraction.store(fraction_lost, Ordering::Relaxed);

        let current = self.quality_level.load(Ordering::Relaxed) as u8;
        if fraction_lost > LOSS_RAISE_THRESHOLD && current < MAX_QUALITY_LEVEL {
            self.set_quality_level(current + 1);
        } else if fraction_lost < LOSS_LOWER_THRESHOLD && current > 0 {
            self.set_quality_level(current - 1);
        }

        if rtcp_bytes.len() >= 20 {
            let highest_seq = u16::from_be_bytes([rtcp_bytes[18], rtcp_bytes[19]]);
            self.transport.rtp.acknowledge_through(highest_seq);
        }
    }

    /// Re-send anything still unacknowledged past its ack-timeout on a
    /// reliable-UDP RTP destination; a no-op
    /// otherwise. Called once per scheduler tick alongside `pump`.
    pub fn retransmit_overdue(&self) -> io::Result<()> {
        self.transport.rtp.retransmit_overdue()?;
        Ok(())
    }

    fn set_quality_level(&self, level: u8) {
        self.quality_level.store(level as u32, Ordering::Relaxed);
        self.output.set_quality_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflector::ReflectorStream;
    use crate::reflector::thinning::Codec;
    use crate::runtime::{Action, Task, WorkerPool};
    use crate::rtp::transport::{Destination, InterleavedSink};
    use std::sync::Mutex as StdMutex;

    struct Noop;
    impl Task for Noop {
        fn run(&self, _events: u8) -> Action {
            Action::SleepForever
        }
    }

    struct RecordingSink {
        frames: StdMutex<Vec<(u8, Vec<u8>)>>,
    }
    impl InterleavedSink for RecordingSink {
        fn send_frame(&self, channel: u8, payload: &[u8]) -> io::Result<crate::net::IoOutcome> {
            self.frames.lock().unwrap().push((channel, payload.to_vec()));
            Ok(crate::net::IoOutcome::Done(payload.len()))
        }
    }

    fn rtp_packet(seq: u16, ts: u32) -> Vec<u8> {
        let mut bytes = vec![0x80, 0x60, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        bytes[2..4].copy_from_slice(&seq.to_be_bytes());
        bytes[4..8].copy_from_slice(&ts.to_be_bytes());
        bytes.extend_from_slice(b"x");
        bytes
    }

    #[test]
    fn pump_rewrites_and_forwards_via_interleaved_sink() {
        let reflector_stream = ReflectorStream::new(0, Codec::H264, 16);
        let pool = WorkerPool::start(1);
        let handle = pool.spawn(std::sync::Arc::new(Noop));
        let output = ReflectorOutput::new(&reflector_stream, handle, 0);

        let sink = std::sync::Arc::new(RecordingSink { frames: StdMutex::new(Vec::new()) });
        let transport = RtpTransport::new_interleaved(sink.clone(), 0, 1);
        let rtp_stream = RtpStream::new(0, output, transport, 0xCAFEBABE, 1000, 500_000);

        reflector_stream.push(Channel::Rtp, 0, rtp_packet(10, 90_000));
        reflector_stream.push(Channel::Rtp, 0, rtp_packet(11, 93_000));

        let outcome = rtp_stream.pump().unwrap();
        assert_eq!(outcome.sent, 2);
        assert!(!outcome.flow_controlled);

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        let first = RtpHeaderView::parse(&frames[0].1).unwrap();
        assert_eq!(first.sequence, 1000); // base packet: offset applied, no delta
        assert_eq!(first.ssrc, 0xCAFEBABE);
        let second = RtpHeaderView::parse(&frames[1].1).unwrap();
        assert_eq!(second.sequence, 1001);
        assert_eq!(second.timestamp, 93_000 - 90_000 + 500_000);

        pool.shutdown();
    }

    #[test]
    fn receiver_feedback_raises_quality_level_on_high_loss() {
        let reflector_stream = ReflectorStream::new(0, Codec::H264, 16);
        let pool = WorkerPool::start(1);
        let handle = pool.spawn(std::sync::Arc::new(Noop));
        let output = ReflectorOutput::new(&reflector_stream, handle, 0);
        let transport = RtpTransport {
            rtp: Destination::Udp {
                socket: std::sync::Arc::new(std::net::UdpSocket::bind("127.0.0.1:0").unwrap()),
                peer: "127.0.0.1:1".parse().unwrap(),
            },
            rtcp: Destination::Udp {
                socket: std::sync::Arc::new(std::net::UdpSocket::bind("127.0.0.1:0").unwrap()),
                peer: "127.0.0.1:1".parse().unwrap(),
            },
        };
        let rtp_stream = RtpStream::new(0, output, transport, 1, 0, 0);

        let mut rr = vec![0x81, 201, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        rr.push(200); // fraction lost ~78%
        rr.extend_from_slice(&[0u8; 19]);
        rtp_stream.record_receiver_feedback(&rr);
        assert_eq!(rtp_stream.quality_level.load(Ordering::Relaxed), 1);

        pool.shutdown();
    }
}
