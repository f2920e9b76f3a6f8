//! Per-track ingestion and fan-out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::reflector::output::ReflectorOutput;
use crate::reflector::ring::{BufferedPacket, Channel, RingBuffer};
use crate::reflector::thinning::Codec;
use crate::rtp::rtcp::SenderReportCache;

/// One track of a [`crate::reflector::session::ReflectorSession`]: owns
/// the bounded packet ring, the cached sender report, and the set of
/// attached outputs it signals on arrival.
pub struct ReflectorStream {
    pub track_id: usize,
    pub codec: Codec,
    ring: Mutex<RingBuffer>,
    last_sr: Mutex<Option<SenderReportCache>>,
    outputs: Mutex<Vec<Weak<ReflectorOutput>>>,
    /// Whether a push (`fSetupToReceive`) route has already been claimed
    /// for this track.
    push_setup: AtomicBool,
}

impl ReflectorStream {
    pub fn new(track_id: usize, codec: Codec, bucket_size: usize) -> Arc<Self> {
        Arc::new(Self {
            track_id,
            codec,
            ring: Mutex::new(RingBuffer::new(bucket_size)),
            last_sr: Mutex::new(None),
            outputs: Mutex::new(Vec::new()),
            push_setup: AtomicBool::new(false),
        })
    }

    /// Claim the push-ingestion slot for this track. Returns `false` if
    /// one is already claimed.
    pub fn try_claim_push_setup(&self) -> bool {
        self.push_setup
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_push_setup(&self) {
        self.push_setup.store(false, Ordering::Release);
    }

    /// The oldest still-retained RTP packet, if any — used to probe
    /// `RTP-Info` sequence/timestamp at PLAY time.
    pub fn first_buffered_rtp(&self) -> Option<BufferedPacket> {
        let ring = self.ring.lock();
        let base = ring.base_index();
        (base..ring.write_cursor()).find_map(|idx| {
            ring.get(idx)
                .filter(|p| p.channel == Channel::Rtp)
                .cloned()
        })
    }

    /// Attach an output so it gets woken on ingestion. Stale (dropped)
    /// entries are swept opportunistically.
    pub fn attach_output(&self, output: &Arc<ReflectorOutput>) {
        let mut outputs = self.outputs.lock();
        outputs.retain(|w| w.strong_count() > 0);
        outputs.push(Arc::downgrade(output));
    }

    pub fn detach_output(&self, output: &Arc<ReflectorOutput>) {
        let mut outputs = self.outputs.lock();
        outputs.retain(|w| !std::ptr::eq(w.as_ptr(), Arc::as_ptr(output)));
    }

    /// Ingest a single packet: copy into the ring, then wake
    /// every attached output's scheduler task.
    pub fn push(&self, channel: Channel, arrival_ms: u64, bytes: Vec<u8>) {
        let (rtp_sequence, rtp_timestamp) = if channel == Channel::Rtp && bytes.len() >= 8 {
            (
                u16::from_be_bytes([bytes[2], bytes[3]]),
                u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            )
        } else {
            (0, 0)
        };

        {
            let mut ring = self.ring.lock();
            ring.push(BufferedPacket {
                channel,
                arrival_ms,
                rtp_sequence,
                rtp_timestamp,
                bytes,
            });
        }

        let outputs: Vec<Arc<ReflectorOutput>> = {
            let mut outputs = self.outputs.lock();
            outputs.retain(|w| w.strong_count() > 0);
            outputs.iter().filter_map(Weak::upgrade).collect()
        };
        for output in outputs {
            output.notify_readable();
        }
    }

    /// Cache a parsed RTCP sender report from the ingest side, to be
    /// transformed and re-emitted by each output.
    pub fn record_sender_report(&self, sr: SenderReportCache) {
        *self.last_sr.lock() = Some(sr);
    }

    pub fn cached_sender_report(&self) -> Option<SenderReportCache> {
        self.last_sr.lock().clone()
    }

    pub(crate) fn ring(&self) -> &Mutex<RingBuffer> {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflector::ring::Channel;

    #[test]
    fn push_records_sequence_and_timestamp() {
        let stream = ReflectorStream::new(0, Codec::H264, 16);
        let mut rtp = vec![0x80, 0x60, 0x00, 0x2A, 0x00, 0x00, 0x03, 0xE8];
        rtp.extend_from_slice(&[0u8; 4]); // ssrc
        stream.push(Channel::Rtp, 1000, rtp);
        let ring = stream.ring().lock();
        let packet = ring.get(0).unwrap();
        assert_eq!(packet.rtp_sequence, 0x2A);
        assert_eq!(packet.rtp_timestamp, 0x3E8);
    }
}
