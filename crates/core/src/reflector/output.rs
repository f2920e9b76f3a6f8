//! The adapter binding one `ReflectorStream` to one client's outbound
//! RTP stream.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;

use crate::reflector::ring::{BufferedPacket, Channel};
use crate::reflector::stream::ReflectorStream;
use crate::reflector::thinning::{classify_h264, Codec, FrameKind, ThinningState};
use crate::runtime::{TaskHandle, event};

/// Outcome of polling an output for its next forwardable packet.
pub enum Poll {
    Packet(BufferedPacket),
    /// Nothing new since the last poll.
    Empty,
    /// The backing stream is gone (session torn down).
    StreamGone,
}

/// Per-client read cursor and thinning state into one `ReflectorStream`.
pub struct ReflectorOutput {
    stream: Weak<ReflectorStream>,
    notifier: TaskHandle,
    cursor: AtomicU64,
    lost_packets: AtomicU64,
    quality_level: AtomicU8,
    thinning: Mutex<ThinningState>,
}

impl ReflectorOutput {
    pub fn new(stream: &std::sync::Arc<ReflectorStream>, notifier: TaskHandle, initial_quality: u8) -> std::sync::Arc<Self> {
        let output = std::sync::Arc::new(Self {
            stream: std::sync::Arc::downgrade(stream),
            notifier,
            cursor: AtomicU64::new(stream.ring().lock().write_cursor()),
            lost_packets: AtomicU64::new(0),
            quality_level: AtomicU8::new(initial_quality),
            thinning: Mutex::new(ThinningState::new(initial_quality)),
        });
        stream.attach_output(&output);
        output
    }

    /// Upgrade the weak back-reference to the owning stream, if it's
    /// still alive. Used to reach the stream's cached sender report.
    pub fn reflector_stream(&self) -> Option<std::sync::Arc<ReflectorStream>> {
        self.stream.upgrade()
    }

    pub fn detach(self: &std::sync::Arc<Self>) {
        if let Some(stream) = self.stream.upgrade() {
            stream.detach_output(self);
        }
    }

    pub fn set_quality_level(&self, level: u8) {
        self.quality_level.store(level, Ordering::Relaxed);
        self.thinning.lock().set_level(level);
    }

    pub fn lost_packets(&self) -> u64 {
        self.lost_packets.load(Ordering::Relaxed)
    }

    /// Called by the owning `ReflectorStream` on ingestion to wake the
    /// client's RTP scheduler task.
    pub(crate) fn notify_readable(&self) {
        self.notifier.signal(event::READABLE);
    }

    /// Pull the next packet this output should forward, applying gap
    /// accounting and congestion thinning. Thinned-out packets are
    /// silently skipped (the loop continues to the next ring entry).
    pub fn poll(&self) -> Poll {
        let Some(stream) = self.stream.upgrade() else {
            return Poll::StreamGone;
        };

        loop {
            let ring = stream.ring().lock();
            let mut cursor = self.cursor.load(Ordering::Acquire);

            if cursor < ring.base_index() {
                let lost = ring.base_index() - cursor;
                self.lost_packets.fetch_add(lost, Ordering::Relaxed);
                cursor = ring.base_index();
            }

            if cursor >= ring.write_cursor() {
                self.cursor.store(cursor, Ordering::Release);
                return Poll::Empty;
            }

            let packet = ring.get(cursor).expect("cursor within retained range").clone();
            drop(ring);
            self.cursor.store(cursor + 1, Ordering::Release);

            if packet.channel != Channel::Rtp || packet.bytes.len() < 12 {
                return Poll::Packet(packet);
            }

            let kind = match stream.codec {
                Codec::H264 => classify_h264(&packet.bytes[12..]),
                Codec::Other => FrameKind::Other,
            };

            if self.thinning.lock().admit(kind) {
                return Poll::Packet(packet);
            }
            // Dropped by thinning: loop around for the next packet.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflector::thinning::Codec;

    fn idr_rtp(seq: u16) -> Vec<u8> {
        let mut bytes = vec![0x80, 0x60, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x65, 0x88, 0x84];
        bytes[2..4].copy_from_slice(&seq.to_be_bytes());
        bytes
    }

    #[test]
    fn poll_returns_empty_when_caught_up() {
        let stream = ReflectorStream::new(0, Codec::H264, 8);
        let pool = crate::runtime::WorkerPool::start(1);
        struct Noop;
        impl crate::runtime::Task for Noop {
            fn run(&self, _events: u8) -> crate::runtime::Action {
                crate::runtime::Action::SleepForever
            }
        }
        let handle = pool.spawn(std::sync::Arc::new(Noop));
        let output = ReflectorOutput::new(&stream, handle, 0);
        assert!(matches!(output.poll(), Poll::Empty));
        stream.push(Channel::Rtp, 0, idr_rtp(1));
        assert!(matches!(output.poll(), Poll::Packet(_)));
        assert!(matches!(output.poll(), Poll::Empty));
        pool.shutdown();
    }

    #[test]
    fn tracks_loss_on_eviction_before_read() {
        let stream = ReflectorStream::new(0, Codec::H264, 4);
        let pool = crate::runtime::WorkerPool::start(1);
        struct Noop;
        impl crate::runtime::Task for Noop {
            fn run(&self, _events: u8) -> crate::runtime::Action {
                crate::runtime::Action::SleepForever
            }
        }
        let handle = pool.spawn(std::sync::Arc::new(Noop));
        let output = ReflectorOutput::new(&stream, handle, 0);
        for i in 0..20u16 {
            stream.push(Channel::Rtp, 0, idr_rtp(i));
        }
        output.poll();
        assert!(output.lost_packets() > 0);
        pool.shutdown();
    }
}
