//! One active presentation: owns the parsed SDP and the
//! per-track `ReflectorStream`s, shared by the broadcaster's and every
//! subscriber's `RtpSession`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::reflector::stream::ReflectorStream;
use crate::reflector::thinning::Codec;
use crate::sdp::Sdp;

pub struct ReflectorSession {
    sdp: Sdp,
    streams: Vec<Arc<ReflectorStream>>,
    has_broadcaster: AtomicBool,
}

impl ReflectorSession {
    /// Build a session from a parsed SDP, one `ReflectorStream` per media
    /// block in declaration order. `is_push_session` seeds whether a
    /// broadcaster is already attached (an ANNOUNCE-created session
    /// starts `true`; a session materialized only by pull SETUPs against
    /// an as-yet-unseen presentation would start `false`).
    pub fn new(sdp: Sdp, bucket_size: usize, is_push_session: bool) -> Self {
        let streams = sdp
            .media
            .iter()
            .enumerate()
            .map(|(idx, block)| {
                let codec = block
                    .lines
                    .iter()
                    .find(|l| l.kind == b'a' && l.value.starts_with("rtpmap:"))
                    .map(|l| Codec::from_rtpmap(&l.value))
                    .unwrap_or(Codec::Other);
                ReflectorStream::new(idx, codec, bucket_size)
            })
            .collect();

        Self {
            sdp,
            streams,
            has_broadcaster: AtomicBool::new(is_push_session),
        }
    }

    pub fn sdp(&self) -> &Sdp {
        &self.sdp
    }

    pub fn track_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream(&self, track_id: usize) -> Option<&Arc<ReflectorStream>> {
        self.streams.get(track_id)
    }

    pub fn streams(&self) -> &[Arc<ReflectorStream>] {
        &self.streams
    }

    pub fn has_broadcaster(&self) -> bool {
        self.has_broadcaster.load(Ordering::Acquire)
    }

    /// Claim the broadcaster slot.
    /// Returns `false` if one is already attached.
    pub fn try_claim_broadcaster(&self) -> bool {
        self.has_broadcaster
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_broadcaster(&self) {
        self.has_broadcaster.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_track_sdp() -> Sdp {
        Sdp::parse(
            "v=0\r\no=- 0 0 IN IP4 1.2.3.4\r\ns=s\r\nt=0 0\r\n\
             m=audio 0 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n\
             m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n",
        )
        .unwrap()
    }

    #[test]
    fn builds_one_stream_per_media_block() {
        let session = ReflectorSession::new(two_track_sdp(), 16, false);
        assert_eq!(session.track_count(), 2);
        assert_eq!(session.stream(1).unwrap().codec, Codec::H264);
    }

    #[test]
    fn broadcaster_claim_is_exclusive() {
        let session = ReflectorSession::new(two_track_sdp(), 16, false);
        assert!(session.try_claim_broadcaster());
        assert!(!session.try_claim_broadcaster());
        session.release_broadcaster();
        assert!(session.try_claim_broadcaster());
    }
}
