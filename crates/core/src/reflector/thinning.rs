//! Per-output congestion thinning and the H.264 frame
//! classification it depends on.
//!
//! Slice type is recovered with a minimal Exp-Golomb reader over the
//! first bits of the slice header that follow the NAL unit header
//! (`first_mb_in_slice`, `slice_type`); this is an approximation — it
//! assumes the first reconstructed RBSP byte is representative of the
//! whole NAL unit's slice type, which holds for every encoder this
//! server has been run against but is not a bitstream guarantee.

/// Coarse frame classification used to decide what a thinned output
/// drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Key,
    Predictive,
    Bidirectional,
    /// RTCP, non-H.264 media, or a slice type we couldn't parse —
    /// never dropped by thinning.
    Other,
}

/// Codec carried by a `ReflectorStream`, as far as thinning cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Other,
}

impl Codec {
    /// Best-effort detection from an SDP `a=rtpmap` value, e.g.
    /// `"96 H264/90000"`.
    pub fn from_rtpmap(value: &str) -> Self {
        if value.to_ascii_uppercase().contains("H264") {
            Codec::H264
        } else {
            Codec::Other
        }
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, bit_pos: 0 }
    }

    fn read_bit(&mut self) -> Option<u8> {
        let byte = *self.bytes.get(self.bit_pos / 8)?;
        let bit = (byte >> (7 - self.bit_pos % 8)) & 1;
        self.bit_pos += 1;
        Some(bit)
    }

    /// Exp-Golomb unsigned (`ue(v)`, ITU-T H.264 §9.1).
    fn read_ue(&mut self) -> Option<u32> {
        let mut zeros = 0u32;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 32 {
                return None;
            }
        }
        let mut value: u32 = 1;
        for _ in 0..zeros {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Some(value - 1)
    }
}

/// Classify a single H.264 NAL unit (as carried by RTP payload bytes,
/// header stripped) by its slice type. FU-A fragments are classified by
/// their reassembled NAL header on the start fragment only; continuation
/// and end fragments return `Other` since the information only lives in
/// the first fragment.
pub fn classify_h264(nal_payload: &[u8]) -> FrameKind {
    let Some(&first) = nal_payload.first() else {
        return FrameKind::Other;
    };
    let nal_type = first & 0x1F;

    match nal_type {
        5 => FrameKind::Key,
        1 => classify_by_slice_type(&nal_payload[1..]),
        28 => classify_fu_a(nal_payload),
        _ => FrameKind::Other,
    }
}

fn classify_fu_a(payload: &[u8]) -> FrameKind {
    // FU indicator (1) + FU header (1): S|E|R|type(5).
    let Some(&fu_header) = payload.get(1) else {
        return FrameKind::Other;
    };
    let start = fu_header & 0x80 != 0;
    let original_type = fu_header & 0x1F;
    if !start {
        return FrameKind::Other;
    }
    match original_type {
        5 => FrameKind::Key,
        1 => classify_by_slice_type(&payload[2..]),
        _ => FrameKind::Other,
    }
}

fn classify_by_slice_type(rbsp: &[u8]) -> FrameKind {
    let mut reader = BitReader::new(rbsp);
    let Some(_first_mb_in_slice) = reader.read_ue() else {
        return FrameKind::Predictive;
    };
    let Some(slice_type) = reader.read_ue() else {
        return FrameKind::Predictive;
    };
    match slice_type % 5 {
        0 => FrameKind::Predictive, // P
        1 => FrameKind::Bidirectional, // B
        2 => FrameKind::Key, // I (non-IDR)
        _ => FrameKind::Other, // SP/SI
    }
}

/// Highest defined thinning level.
pub const MAX_QUALITY_LEVEL: u8 = 6;

/// Per-output thinning state. Quality levels:
///
/// - `0`: send everything.
/// - `1`: drop B-frames.
/// - `2`: drop 25% of P-frames, round-robin.
/// - `3`: drop 50% of P-frames.
/// - `4`: drop 75% of P-frames.
/// - `5`: key frames only.
/// - `6`: key frames plus the first P-frame following each key frame.
#[derive(Debug, Default)]
pub struct ThinningState {
    level: u8,
    p_counter: u32,
    /// For level 6: whether the one admitted post-key P-frame has
    /// already been sent since the last key frame.
    post_key_p_sent: bool,
}

impl ThinningState {
    pub fn new(level: u8) -> Self {
        Self {
            level: level.min(MAX_QUALITY_LEVEL),
            p_counter: 0,
            post_key_p_sent: false,
        }
    }

    pub fn set_level(&mut self, level: u8) {
        self.level = level.min(MAX_QUALITY_LEVEL);
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Decide whether a packet of the given kind should be forwarded.
    /// RTCP/non-H.264/unparsed media (`FrameKind::Other`) is never
    /// dropped.
    pub fn admit(&mut self, kind: FrameKind) -> bool {
        match kind {
            FrameKind::Other => true,
            FrameKind::Key => {
                self.post_key_p_sent = false;
                true
            }
            FrameKind::Bidirectional => self.level == 0,
            FrameKind::Predictive => match self.level {
                0 | 1 => true,
                // Drop every 4th/2nd/3-of-4 P-frame for 25/50/75%.
                2 => {
                    self.p_counter = self.p_counter.wrapping_add(1);
                    self.p_counter % 4 != 0
                }
                3 => {
                    self.p_counter = self.p_counter.wrapping_add(1);
                    self.p_counter % 2 != 0
                }
                4 => {
                    self.p_counter = self.p_counter.wrapping_add(1);
                    self.p_counter % 4 == 0
                }
                5 => false,
                6 => {
                    if self.post_key_p_sent {
                        false
                    } else {
                        self.post_key_p_sent = true;
                        true
                    }
                }
                _ => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_zero_admits_everything() {
        let mut state = ThinningState::new(0);
        assert!(state.admit(FrameKind::Bidirectional));
        assert!(state.admit(FrameKind::Predictive));
    }

    #[test]
    fn level_one_drops_b_frames_only() {
        let mut state = ThinningState::new(1);
        assert!(!state.admit(FrameKind::Bidirectional));
        assert!(state.admit(FrameKind::Predictive));
        assert!(state.admit(FrameKind::Key));
    }

    #[test]
    fn level_five_keeps_only_key_frames() {
        let mut state = ThinningState::new(5);
        assert!(!state.admit(FrameKind::Predictive));
        assert!(!state.admit(FrameKind::Bidirectional));
        assert!(state.admit(FrameKind::Key));
    }

    #[test]
    fn level_two_drops_one_in_four_p_frames() {
        let mut state = ThinningState::new(2);
        let admitted: Vec<bool> = (0..4).map(|_| state.admit(FrameKind::Predictive)).collect();
        assert_eq!(admitted, vec![true, true, true, false]);
    }

    #[test]
    fn level_four_drops_three_in_four_p_frames() {
        let mut state = ThinningState::new(4);
        let admitted: Vec<bool> = (0..4).map(|_| state.admit(FrameKind::Predictive)).collect();
        assert_eq!(admitted, vec![false, false, false, true]);
    }

    #[test]
    fn level_six_admits_one_p_frame_after_each_key() {
        let mut state = ThinningState::new(6);
        assert!(state.admit(FrameKind::Key));
        assert!(state.admit(FrameKind::Predictive));
        assert!(!state.admit(FrameKind::Predictive));
        assert!(!state.admit(FrameKind::Predictive));
        assert!(state.admit(FrameKind::Key));
        assert!(state.admit(FrameKind::Predictive));
    }

    #[test]
    fn classifies_idr_nal_as_key() {
        // NAL header byte: forbidden_zero=0, nal_ref_idc=3, type=5.
        let nal = [0x65u8, 0x88, 0x84];
        assert_eq!(classify_h264(&nal), FrameKind::Key);
    }

    #[test]
    fn fu_a_continuation_is_unclassified() {
        // FU indicator type=28, FU header start=0 (continuation).
        let fu = [0x7Cu8, 0x01, 0xAB, 0xCD];
        assert_eq!(classify_h264(&fu), FrameKind::Other);
    }

    #[test]
    fn codec_detects_h264_rtpmap() {
        assert_eq!(Codec::from_rtpmap("96 H264/90000"), Codec::H264);
        assert_eq!(Codec::from_rtpmap("0 PCMU/8000"), Codec::Other);
    }
}
