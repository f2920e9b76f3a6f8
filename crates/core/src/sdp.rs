//! SDP (Session Description Protocol) parsing, normalization and
//! DESCRIBE-time rewriting (RFC 4566).
//!
//! An SDP body is a flat sequence of `type=value` lines split into one
//! session-level block followed by zero or more media blocks (each
//! starting with an `m=` line). [`Sdp::normalize`] sorts each block into
//! a canonical order; this is a pure reordering
//! and is idempotent by construction (sorting is stable and the
//! relative order of same-type lines — e.g. repeated `a=` lines — is
//! preserved).

use crate::error::{Result, RtspError};

/// Canonical session-level line-type order.
const SESSION_ORDER: &[u8] = b"vosiuepcbtrzka";
/// Canonical per-media line-type order.
const MEDIA_ORDER: &[u8] = b"micbka";

fn rank(order: &[u8], type_char: u8) -> usize {
    order
        .iter()
        .position(|&c| c == type_char)
        .unwrap_or(order.len())
}

/// One `type=value` SDP line, e.g. `("a", "rtpmap:96 H264/90000")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub kind: u8,
    pub value: String,
}

impl Line {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim_end_matches(['\r', '\n']);
        if raw.is_empty() {
            return None;
        }
        let mut chars = raw.char_indices();
        let (_, kind_char) = chars.next()?;
        let (_, eq) = chars.next()?;
        if eq != '=' {
            return None;
        }
        Some(Line {
            kind: kind_char as u8,
            value: raw[2..].to_string(),
        })
    }

    fn render(&self) -> String {
        format!("{}={}", self.kind as char, self.value)
    }
}

/// One media block: the lines that belong to a single `m=` description,
/// in file order (the `m=` line itself is `lines[0]` after normalization
/// since `m` sorts first).
#[derive(Debug, Clone, Default)]
pub struct MediaBlock {
    pub lines: Vec<Line>,
}

impl MediaBlock {
    fn normalize(&mut self) {
        self.lines
            .sort_by_key(|l| rank(MEDIA_ORDER, l.kind));
    }

    /// The media type token from the `m=` line, e.g. `"audio"` from
    /// `m=audio 0 RTP/AVP 0`.
    pub fn media_type(&self) -> Option<&str> {
        self.lines
            .iter()
            .find(|l| l.kind == b'm')
            .and_then(|l| l.value.split_whitespace().next())
    }
}

/// A parsed (and optionally normalized) SDP session description.
#[derive(Debug, Clone, Default)]
pub struct Sdp {
    pub session_lines: Vec<Line>,
    pub media: Vec<MediaBlock>,
}

impl Sdp {
    /// Parse raw SDP text. Rejects descriptions with no `m=` line
    /// (415 Unsupported Media Type).
    pub fn parse(text: &str) -> Result<Self> {
        let mut session_lines = Vec::new();
        let mut media: Vec<MediaBlock> = Vec::new();

        for raw in text.lines() {
            let Some(line) = Line::parse(raw) else {
                continue;
            };
            if line.kind == b'm' {
                media.push(MediaBlock { lines: vec![line] });
            } else if let Some(block) = media.last_mut() {
                block.lines.push(line);
            } else {
                session_lines.push(line);
            }
        }

        if media.is_empty() {
            return Err(RtspError::NoMedia);
        }

        Ok(Sdp {
            session_lines,
            media,
        })
    }

    /// Sort session-level and per-media lines into the canonical order.
    /// Idempotent: `normalize(normalize(x)) == normalize(x)`.
    pub fn normalize(mut self) -> Self {
        self.session_lines
            .sort_by_key(|l| rank(SESSION_ORDER, l.kind));
        for block in &mut self.media {
            block.normalize();
        }
        self
    }

    /// Render back to SDP text, one `\r\n`-terminated line per entry.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.session_lines {
            out.push_str(&line.render());
            out.push_str("\r\n");
        }
        for block in &self.media {
            for line in &block.lines {
                out.push_str(&line.render());
                out.push_str("\r\n");
            }
        }
        out
    }

    /// Number of media (track) blocks.
    pub fn track_count(&self) -> usize {
        self.media.len()
    }

    /// Rewrite this SDP for a DESCRIBE response:
    /// strip source-host `c=` lines, install the server's connection
    /// address as the sole session-level `c=`, and assign
    /// `a=control:trackID=<n>` (1-based, declaration order) to each
    /// media block, replacing any pre-existing control attribute.
    pub fn rewrite_for_describe(mut self, server_ip: &str) -> Self {
        self.session_lines.retain(|l| l.kind != b'c');
        let insert_at = rank(SESSION_ORDER, b'c');
        let pos = self
            .session_lines
            .iter()
            .position(|l| rank(SESSION_ORDER, l.kind) > insert_at)
            .unwrap_or(self.session_lines.len());
        self.session_lines.insert(
            pos,
            Line {
                kind: b'c',
                value: format!("IN IP4 {server_ip}"),
            },
        );

        for (idx, block) in self.media.iter_mut().enumerate() {
            let track_id = idx + 1;
            block.lines.retain(|l| l.kind != b'c');
            block.lines.retain(|l| {
                !(l.kind == b'a' && l.value.starts_with("control:"))
            });
            block.lines.push(Line {
                kind: b'a',
                value: format!("control:trackID={track_id}"),
            });
        }

        self.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TRACK: &str = "v=0\r\n\
        o=- 0 0 IN IP4 10.0.0.5\r\n\
        s=Live\r\n\
        c=IN IP4 10.0.0.5\r\n\
        t=0 0\r\n\
        m=audio 0 RTP/AVP 0\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        m=video 0 RTP/AVP 96\r\n\
        a=rtpmap:96 H264/90000\r\n";

    #[test]
    fn parse_rejects_no_media() {
        let err = Sdp::parse("v=0\r\no=- 0 0 IN IP4 1.2.3.4\r\n").unwrap_err();
        assert!(matches!(err, RtspError::NoMedia));
    }

    #[test]
    fn parse_two_tracks() {
        let sdp = Sdp::parse(TWO_TRACK).unwrap();
        assert_eq!(sdp.track_count(), 2);
        assert_eq!(sdp.media[0].media_type(), Some("audio"));
        assert_eq!(sdp.media[1].media_type(), Some("video"));
    }

    #[test]
    fn normalize_is_idempotent() {
        let sdp = Sdp::parse(TWO_TRACK).unwrap();
        let once = sdp.clone().normalize();
        let twice = once.clone().normalize();
        assert_eq!(once.render(), twice.render());
    }

    #[test]
    fn normalize_sorts_session_lines() {
        // Lines arrive out of canonical order.
        let scrambled = "v=0\r\ns=Live\r\no=- 0 0 IN IP4 1.2.3.4\r\nt=0 0\r\nm=video 0 RTP/AVP 96\r\n";
        let sdp = Sdp::parse(scrambled).unwrap().normalize();
        let kinds: Vec<u8> = sdp.session_lines.iter().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![b'v', b'o', b's', b't']);
    }

    #[test]
    fn rewrite_for_describe_strips_source_c_and_adds_control() {
        let sdp = Sdp::parse(TWO_TRACK).unwrap().rewrite_for_describe("203.0.113.9");
        assert_eq!(
            sdp.session_lines
                .iter()
                .filter(|l| l.kind == b'c')
                .count(),
            1
        );
        assert_eq!(
            sdp.session_lines.iter().find(|l| l.kind == b'c').unwrap().value,
            "IN IP4 203.0.113.9"
        );
        assert_eq!(sdp.media[0].lines.last().unwrap().value, "control:trackID=1");
        assert_eq!(sdp.media[1].lines.last().unwrap().value, "control:trackID=2");
    }

    #[test]
    fn rewrite_preserves_unknown_attributes() {
        let sdp = Sdp::parse(TWO_TRACK).unwrap().rewrite_for_describe("203.0.113.9");
        let rendered = sdp.render();
        assert!(rendered.contains("a=rtpmap:0 PCMU/8000"));
        assert!(rendered.contains("a=rtpmap:96 H264/90000"));
    }
}
