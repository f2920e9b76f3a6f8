//! Minimal RTCP sender/receiver report handling (RFC 3550 §6.4). Only
//! the sender-report fields the reflector needs to cache and re-emit
//! are modeled; this is not a general RTCP parser.

/// Sender report fields cached on ingestion, to be rewritten with the
/// per-output NTP/RTP time offsets and re-emitted.
#[derive(Debug, Clone, Copy)]
pub struct SenderReportCache {
    pub ntp_seconds: u32,
    pub ntp_fraction: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

const RTCP_VERSION: u8 = 2;
const SR_PACKET_TYPE: u8 = 200;
const RR_PACKET_TYPE: u8 = 201;

/// Parse an RTCP sender report (packet type 200) from a compound or
/// single RTCP packet's first 28 bytes. Returns `None` for anything that
/// isn't a well-formed SR (e.g. a lone RR, or truncated bytes).
pub fn parse_sender_report(bytes: &[u8]) -> Option<SenderReportCache> {
    if bytes.len() < 28 {
        return None;
    }
    let version = bytes[0] >> 6;
    let packet_type = bytes[1];
    if version != RTCP_VERSION || packet_type != SR_PACKET_TYPE {
        return None;
    }
    Some(SenderReportCache {
        ntp_seconds: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
        ntp_fraction: u32::from_be_bytes(bytes[12..16].try_into().unwrap()),
        rtp_timestamp: u32::from_be_bytes(bytes[16..20].try_into().unwrap()),
        packet_count: u32::from_be_bytes(bytes[20..24].try_into().unwrap()),
        octet_count: u32::from_be_bytes(bytes[24..28].try_into().unwrap()),
    })
}

/// Build a 28-byte RTCP SR packet (no report blocks) with the given SSRC
/// and cached sender fields, shifted by a timestamp offset for this
/// particular output.
pub fn build_sender_report(ssrc: u32, cache: &SenderReportCache, rtp_timestamp_offset: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(28);
    out.push((RTCP_VERSION << 6) | 0); // RC = 0, no report blocks
    out.push(SR_PACKET_TYPE);
    out.extend_from_slice(&6u16.to_be_bytes()); // length in 32-bit words - 1
    out.extend_from_slice(&ssrc.to_be_bytes());
    out.extend_from_slice(&cache.ntp_seconds.to_be_bytes());
    out.extend_from_slice(&cache.ntp_fraction.to_be_bytes());
    out.extend_from_slice(&cache.rtp_timestamp.wrapping_add(rtp_timestamp_offset).to_be_bytes());
    out.extend_from_slice(&cache.packet_count.to_be_bytes());
    out.extend_from_slice(&cache.octet_count.to_be_bytes());
    out
}

/// Returns `true` if `bytes` looks like an RTCP receiver report (packet
/// type 201) — used to route inbound RTCP on the RTCP channel/port.
pub fn is_receiver_report(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] >> 6 == RTCP_VERSION && bytes[1] == RR_PACKET_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sr(ssrc: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.push((RTCP_VERSION << 6) | 0);
        out.push(SR_PACKET_TYPE);
        out.extend_from_slice(&6u16.to_be_bytes());
        out.extend_from_slice(&ssrc.to_be_bytes());
        out.extend_from_slice(&0xAABBCCDDu32.to_be_bytes());
        out.extend_from_slice(&0x11223344u32.to_be_bytes());
        out.extend_from_slice(&1000u32.to_be_bytes());
        out.extend_from_slice(&42u32.to_be_bytes());
        out.extend_from_slice(&9000u32.to_be_bytes());
        out
    }

    #[test]
    fn parses_sender_report_fields() {
        let bytes = sample_sr(0x1234);
        let cache = parse_sender_report(&bytes).unwrap();
        assert_eq!(cache.rtp_timestamp, 1000);
        assert_eq!(cache.packet_count, 42);
        assert_eq!(cache.octet_count, 9000);
    }

    #[test]
    fn rejects_receiver_report_as_sender_report() {
        let mut bytes = sample_sr(1);
        bytes[1] = RR_PACKET_TYPE;
        assert!(parse_sender_report(&bytes).is_none());
        assert!(is_receiver_report(&bytes));
    }

    #[test]
    fn build_applies_timestamp_offset() {
        let cache = parse_sender_report(&sample_sr(1)).unwrap();
        let built = build_sender_report(0x5555, &cache, 500);
        let rtp_ts = u32::from_be_bytes(built[16..20].try_into().unwrap());
        assert_eq!(rtp_ts, 1500);
    }
}
