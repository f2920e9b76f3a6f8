//! Server-wide configuration.

/// Server-level configuration used by the RTSP state machine, the
/// reflector and the RTP scheduler.
///
/// Every field here corresponds to one of the deployment-facing
/// configuration keys, with defaults matching common reflector-server
/// deployments.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP ports to listen for RTSP control connections on.
    pub rtsp_port_list: Vec<u16>,
    /// Idle-session timeout, in seconds. Any successful read or write
    /// resets the timer.
    pub rtsp_timeout_seconds: u64,
    /// Admission threshold on aggregate outbound bandwidth; `-1` means
    /// unlimited.
    pub max_bandwidth_kbps: i64,
    /// Admission threshold on concurrent RTSP connections; `-1` means
    /// unlimited.
    pub max_connections: i64,
    /// Depth of each `ReflectorStream`'s packet ring buffer.
    pub reflector_bucket_size_packets: usize,
    /// Multiplier on play rate used for output pacing.
    pub overbuffer_rate: f64,
    /// Lower bound (inclusive) of the UDP port-pair allocation range.
    pub udp_port_min: u16,
    /// Upper bound (inclusive) of the UDP port-pair allocation range.
    pub udp_port_max: u16,
    /// Whether a second broadcaster may ANNOUNCE/RECORD on a presentation
    /// that already has a live push session.
    pub allow_duplicate_broadcasts: bool,
    /// Name of the access group permitted to RECORD. `None` disables the
    /// group check (any authenticated/anonymous client may push).
    pub broadcaster_group: Option<String>,
    /// Initial thinning level assigned to newly-created reflector outputs.
    pub default_stream_quality: u8,
    /// Public host advertised in SDP `o=`/`c=` lines. When `None`, the
    /// host is inferred from the request URI or client address.
    pub public_host: Option<String>,
    /// Whether PLAY responses should include an `RTP-Info` header probed
    /// from the ring buffer.
    pub emit_rtp_info: bool,
    /// Number of 100ms iterations PLAY waits for the first packet to
    /// arrive when probing for `RTP-Info`.
    pub rtp_info_wait_loop_count: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rtsp_port_list: vec![554],
            rtsp_timeout_seconds: 180,
            max_bandwidth_kbps: -1,
            max_connections: -1,
            reflector_bucket_size_packets: 1024,
            overbuffer_rate: 2.0,
            udp_port_min: 6970,
            udp_port_max: 65534,
            allow_duplicate_broadcasts: false,
            broadcaster_group: None,
            default_stream_quality: 0,
            public_host: None,
            emit_rtp_info: true,
            rtp_info_wait_loop_count: 10,
        }
    }
}

impl ServerConfig {
    /// Builder-style setter for the RTSP listen ports.
    pub fn with_rtsp_ports(mut self, ports: Vec<u16>) -> Self {
        self.rtsp_port_list = ports;
        self
    }

    /// Builder-style setter for the public host advertised in SDP.
    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = Some(host.into());
        self
    }

    /// Builder-style setter for the reflector ring buffer depth.
    pub fn with_bucket_size(mut self, packets: usize) -> Self {
        self.reflector_bucket_size_packets = packets;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.rtsp_port_list, vec![554]);
        assert_eq!(cfg.rtsp_timeout_seconds, 180);
        assert_eq!(cfg.max_bandwidth_kbps, -1);
        assert_eq!(cfg.max_connections, -1);
        assert_eq!(cfg.reflector_bucket_size_packets, 1024);
        assert_eq!(cfg.overbuffer_rate, 2.0);
        assert_eq!(cfg.udp_port_min, 6970);
        assert_eq!(cfg.udp_port_max, 65534);
        assert!(!cfg.allow_duplicate_broadcasts);
        assert_eq!(cfg.default_stream_quality, 0);
    }

    #[test]
    fn builder_overrides() {
        let cfg = ServerConfig::default()
            .with_rtsp_ports(vec![8554])
            .with_public_host("203.0.113.5")
            .with_bucket_size(16);
        assert_eq!(cfg.rtsp_port_list, vec![8554]);
        assert_eq!(cfg.public_host.as_deref(), Some("203.0.113.5"));
        assert_eq!(cfg.reflector_bucket_size_packets, 16);
    }
}
