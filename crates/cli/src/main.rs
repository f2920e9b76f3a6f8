use std::io;

use clap::Parser;
use reflector::{Server, ServerConfig};

/// Standalone RTSP/RTP reflector: relays one broadcaster's push stream to
/// many pull clients.
#[derive(Parser)]
#[command(name = "reflector-server", about = "RTSP/RTP reflector server")]
struct Args {
    /// RTSP listen ports (repeatable).
    #[arg(long = "port", value_name = "PORT", default_value = "554")]
    ports: Vec<u16>,

    /// Idle-session timeout in seconds.
    #[arg(long, default_value_t = ServerConfig::default().rtsp_timeout_seconds)]
    rtsp_timeout_seconds: u64,

    /// Admission threshold on aggregate outbound bandwidth in kbps, -1 for unlimited.
    #[arg(long, default_value_t = ServerConfig::default().max_bandwidth_kbps)]
    max_bandwidth_kbps: i64,

    /// Admission threshold on concurrent RTSP connections, -1 for unlimited.
    #[arg(long, default_value_t = ServerConfig::default().max_connections)]
    max_connections: i64,

    /// Depth of each reflector stream's packet ring buffer.
    #[arg(long, default_value_t = ServerConfig::default().reflector_bucket_size_packets)]
    reflector_bucket_size_packets: usize,

    /// Multiplier on play rate used for output pacing.
    #[arg(long, default_value_t = ServerConfig::default().overbuffer_rate)]
    overbuffer_rate: f64,

    /// Lower bound (inclusive) of the UDP port-pair allocation range.
    #[arg(long, default_value_t = ServerConfig::default().udp_port_min)]
    udp_port_min: u16,

    /// Upper bound (inclusive) of the UDP port-pair allocation range.
    #[arg(long, default_value_t = ServerConfig::default().udp_port_max)]
    udp_port_max: u16,

    /// Allow a second broadcaster to ANNOUNCE/RECORD on a presentation that
    /// already has a live push session.
    #[arg(long, default_value_t = ServerConfig::default().allow_duplicate_broadcasts)]
    allow_duplicate_broadcasts: bool,

    /// Name of the access group permitted to RECORD; unset disables the check.
    #[arg(long)]
    broadcaster_group: Option<String>,

    /// Initial thinning level assigned to newly-created reflector outputs.
    #[arg(long, default_value_t = ServerConfig::default().default_stream_quality)]
    default_stream_quality: u8,

    /// Public host advertised in SDP o=/c= lines; inferred from the request
    /// or client address when unset.
    #[arg(long)]
    public_host: Option<String>,

    /// Disable the RTP-Info header on PLAY responses.
    #[arg(long)]
    no_rtp_info: bool,

    /// Number of 100ms iterations PLAY waits for the first packet to arrive
    /// when probing for RTP-Info.
    #[arg(long, default_value_t = ServerConfig::default().rtp_info_wait_loop_count)]
    rtp_info_wait_loop_count: u32,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            rtsp_port_list: args.ports,
            rtsp_timeout_seconds: args.rtsp_timeout_seconds,
            max_bandwidth_kbps: args.max_bandwidth_kbps,
            max_connections: args.max_connections,
            reflector_bucket_size_packets: args.reflector_bucket_size_packets,
            overbuffer_rate: args.overbuffer_rate,
            udp_port_min: args.udp_port_min,
            udp_port_max: args.udp_port_max,
            allow_duplicate_broadcasts: args.allow_duplicate_broadcasts,
            broadcaster_group: args.broadcaster_group,
            default_stream_quality: args.default_stream_quality,
            public_host: args.public_host,
            emit_rtp_info: !args.no_rtp_info,
            rtp_info_wait_loop_count: args.rtp_info_wait_loop_count,
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let ports = args.ports.clone();
    let config: ServerConfig = args.into();

    let mut server = Server::with_config(config);
    if let Err(err) = server.start() {
        eprintln!("failed to start reflector server: {err}");
        return;
    }

    println!("reflector server listening on {ports:?} — press Enter to stop");
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);

    server.stop();
}
