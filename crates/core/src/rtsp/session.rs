//! Per-connection RTSP state machine: parses requests
//! off a blocking TCP socket, demultiplexes interleaved RTP/RTCP frames,
//! and drives ANNOUNCE/DESCRIBE/SETUP/PLAY/RECORD/PAUSE/TEARDOWN against
//! the shared [`ServerContext`].

use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;

use crate::config::ServerConfig;
use crate::error::{Result, RtspError};
use crate::net::IoOutcome;
use crate::net::udp_pool::{UdpPair, UdpPortPool};
use crate::reflector::output::ReflectorOutput;
use crate::reflector::ring::Channel;
use crate::reflector::session::ReflectorSession;
use crate::reflector::stream::ReflectorStream;
use crate::registry::{PresentationKey, SdpCache, SessionRegistry};
use crate::rtp::rtcp::parse_sender_report;
use crate::rtp::session::{PlaybackState, RtpSession};
use crate::rtp::stream::RtpStream;
use crate::rtp::transport::{InterleavedSink, RtpTransport};
use crate::rtsp::auth::{Action, AuthProvider, UserProfile};
use crate::rtsp::interleave::{InterleaveScanner, InterleaveWriter, InterleavedFrame, ScanItem};
use crate::rtsp::request::RtspRequest;
use crate::rtsp::response::{RtspResponse, status_for_error};
use crate::runtime::{TaskHandle, WorkerPool, event};
use crate::sdp::Sdp;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Everything a live RTSP connection needs and that outlives any one of
/// them: configuration, the presentation registry, the pending-SDP
/// cache, the UDP port pool, the task runtime and the auth backend.
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub sdp_cache: SdpCache,
    pub udp_pool: Arc<UdpPortPool>,
    pub pool: Arc<WorkerPool>,
    pub auth: Arc<dyn AuthProvider>,
    next_session_id: AtomicU64,
}

impl ServerContext {
    pub fn new(config: ServerConfig, auth: Arc<dyn AuthProvider>) -> Arc<Self> {
        let udp_pool = UdpPortPool::new(config.udp_port_min, config.udp_port_max);
        let pool = WorkerPool::start(0);
        Arc::new(Self {
            config,
            registry: SessionRegistry::new(),
            sdp_cache: SdpCache::new(),
            udp_pool,
            pool,
            auth,
            next_session_id: AtomicU64::new(1),
        })
    }

    fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Which inbound demux an interleaved channel number is wired to.
enum InboundRoute {
    PushRtp(Arc<ReflectorStream>),
    PushRtcp(Arc<ReflectorStream>),
    PullRtcp(Arc<RtpStream>),
}

/// Shares the connection's write side between the RTSP response path
/// and every `RtpStream` interleaved on this connection. A `try_lock`
/// failure (another task mid-write) is surfaced as `Pending`, rather
/// than blocking the caller.
struct ConnectionSink {
    writer: Arc<Mutex<InterleaveWriter<TcpStream>>>,
}

impl InterleavedSink for ConnectionSink {
    fn send_frame(&self, channel: u8, payload: &[u8]) -> io::Result<IoOutcome> {
        match self.writer.try_lock() {
            Some(mut writer) => {
                writer.write_frame(channel, payload)?;
                writer.flush()?;
                Ok(IoOutcome::Done(payload.len()))
            }
            None => Ok(IoOutcome::Pending),
        }
    }
}

#[derive(Clone, Copy)]
enum TransportKind {
    Interleaved { ch_rtp: u8, ch_rtcp: u8 },
    Udp { client_rtp_port: u16, client_rtcp_port: u16 },
}

#[derive(Clone, Copy)]
struct ParsedTransport {
    is_push: bool,
    kind: TransportKind,
}

/// Parse a `Transport:` header value (RFC 2326 §12.39) down to the bits
/// this reflector understands: interleaved-on-this-connection or
/// client-side UDP ports, plus whether `mode=record` asked for a push
/// route.
fn parse_transport_header(value: &str) -> Result<ParsedTransport> {
    let is_push = value.to_ascii_lowercase().contains("mode=record");

    if let Some(pos) = value.find("interleaved=") {
        let rest = &value[pos + "interleaved=".len()..];
        let spec = rest.split(';').next().unwrap_or(rest);
        let mut parts = spec.split('-');
        let ch_rtp: u8 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RtspError::UnsupportedTransport(value.to_string()))?;
        let ch_rtcp: u8 = match parts.next() {
            Some(s) => s
                .parse()
                .map_err(|_| RtspError::UnsupportedTransport(value.to_string()))?,
            None => ch_rtp + 1,
        };
        return Ok(ParsedTransport {
            is_push,
            kind: TransportKind::Interleaved { ch_rtp, ch_rtcp },
        });
    }

    if let Some(pos) = value.find("client_port=") {
        let rest = &value[pos + "client_port=".len()..];
        let spec = rest.split(';').next().unwrap_or(rest);
        let mut parts = spec.split('-');
        let client_rtp_port: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RtspError::UnsupportedTransport(value.to_string()))?;
        let client_rtcp_port: u16 = match parts.next() {
            Some(s) => s
                .parse()
                .map_err(|_| RtspError::UnsupportedTransport(value.to_string()))?,
            None => client_rtp_port + 1,
        };
        return Ok(ParsedTransport {
            is_push,
            kind: TransportKind::Udp { client_rtp_port, client_rtcp_port },
        });
    }

    Err(RtspError::UnsupportedTransport(value.to_string()))
}

/// Parse an `x-Retransmit: our-retransmit;ack-timeout=<ms>` header
/// into the reliable-UDP ack timeout, if reliability was
/// requested at all.
fn parse_retransmit_header(value: &str) -> Option<Duration> {
    if !value.contains("our-retransmit") {
        return None;
    }
    let pos = value.find("ack-timeout=")?;
    let rest = &value[pos + "ack-timeout=".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok().map(Duration::from_millis)
}

/// Extract the 0-based track index from a SETUP/control URI's trailing
/// `trackID=<n>` or `streamid=<n>` (1-based on the wire).
fn extract_track_id(uri: &str) -> Option<usize> {
    let lower = uri.to_ascii_lowercase();
    let (pos, marker_len) = if let Some(pos) = lower.rfind("trackid=") {
        (pos, "trackid=".len())
    } else {
        let pos = lower.rfind("streamid=")?;
        (pos, "streamid=".len())
    };
    let rest = &uri[pos + marker_len..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let n: usize = digits.parse().ok()?;
    n.checked_sub(1)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
        .or_else(|| buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2))
}

/// Cache a sender report (if this is RTCP) then ingest the packet into
/// the ring, exactly as a push client's transport feeds a track.
fn ingest_push_packet(stream: &Arc<ReflectorStream>, channel: Channel, bytes: Vec<u8>) {
    if channel == Channel::Rtcp {
        if let Some(sr) = parse_sender_report(&bytes) {
            stream.record_sender_report(sr);
        }
    }
    stream.push(channel, now_ms(), bytes);
}

fn udp_ingest_loop(
    socket: std::net::UdpSocket,
    channel: Channel,
    stream: Arc<ReflectorStream>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 2048];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, _addr)) => ingest_push_packet(&stream, channel, buf[..n].to_vec()),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                tracing::warn!(%err, "push udp ingest error, stopping reader");
                break;
            }
        }
    }
}

/// One accepted RTSP control connection, driven to completion by
/// [`Self::run`] on its own blocking thread.
pub struct RtspSession {
    ctx: Arc<ServerContext>,
    peer_addr: SocketAddr,
    local_ip: IpAddr,
    reader: TcpStream,
    writer: Arc<Mutex<InterleaveWriter<TcpStream>>>,
    sink: Arc<ConnectionSink>,
    scanner: InterleaveScanner,
    pending_head: Vec<u8>,
    session_id: Option<u64>,
    rtp_session: Option<Arc<RtpSession>>,
    rtp_task: Option<TaskHandle>,
    presentation_key: Option<PresentationKey>,
    reflector_session: Option<Arc<ReflectorSession>>,
    is_broadcaster: bool,
    user: UserProfile,
    setup_tracks: HashSet<usize>,
    push_tracks: HashSet<usize>,
    inbound_routes: HashMap<u8, InboundRoute>,
    push_udp_stoppers: Vec<Arc<AtomicBool>>,
    push_udp_pairs: Vec<UdpPair>,
    last_activity: Instant,
}

impl RtspSession {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<ServerContext>) -> io::Result<Self> {
        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(Duration::from_millis(1000)))?;
        let local_ip = stream.local_addr()?.ip();
        let write_stream = stream.try_clone()?;
        let writer = Arc::new(Mutex::new(InterleaveWriter::new(write_stream)));

        Ok(Self {
            ctx,
            peer_addr,
            local_ip,
            reader: stream,
            sink: Arc::new(ConnectionSink { writer: writer.clone() }),
            writer,
            scanner: InterleaveScanner::new(),
            pending_head: Vec::new(),
            session_id: None,
            rtp_session: None,
            rtp_task: None,
            presentation_key: None,
            reflector_session: None,
            is_broadcaster: false,
            user: UserProfile::default(),
            setup_tracks: HashSet::new(),
            push_tracks: HashSet::new(),
            inbound_routes: HashMap::new(),
            push_udp_stoppers: Vec::new(),
            push_udp_pairs: Vec::new(),
            last_activity: Instant::now(),
        })
    }

    fn server_ip(&self) -> String {
        self.ctx
            .config
            .public_host
            .clone()
            .unwrap_or_else(|| self.local_ip.to_string())
    }

    /// Drive this connection until it disconnects, times out, or is torn
    /// down explicitly.
    pub fn run(mut self) {
        let mut buf = [0u8; 4096];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.last_activity = Instant::now();
                    self.scanner.feed(&buf[..n]);
                    if self.drain_scanner().is_err() {
                        break;
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
                Err(err) => {
                    tracing::debug!(peer = %self.peer_addr, %err, "rtsp read error");
                    break;
                }
            }

            if self.last_activity.elapsed() > Duration::from_secs(self.ctx.config.rtsp_timeout_seconds) {
                tracing::info!(peer = %self.peer_addr, "rtsp session idle timeout");
                break;
            }
        }
        self.teardown_internal();
    }

    /// Process every currently-available scanned item. Returns `Err(())`
    /// once the connection should be closed.
    fn drain_scanner(&mut self) -> std::result::Result<(), ()> {
        loop {
            match self.scanner.next_item() {
                Some(ScanItem::Frame(frame)) => self.handle_inbound_frame(frame),
                Some(ScanItem::Text(bytes)) => {
                    self.pending_head.extend_from_slice(&bytes);
                    loop {
                        match self.try_parse_request() {
                            Ok(Some(request)) => {
                                if self.handle_request(&request) {
                                    return Err(());
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                let response = status_for_error(&err).with_cseq("0").closing();
                                let _ = self.writer.lock().write_raw(&response.serialize());
                                return Err(());
                            }
                        }
                    }
                }
                None => return Ok(()),
            }
        }
    }

    fn try_parse_request(&mut self) -> Result<Option<RtspRequest>> {
        let Some(header_end) = find_header_end(&self.pending_head) else {
            return Ok(None);
        };
        let head_str = String::from_utf8_lossy(&self.pending_head[..header_end]).into_owned();
        let (request, content_length) = RtspRequest::parse_head(&head_str)?;
        if self.pending_head.len() < header_end + content_length {
            return Ok(None);
        }
        let body = self.pending_head[header_end..header_end + content_length].to_vec();
        self.pending_head.drain(0..header_end + content_length);
        Ok(Some(request.with_body(body)))
    }

    fn handle_inbound_frame(&mut self, frame: InterleavedFrame) {
        match self.inbound_routes.get(&frame.channel) {
            Some(InboundRoute::PushRtp(stream)) => ingest_push_packet(stream, Channel::Rtp, frame.payload),
            Some(InboundRoute::PushRtcp(stream)) => ingest_push_packet(stream, Channel::Rtcp, frame.payload),
            Some(InboundRoute::PullRtcp(rtp_stream)) => rtp_stream.record_receiver_feedback(&frame.payload),
            None => tracing::trace!(channel = frame.channel, "interleaved frame on unrouted channel"),
        }
    }

    /// Run one request through the session state machine and write its
    /// response. Returns whether the connection should now close.
    fn handle_request(&mut self, request: &RtspRequest) -> bool {
        let cseq = request.cseq().unwrap_or("0").to_string();
        let response = match self.dispatch(request) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(method = %request.method, %err, "rtsp request failed");
                status_for_error(&err)
            }
        };
        let mut response = response.with_cseq(&cseq);
        if let Some(session_id) = self.session_id {
            response = response.add_header("Session", &session_id.to_string());
        }
        let close = response.close_after;
        if let Err(err) = self.writer.lock().write_raw(&response.serialize()) {
            tracing::warn!(%err, "failed writing rtsp response");
            return true;
        }
        close
    }

    fn dispatch(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        self.user = self
            .ctx
            .auth
            .authenticate(request.get_header("Authorization"))
            .map_err(|_| RtspError::Unauthorized)?;

        match request.method.as_str() {
            "OPTIONS" => Ok(self.handle_options()),
            "DESCRIBE" => self.handle_describe(request),
            "ANNOUNCE" => self.handle_announce(request),
            "SETUP" => self.handle_setup(request),
            "PLAY" => self.handle_play(request),
            "RECORD" => self.handle_record(),
            "PAUSE" => self.handle_pause(),
            "TEARDOWN" => Ok(self.handle_teardown()),
            other => {
                tracing::debug!(method = other, "unsupported rtsp method");
                Ok(RtspResponse::method_not_allowed())
            }
        }
    }

    fn handle_options(&self) -> RtspResponse {
        RtspResponse::ok().add_header(
            "Public",
            "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, PAUSE, TEARDOWN",
        )
    }

    fn handle_describe(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let key = PresentationKey::from_uri(&request.uri);
        if !self.ctx.auth.authorize(&self.user, key.as_str(), Action::Read) {
            return Err(RtspError::Forbidden);
        }

        let sdp: Sdp = if let Some(session) = self.ctx.registry.resolve(&key) {
            let sdp = session.sdp().clone();
            self.ctx.registry.release(&key);
            sdp
        } else if let Some(cached) = self.ctx.sdp_cache.get(&key) {
            cached
        } else {
            return Err(RtspError::PresentationNotFound(key.to_string()));
        };

        let rewritten = sdp.rewrite_for_describe(&self.server_ip());
        Ok(RtspResponse::ok()
            .add_header("Content-Base", &request.uri)
            .add_header("Content-Type", "application/sdp")
            .with_body(rewritten.render()))
    }

    fn handle_announce(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let sdp = Sdp::parse(request.body_as_str()?)?.normalize();
        let key = PresentationKey::from_uri(&request.uri);

        if !self.ctx.auth.authorize(&self.user, key.as_str(), Action::Write) {
            return Err(RtspError::Forbidden);
        }
        if let Some(group) = &self.ctx.config.broadcaster_group {
            if !self.user.is_member_of(group) {
                return Err(RtspError::Forbidden);
            }
        }

        if let Some(existing) = self.ctx.registry.resolve(&key) {
            if existing.has_broadcaster() && !self.ctx.config.allow_duplicate_broadcasts {
                self.ctx.registry.release(&key);
                return Err(RtspError::DuplicateBroadcast(key.to_string()));
            }
            existing.try_claim_broadcaster();
            self.ctx.sdp_cache.insert(key.clone(), sdp);
            self.presentation_key = Some(key);
            self.reflector_session = Some(existing);
            self.is_broadcaster = true;
            return Ok(RtspResponse::ok());
        }

        let session = Arc::new(ReflectorSession::new(
            sdp.clone(),
            self.ctx.config.reflector_bucket_size_packets,
            true,
        ));
        let registered = self
            .ctx
            .registry
            .register(key.clone(), session)
            .map_err(|_| RtspError::DuplicateBroadcast(key.to_string()))?;

        self.ctx.sdp_cache.insert(key.clone(), sdp);
        self.presentation_key = Some(key);
        self.reflector_session = Some(registered);
        self.is_broadcaster = true;
        Ok(RtspResponse::ok())
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let key = PresentationKey::from_uri(&request.uri);
        let transport_header = request
            .get_header("Transport")
            .ok_or_else(|| RtspError::UnsupportedTransport("missing Transport header".to_string()))?;
        let parsed = parse_transport_header(transport_header)?;
        let track_id =
            extract_track_id(&request.uri).ok_or(RtspError::UnknownTrack(0))?;

        if parsed.is_push {
            self.setup_push(&key, track_id, parsed)
        } else {
            self.setup_pull(request, &key, track_id, parsed)
        }
    }

    fn resolve_bound_session(&mut self, key: &PresentationKey) -> Option<Arc<ReflectorSession>> {
        match &self.reflector_session {
            Some(session) if self.presentation_key.as_ref() == Some(key) => Some(session.clone()),
            _ => self.ctx.registry.resolve(key),
        }
    }

    fn setup_push(&mut self, key: &PresentationKey, track_id: usize, parsed: ParsedTransport) -> Result<RtspResponse> {
        if !self.ctx.auth.authorize(&self.user, key.as_str(), Action::Write) {
            return Err(RtspError::Forbidden);
        }

        let session = self
            .resolve_bound_session(key)
            .ok_or_else(|| RtspError::PresentationNotFound(key.to_string()))?;
        let stream = session
            .stream(track_id)
            .cloned()
            .ok_or(RtspError::UnknownTrack(track_id as u32))?;

        if !stream.try_claim_push_setup() && !self.ctx.config.allow_duplicate_broadcasts {
            return Err(RtspError::DuplicateBroadcast(format!("{key} track {track_id}")));
        }

        self.presentation_key = Some(key.clone());
        self.reflector_session = Some(session);
        self.is_broadcaster = true;
        self.push_tracks.insert(track_id);

        let response = match parsed.kind {
            TransportKind::Interleaved { ch_rtp, ch_rtcp } => {
                self.inbound_routes.insert(ch_rtp, InboundRoute::PushRtp(stream.clone()));
                self.inbound_routes.insert(ch_rtcp, InboundRoute::PushRtcp(stream));
                RtspResponse::ok().add_header(
                    "Transport",
                    &format!("RTP/AVP/TCP;interleaved={ch_rtp}-{ch_rtcp};mode=record"),
                )
            }
            TransportKind::Udp { client_rtp_port, client_rtcp_port } => {
                let pair = self.ctx.udp_pool.acquire(self.local_ip)?;
                let server_rtp_port = pair.rtp_port;
                let server_rtcp_port = pair.rtcp_port;
                self.spawn_push_udp_reader(pair, stream)?;
                RtspResponse::ok().add_header(
                    "Transport",
                    &format!(
                        "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};\
                         server_port={server_rtp_port}-{server_rtcp_port};mode=record"
                    ),
                )
            }
        };

        if self.session_id.is_none() {
            self.session_id = Some(self.ctx.next_session_id());
        }
        if self.rtp_session.is_none() {
            // A broadcaster's `RtpSession` owns no outbound `RtpStream`s
            // (it has nothing to schedule to itself), so it's never
            // spawned on the task runtime like a pull client's — it
            // exists purely so RECORD/PAUSE/TEARDOWN have playback state
            // to transition.
            self.rtp_session = Some(Arc::new(RtpSession::new(self.session_id.unwrap())));
        }
        Ok(response)
    }

    fn spawn_push_udp_reader(&mut self, pair: UdpPair, stream: Arc<ReflectorStream>) -> Result<()> {
        let rtp_socket = pair.rtp.try_clone()?;
        let rtcp_socket = pair.rtcp.try_clone()?;
        rtp_socket.set_read_timeout(Some(Duration::from_millis(500)))?;
        rtcp_socket.set_read_timeout(Some(Duration::from_millis(500)))?;

        let stop = Arc::new(AtomicBool::new(false));

        let rtp_stream = stream.clone();
        let rtp_stop = stop.clone();
        thread::Builder::new()
            .name("reflector-push-rtp".into())
            .spawn(move || udp_ingest_loop(rtp_socket, Channel::Rtp, rtp_stream, rtp_stop))
            .map_err(io::Error::from)?;

        let rtcp_stop = stop.clone();
        thread::Builder::new()
            .name("reflector-push-rtcp".into())
            .spawn(move || udp_ingest_loop(rtcp_socket, Channel::Rtcp, stream, rtcp_stop))
            .map_err(io::Error::from)?;

        self.push_udp_stoppers.push(stop);
        self.push_udp_pairs.push(pair);
        Ok(())
    }

    fn setup_pull(
        &mut self,
        request: &RtspRequest,
        key: &PresentationKey,
        track_id: usize,
        parsed: ParsedTransport,
    ) -> Result<RtspResponse> {
        if !self.ctx.auth.authorize(&self.user, key.as_str(), Action::Read) {
            return Err(RtspError::Forbidden);
        }
        if self.setup_tracks.contains(&track_id) {
            return Err(RtspError::AggregateNotAllowed(track_id as u32));
        }

        let session = match self.resolve_bound_session(key) {
            Some(session) => session,
            None => {
                let sdp = self
                    .ctx
                    .sdp_cache
                    .get(key)
                    .ok_or_else(|| RtspError::PresentationNotFound(key.to_string()))?;
                let session = Arc::new(ReflectorSession::new(
                    sdp,
                    self.ctx.config.reflector_bucket_size_packets,
                    false,
                ));
                match self.ctx.registry.register(key.clone(), session) {
                    Ok(session) => session,
                    Err(existing) => existing,
                }
            }
        };
        let stream = session
            .stream(track_id)
            .cloned()
            .ok_or(RtspError::UnknownTrack(track_id as u32))?;

        self.presentation_key = Some(key.clone());
        self.reflector_session = Some(session);

        if self.session_id.is_none() {
            self.session_id = Some(self.ctx.next_session_id());
        }
        if self.rtp_session.is_none() {
            let rtp_session = Arc::new(RtpSession::new(self.session_id.unwrap()));
            let handle = self.ctx.pool.spawn(rtp_session.clone());
            self.rtp_session = Some(rtp_session);
            self.rtp_task = Some(handle);
        }

        let ssrc: u32 = rand::rng().random();
        let seq_offset: u16 = rand::rng().random();
        let ts_offset: u32 = rand::rng().random();

        let (transport, transport_value) = match parsed.kind {
            TransportKind::Interleaved { ch_rtp, ch_rtcp } => {
                let transport = RtpTransport::new_interleaved(self.sink.clone(), ch_rtp, ch_rtcp);
                (transport, format!("RTP/AVP/TCP;interleaved={ch_rtp}-{ch_rtcp}"))
            }
            TransportKind::Udp { client_rtp_port, client_rtcp_port } => {
                let pair = self.ctx.udp_pool.acquire(self.local_ip)?;
                let server_rtp_port = pair.rtp_port;
                let server_rtcp_port = pair.rtcp_port;
                let client_rtp = SocketAddr::new(self.peer_addr.ip(), client_rtp_port);
                let client_rtcp = SocketAddr::new(self.peer_addr.ip(), client_rtcp_port);
                let ack_timeout = request.get_header("x-Retransmit").and_then(parse_retransmit_header);
                let transport = RtpTransport::new_udp_with_reliability(
                    pair.rtp,
                    pair.rtcp,
                    client_rtp,
                    client_rtcp,
                    ack_timeout,
                );
                let mut value = format!(
                    "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};\
                     server_port={server_rtp_port}-{server_rtcp_port}"
                );
                if let Some(timeout) = ack_timeout {
                    value.push_str(&format!(
                        ";x-Retransmit=our-retransmit;ack-timeout={}",
                        timeout.as_millis()
                    ));
                }
                (transport, value)
            }
        };

        let output = ReflectorOutput::new(
            &stream,
            self.rtp_task.clone().expect("rtp task spawned above"),
            self.ctx.config.default_stream_quality,
        );
        let rtp_stream = Arc::new(RtpStream::new(track_id, output, transport, ssrc, seq_offset, ts_offset));

        if let TransportKind::Interleaved { ch_rtcp, .. } = parsed.kind {
            self.inbound_routes.insert(ch_rtcp, InboundRoute::PullRtcp(rtp_stream.clone()));
        }

        self.rtp_session.as_ref().unwrap().add_stream(rtp_stream);
        self.setup_tracks.insert(track_id);

        Ok(RtspResponse::ok().add_header("Transport", &transport_value))
    }

    fn handle_play(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let rtp_session = self
            .rtp_session
            .clone()
            .ok_or_else(|| RtspError::State("PLAY before SETUP".to_string()))?;
        if rtp_session.stream_count() == 0 {
            return Err(RtspError::State("PLAY with no tracks set up".to_string()));
        }

        if let Some(range) = request.get_header("Range") {
            let trimmed = range.trim();
            if trimmed != "npt=now-" && trimmed != "npt=now" {
                return Err(RtspError::State(format!(
                    "unsupported Range for a live presentation: {range}"
                )));
            }
        }

        rtp_session.set_state(PlaybackState::Playing);

        let mut response = RtspResponse::ok();
        if self.ctx.config.emit_rtp_info {
            if let Some(rtp_info) = self.build_rtp_info(&request.uri) {
                response = response.add_header("RTP-Info", &rtp_info);
            }
        }

        if let Some(handle) = &self.rtp_task {
            handle.signal(event::START);
        }

        Ok(response)
    }

    fn build_rtp_info(&self, uri: &str) -> Option<String> {
        let session = self.reflector_session.as_ref()?;
        let mut tracks: Vec<usize> = self.setup_tracks.iter().copied().collect();
        tracks.sort_unstable();

        let mut entries = Vec::new();
        for track_id in tracks {
            let Some(stream) = session.stream(track_id) else { continue };
            let mut packet = stream.first_buffered_rtp();
            for _ in 0..self.ctx.config.rtp_info_wait_loop_count {
                if packet.is_some() {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
                packet = stream.first_buffered_rtp();
            }
            if let Some(packet) = packet {
                entries.push(format!(
                    "url={uri}/trackID={};seq={};rtptime={}",
                    track_id + 1,
                    packet.rtp_sequence,
                    packet.rtp_timestamp
                ));
            }
        }

        if entries.is_empty() { None } else { Some(entries.join(",")) }
    }

    fn handle_record(&mut self) -> Result<RtspResponse> {
        if !self.is_broadcaster || self.reflector_session.is_none() {
            return Err(RtspError::State("RECORD without a claimed ANNOUNCE".to_string()));
        }
        let rtp_session = self
            .rtp_session
            .clone()
            .ok_or_else(|| RtspError::State("RECORD without a completed SETUP".to_string()))?;
        rtp_session.set_state(PlaybackState::Playing);
        Ok(RtspResponse::ok())
    }

    fn handle_pause(&mut self) -> Result<RtspResponse> {
        let rtp_session = self
            .rtp_session
            .clone()
            .ok_or_else(|| RtspError::State("PAUSE before SETUP".to_string()))?;
        rtp_session.set_state(PlaybackState::Paused);
        Ok(RtspResponse::ok())
    }

    fn handle_teardown(&mut self) -> RtspResponse {
        self.teardown_internal();
        RtspResponse::ok().closing()
    }

    fn teardown_internal(&mut self) {
        for stop in self.push_udp_stoppers.drain(..) {
            stop.store(true, Ordering::Relaxed);
        }
        for pair in self.push_udp_pairs.drain(..) {
            self.ctx.udp_pool.release(pair);
        }

        if let Some(rtp_session) = &self.rtp_session {
            for stream in rtp_session.streams() {
                stream.output().detach();
            }
        }
        if let Some(handle) = self.rtp_task.take() {
            handle.signal(event::KILL);
        }

        if let Some(session) = &self.reflector_session {
            if self.is_broadcaster {
                session.release_broadcaster();
            }
            for &track_id in &self.push_tracks {
                if let Some(stream) = session.stream(track_id) {
                    stream.release_push_setup();
                }
            }
        }

        if let Some(key) = self.presentation_key.take() {
            self.ctx.registry.release(&key);
            self.ctx.registry.try_unregister(&key);
        }
    }
}
