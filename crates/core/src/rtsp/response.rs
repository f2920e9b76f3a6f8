use crate::error::RtspError;

/// An RTSP response (RFC 2326 §7).
///
/// Uses a builder pattern — chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Set when the server intends to close the connection after this
    /// response (propagates `Connection: close`).
    pub close_after: bool,
}

/// Server identification string included in every response (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = "reflector-rs/0.1";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
            close_after: false,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }
    pub fn forbidden() -> Self {
        Self::new(403, "Forbidden")
    }
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }
    pub fn method_not_allowed() -> Self {
        Self::new(405, "Method Not Allowed")
    }
    pub fn precondition_failed() -> Self {
        Self::new(412, "Precondition Failed")
    }
    pub fn unsupported_media_type() -> Self {
        Self::new(415, "Unsupported Media Type")
    }
    pub fn not_enough_bandwidth() -> Self {
        Self::new(453, "Not Enough Bandwidth")
    }
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }
    pub fn method_not_valid_in_state() -> Self {
        Self::new(455, "Method Not Valid in This State")
    }
    pub fn unsupported_transport() -> Self {
        Self::new(461, "Unsupported Transport")
    }
    pub fn aggregate_option_not_allowed() -> Self {
        Self::new(459, "Aggregate Option Not Allowed")
    }
    pub fn internal_server_error() -> Self {
        Self::new(500, "Internal Server Error")
    }
    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }
    pub fn service_unavailable() -> Self {
        Self::new(503, "Service Unavailable")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Echo the request's CSeq, or "0" if absent — every response must
    /// carry one (RFC 2326 §12.17).
    pub fn with_cseq(self, cseq: &str) -> Self {
        self.add_header("CSeq", cseq)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn closing(mut self) -> Self {
        self.close_after = true;
        self.add_header("Connection", "close")
    }

    /// Serialize to the RTSP wire format (status line, headers,
    /// `Content-Length` if a body is present, blank line, body).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        let mut bytes = out.into_bytes();
        if let Some(body) = &self.body {
            bytes.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            bytes.extend_from_slice(body);
        } else {
            bytes.extend_from_slice(b"\r\n");
        }
        bytes
    }
}

/// Map an [`RtspError`] to the status-code response prescribed by the
/// error-handling design.
pub fn status_for_error(err: &RtspError) -> RtspResponse {
    match err {
        RtspError::Parse { .. } | RtspError::Sdp(_) => RtspResponse::bad_request(),
        RtspError::NoMedia => RtspResponse::unsupported_media_type(),
        RtspError::Unauthorized => {
            RtspResponse::unauthorized().add_header("WWW-Authenticate", "Basic realm=\"reflector\"")
        }
        RtspError::Forbidden => RtspResponse::forbidden(),
        RtspError::State(_) => RtspResponse::method_not_valid_in_state(),
        RtspError::PresentationNotFound(_) => RtspResponse::not_found(),
        RtspError::UnknownTrack(_) => RtspResponse::bad_request(),
        RtspError::SessionNotFound(_) => RtspResponse::session_not_found(),
        RtspError::TransportNotConfigured(_) => RtspResponse::method_not_valid_in_state(),
        RtspError::UnsupportedTransport(_) => RtspResponse::unsupported_transport(),
        RtspError::DuplicateBroadcast(_) => RtspResponse::precondition_failed(),
        RtspError::AggregateNotAllowed(_) => RtspResponse::aggregate_option_not_allowed(),
        RtspError::CapacityExceeded(_) | RtspError::PortRangeExhausted => {
            RtspResponse::not_enough_bandwidth()
        }
        RtspError::Io(_) | RtspError::NotStarted | RtspError::AlreadyRunning => {
            RtspResponse::internal_server_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_no_body() {
        let resp = RtspResponse::ok()
            .add_header("CSeq", "1")
            .add_header("Public", "OPTIONS");
        let s = String::from_utf8(resp.serialize()).unwrap();
        assert!(s.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(s.contains("Server: reflector-rs/0.1\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.ends_with("\r\n"));
    }

    #[test]
    fn serialize_with_body_sets_content_length() {
        let resp = RtspResponse::ok().add_header("CSeq", "2").with_body("v=0\r\n");
        let s = String::from_utf8(resp.serialize()).unwrap();
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("v=0\r\n"));
    }

    #[test]
    fn error_mapping_duplicate_broadcast_is_412() {
        let err = RtspError::DuplicateBroadcast("rtsp://x/live.sdp".into());
        assert_eq!(status_for_error(&err).status_code, 412);
    }

    #[test]
    fn error_mapping_aggregate_not_allowed_is_459() {
        let err = RtspError::AggregateNotAllowed(1);
        assert_eq!(status_for_error(&err).status_code, 459);
    }
}
