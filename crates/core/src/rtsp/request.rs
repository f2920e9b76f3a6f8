use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. When
/// `Content-Length` is present, [`RtspRequest::parse_head`] reports how
/// many additional body bytes the caller must read before the request is
/// complete — the reader may suspend and resume the read across multiple
/// scheduler ticks.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD,
    /// PAUSE, TEARDOWN, ...).
    pub method: String,
    /// Request-URI (absolute `rtsp://host:port/path` or `*` for OPTIONS).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as
    /// received; lookups via [`get_header`](Self::get_header) are
    /// case-insensitive. Headers the server doesn't recognize are kept
    /// verbatim so they can be reflected into extension responses.
    pub headers: Vec<(String, String)>,
    /// Request body (SDP for ANNOUNCE, empty for most other methods).
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Parse the request line and headers from `head` (everything up to
    /// and including the blank line that ends the header block). Returns
    /// the parsed request (with an empty body) plus the `Content-Length`
    /// the caller must still read, if any.
    pub fn parse_head(head: &str) -> Result<(Self, usize)> {
        // `split("\r\n")` (or bare `\n`, tolerated for leniency) leaves a
        // trailing empty element for the blank line that ends the header
        // block; drop it before iterating.
        let normalized = head.replace("\r\n", "\n");
        let mut lines: Vec<&str> = normalized.split('\n').collect();
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        let mut iter = lines.into_iter();

        let request_line = iter.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;
        if request_line.is_empty() {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            });
        }

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in iter {
            if line.is_empty() {
                continue;
            }
            let colon_pos = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }

        let request = RtspRequest {
            method,
            uri,
            version,
            headers,
            body: Vec::new(),
        };

        let content_length = match request.get_header("Content-Length") {
            Some(v) => v.trim().parse::<usize>().map_err(|_| RtspError::Parse {
                kind: ParseErrorKind::InvalidContentLength,
            })?,
            None => 0,
        };

        Ok((request, content_length))
    }

    /// Attach a fully-read body to this request.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Look up a header value by name (case-insensitive, RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Body interpreted as UTF-8 (SDP is always text).
    pub fn body_as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(|_| RtspError::Sdp("body is not valid UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let (req, len) =
            RtspRequest::parse_head("OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\nCSeq: 1\r\n\r\n")
                .unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/test");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
        assert_eq!(len, 0);
    }

    #[test]
    fn parse_announce_with_content_length() {
        let head = "ANNOUNCE rtsp://localhost/live.sdp RTSP/1.0\r\n\
                     CSeq: 2\r\n\
                     Content-Type: application/sdp\r\n\
                     Content-Length: 42\r\n\r\n";
        let (req, len) = RtspRequest::parse_head(head).unwrap();
        assert_eq!(req.method, "ANNOUNCE");
        assert_eq!(len, 42);
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse_head("").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse_head("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let (req, _) = RtspRequest::parse_head("OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n")
            .unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("cseq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn round_trip_setup_transport_header() {
        let head = "SETUP rtsp://localhost/live.sdp/trackID=1 RTSP/1.0\r\n\
                     CSeq: 3\r\n\
                     Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let (req, _) = RtspRequest::parse_head(head).unwrap();
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }
}
