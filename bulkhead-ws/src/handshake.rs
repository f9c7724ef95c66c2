//! HTTP upgrade handshake.
//!
//! Performs the server side of the RFC 6455 opening handshake over an
//! already-accepted stream: parse the GET request, validate the upgrade
//! headers, and answer with `101 Switching Protocols`. Invalid requests get
//! a best-effort `400` before the connection is dropped.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::{Result, WsError};

/// Protocol-defined GUID appended to the client key.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the upgrade request, headers included.
const MAX_REQUEST_SIZE: usize = 8192;

/// Outcome of a successful handshake.
#[derive(Debug)]
pub struct HandshakeResult {
    /// Request path from the upgrade request line.
    pub path: String,
    /// The client's `Sec-WebSocket-Key` value.
    pub key: String,
}

/// Run the server handshake on `stream`.
///
/// On success the `101` response has been written and the stream carries
/// WebSocket frames from here on. On failure a `400` is attempted and the
/// caller should drop the stream.
pub fn accept<S: Read + Write>(stream: &mut S) -> Result<HandshakeResult> {
    let request = match read_request(stream) {
        Ok(request) => request,
        Err(e) => {
            write_rejection(stream);
            return Err(e);
        }
    };

    match validate_request(&request) {
        Ok(result) => {
            let accept = accept_key(&result.key);
            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {accept}\r\n\r\n"
            );
            stream.write_all(response.as_bytes())?;
            stream.flush()?;
            Ok(result)
        }
        Err(e) => {
            write_rejection(stream);
            Err(e)
        }
    }
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Read bytes until the end of the HTTP header block.
fn read_request<S: Read>(stream: &mut S) -> Result<Vec<u8>> {
    let mut request = Vec::with_capacity(512);
    let mut byte = [0_u8; 1];

    while !request.ends_with(b"\r\n\r\n") {
        if request.len() >= MAX_REQUEST_SIZE {
            return Err(WsError::handshake("upgrade request too large"));
        }
        match stream.read(&mut byte)? {
            0 => return Err(WsError::handshake("connection closed mid-request")),
            _ => request.push(byte[0]),
        }
    }
    Ok(request)
}

fn validate_request(request: &[u8]) -> Result<HandshakeResult> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(request) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(WsError::handshake("incomplete upgrade request"));
        }
        Err(e) => return Err(WsError::handshake(format!("malformed request: {e}"))),
    }

    if req.method != Some("GET") {
        return Err(WsError::handshake("upgrade requires GET"));
    }
    let path = req.path.unwrap_or("/").to_owned();

    let header = |name: &str| -> Option<&str> {
        req.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
    };

    match header("Upgrade") {
        Some(v) if v.eq_ignore_ascii_case("websocket") => {}
        _ => return Err(WsError::handshake("missing Upgrade: websocket")),
    }

    // Connection may carry multiple tokens, e.g. "keep-alive, Upgrade".
    match header("Connection") {
        Some(v) if v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")) => {}
        _ => return Err(WsError::handshake("missing Connection: Upgrade")),
    }

    match header("Sec-WebSocket-Version") {
        Some("13") => {}
        _ => return Err(WsError::handshake("unsupported websocket version")),
    }

    let key = header("Sec-WebSocket-Key")
        .ok_or_else(|| WsError::handshake("missing Sec-WebSocket-Key"))?
        .trim()
        .to_owned();
    if key.is_empty() {
        return Err(WsError::handshake("empty Sec-WebSocket-Key"));
    }

    Ok(HandshakeResult { path, key })
}

/// The peer might already be gone; the rejection is best effort.
fn write_rejection<S: Write>(stream: &mut S) {
    let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
    let _ = stream.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// Read + Write test double over separate input and output buffers.
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn new(input: &str) -> Self {
            Self {
                input: Cursor::new(input.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn upgrade_request(key: &str) -> String {
        format!(
            "GET /chat HTTP/1.1\r\n\
             Host: example.com\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        )
    }

    #[test]
    fn test_accept_key_rfc_vector() {
        // Worked example from RFC 6455 section 1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_valid_handshake() {
        let mut stream = MockStream::new(&upgrade_request("dGhlIHNhbXBsZSBub25jZQ=="));
        let result = accept(&mut stream).unwrap();
        assert_eq!(result.path, "/chat");

        let response = String::from_utf8(stream.output).unwrap();
        assert!(response.starts_with("HTTP/1.1 101"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn test_connection_header_with_multiple_tokens() {
        let request = upgrade_request("dGhlIHNhbXBsZSBub25jZQ==")
            .replace("Connection: Upgrade", "Connection: keep-alive, Upgrade");
        let mut stream = MockStream::new(&request);
        accept(&mut stream).unwrap();
    }

    #[test]
    fn test_non_get_rejected() {
        let request = upgrade_request("dGhlIHNhbXBsZSBub25jZQ==").replace("GET", "POST");
        let mut stream = MockStream::new(&request);
        let err = accept(&mut stream).unwrap_err();
        assert!(matches!(err, WsError::Handshake(_)));
        assert!(String::from_utf8(stream.output)
            .unwrap()
            .starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn test_missing_key_rejected() {
        let request = "GET / HTTP/1.1\r\n\
                       Upgrade: websocket\r\n\
                       Connection: Upgrade\r\n\
                       Sec-WebSocket-Version: 13\r\n\r\n";
        let mut stream = MockStream::new(request);
        assert!(matches!(
            accept(&mut stream),
            Err(WsError::Handshake(_))
        ));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let request = upgrade_request("dGhlIHNhbXBsZSBub25jZQ==")
            .replace("Version: 13", "Version: 8");
        let mut stream = MockStream::new(&request);
        assert!(matches!(
            accept(&mut stream),
            Err(WsError::Handshake(_))
        ));
    }

    #[test]
    fn test_truncated_request_rejected() {
        let mut stream = MockStream::new("GET / HTTP/1.1\r\nUpgr");
        assert!(matches!(
            accept(&mut stream),
            Err(WsError::Handshake(_))
        ));
    }
}
