//! One-shot protocol upgrade from a plain HTTP request to a framed channel.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Fixed GUID every conforming client expects in the accept digest.
const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Request heads larger than this are rejected outright.
const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake rejected: {0}")]
    Rejected(&'static str),
    #[error("connection closed during handshake")]
    ConnectionClosed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Computes the `Sec-WebSocket-Accept` value for a client-supplied key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Extracts the client key from a request head.
///
/// Requires `Upgrade: websocket` and a non-empty `Sec-WebSocket-Key`;
/// header names and the upgrade value compare case-insensitively.
pub fn parse_upgrade_request(head: &str) -> Result<&str, HandshakeError> {
    let mut upgrade_ok = false;
    let mut key = None;

    for line in head.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("upgrade") {
            upgrade_ok = value.eq_ignore_ascii_case("websocket");
        } else if name.eq_ignore_ascii_case("sec-websocket-key") && !value.is_empty() {
            key = Some(value);
        }
    }

    if !upgrade_ok {
        return Err(HandshakeError::Rejected("missing Upgrade: websocket header"));
    }
    key.ok_or(HandshakeError::Rejected("missing Sec-WebSocket-Key header"))
}

/// Completes the upgrade on a freshly accepted socket.
///
/// On success the 101 response has been written and the stream carries
/// framed traffic from here on; any bytes the client sent after its request
/// head are returned so the frame decoder sees them. On a bad request a
/// 400 status is written and the caller is expected to drop the connection.
pub async fn upgrade(stream: &mut TcpStream) -> Result<Vec<u8>, HandshakeError> {
    let (head, leftover) = read_request_head(stream).await?;

    match parse_upgrade_request(&head) {
        Ok(key) => {
            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {}\r\n\r\n",
                accept_key(key)
            );
            stream.write_all(response.as_bytes()).await?;
            Ok(leftover)
        }
        Err(e) => {
            // Best effort, the peer may already be gone
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            Err(e)
        }
    }
}

/// Reads until the blank line ending the request head, returning the head
/// and whatever the client already sent beyond it.
async fn read_request_head(stream: &mut TcpStream) -> Result<(String, Vec<u8>), HandshakeError> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if raw.len() > MAX_REQUEST_BYTES {
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            return Err(HandshakeError::Rejected("request head too large"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::ConnectionClosed);
        }
        raw.extend_from_slice(&chunk[..n]);
    };

    let leftover = raw.split_off(head_end);
    let head = String::from_utf8(raw)
        .map_err(|_| HandshakeError::Rejected("request head is not valid UTF-8"))?;
    Ok((head, leftover))
}
