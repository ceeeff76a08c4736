//! Minimal HTTP/1.0 client over any [`StreamSocket`].

use thiserror::Error;
use tracing::{debug, info};

use crate::payload::PayloadKind;
use crate::socket::{Endpoint, SocketError, StreamSocket};

pub const BOUNDARY: &str = "------------------------627c1552744e7f41";
/// The test server acknowledges a byte-exact upload with this marker.
pub const SUCCESS_MARKER: &str = "R_OK";

#[derive(Debug, Error)]
pub enum HttpError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("upload rejected: {0}")]
    Rejected(String),
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Socket(e) if e.is_timeout())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_line: String,
    pub status: u16,
    /// Bytes received including headers.
    pub total: usize,
    pub body: Vec<u8>,
}

pub fn get(socket: &mut dyn StreamSocket, server: &Endpoint, host: &str, path: &str) -> Result<HttpResponse, HttpError> {
    let request = format!("GET /{} HTTP/1.0\r\nHost: {}\r\n\r\n", path, host);
    let resp = parse_response(&exchange(socket, server, request.as_bytes())?)?;
    info!("total response size: {}B, payload size: {}B", resp.total, resp.body.len());
    Ok(resp)
}

/// Upload the reference payload of `kind` as a multipart form field `file`.
pub fn post(socket: &mut dyn StreamSocket, server: &Endpoint, host: &str, kind: PayloadKind) -> Result<HttpResponse, HttpError> {
    let request = post_request(host, kind);
    let resp = parse_response(&exchange(socket, server, &request)?)?;
    let body = String::from_utf8_lossy(&resp.body);
    if !body.contains(SUCCESS_MARKER) {
        return Err(HttpError::Rejected(format!("{} {}", resp.status_line, body.trim())));
    }
    info!("total response size: {}B, payload size: {}B", resp.total, kind.bytes().len());
    Ok(resp)
}

/// Open and close a connection; with a modem profile this times the TCP
/// handshake.
pub fn handshake(socket: &mut dyn StreamSocket, server: &Endpoint) -> Result<(), HttpError> {
    socket.connect(server)?;
    socket.close()?;
    Ok(())
}

pub fn post_request(host: &str, kind: PayloadKind) -> Vec<u8> {
    let mut body = Vec::with_capacity(kind.bytes().len() + 256);
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}.txt\"\r\nContent-Type: text/plain\r\n\r\n",
            kind.name()
        )
        .as_bytes(),
    );
    body.extend_from_slice(kind.bytes());
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let mut request = format!(
        "POST /{} HTTP/1.0\r\nHost: {}\r\nContent-Length: {}\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\n\r\n",
        kind.name(),
        host,
        body.len()
    )
    .into_bytes();
    request.extend(body);
    request
}

/// Connect, send the request and read until the peer has nothing more.
/// The socket is closed on every path.
fn exchange(socket: &mut dyn StreamSocket, server: &Endpoint, request: &[u8]) -> Result<Vec<u8>, HttpError> {
    if let Err(e) = socket.connect(server) {
        // A profile may have been allocated before the connect failed.
        if let Err(close) = socket.close() {
            debug!("close after failed connect: {}", close);
        }
        return Err(e.into());
    }
    let result = send_and_drain(socket, request);
    let closed = socket.close();
    let raw = result?;
    closed?;
    Ok(raw)
}

fn send_and_drain(socket: &mut dyn StreamSocket, request: &[u8]) -> Result<Vec<u8>, SocketError> {
    let sent = socket.send(request)?;
    debug!("sent {} bytes", sent);
    let mut raw = Vec::new();
    loop {
        let chunk = socket.recv()?;
        if chunk.is_empty() {
            return Ok(raw);
        }
        raw.extend(chunk);
    }
}

fn parse_response(raw: &[u8]) -> Result<HttpResponse, HttpError> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| HttpError::Malformed(format!("no header terminator in {} bytes", raw.len())))?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let status_line = head.lines().next().unwrap_or_default().to_string();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| HttpError::Malformed(status_line.clone()))?;
    Ok(HttpResponse {
        status_line,
        status,
        total: raw.len(),
        body: raw[split + 4..].to_vec(),
    })
}
