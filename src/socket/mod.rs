//! Socket-like adapters over modem profiles, plus host sockets with the same
//! shape.
//!
//! Every profile adapter follows the same life cycle: allocate a numeric
//! profile id, bind it to a peer, move hex-encoded payloads through send
//! commands and unsolicited indications, then release the id.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::at::{AtCommand, AtError, Response, SharedChannel};

pub mod coap;
pub mod host;
pub mod mqtt;
pub mod tcp;
pub mod udp;

pub use coap::CoapProfile;
pub use host::{HostTcp, HostUdp};
pub use mqtt::MqttProfile;
pub use tcp::TcpProfile;
pub use udp::UdpProfile;

/// Longest hex payload accepted in one TCP/UDP send command.
pub const SOCKET_HEX_CEILING: usize = 1024;
/// Longest hex payload accepted in one CoAP send command.
pub const COAP_HEX_CEILING: usize = 512;

/// Block size exponent for transports without a datagram limit (1024 B).
pub const DEFAULT_BLOCK_EXPONENT: u8 = 6;
pub const HOST_POLL_BUDGET: Duration = Duration::from_secs(2);
pub const PROFILE_POLL_BUDGET: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Tcp,
    Udp,
    Coap,
    Mqtt,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProfileKind::Tcp => "tcp",
            ProfileKind::Udp => "udp",
            ProfileKind::Coap => "coap",
            ProfileKind::Mqtt => "mqtt",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOp {
    Create,
    Connect,
    Send,
    Close,
    Publish,
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for ProfileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProfileOp::Create => "create",
            ProfileOp::Connect => "connect",
            ProfileOp::Send => "send",
            ProfileOp::Close => "close",
            ProfileOp::Publish => "publish",
            ProfileOp::Subscribe => "subscribe",
            ProfileOp::Unsubscribe => "unsubscribe",
        })
    }
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    At(#[from] AtError),

    /// The modem answered the command with an error line.
    #[error("{kind} profile: {op} failed")]
    Modem { kind: ProfileKind, op: ProfileOp },

    /// Operation attempted before a successful connect.
    #[error("{0} profile: connect() has to be called first")]
    NotConnected(ProfileKind),

    #[error("malformed hex payload: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("malformed indication: {0}")]
    Indication(String),

    #[error("{len} hex characters exceed the {max} character command limit")]
    TooLarge { len: usize, max: usize },

    #[error("socket i/o: {0}")]
    Io(#[from] io::Error),
}

impl SocketError {
    pub fn is_timeout(&self) -> bool {
        match self {
            SocketError::At(e) => e.is_timeout(),
            SocketError::Io(e) => matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock),
            _ => false,
        }
    }
}

/// Datagram transport underneath the CoAP engine.
pub trait DatagramSocket {
    /// Send one datagram, returning the number of payload bytes sent.
    fn send_to(&mut self, data: &[u8], to: &Endpoint) -> Result<usize, SocketError>;

    /// Next datagram, or an empty buffer when nothing arrived within
    /// `timeout`. Never fails just because no data is available.
    fn recv_from(&mut self, timeout: Duration) -> Result<(Vec<u8>, Option<Endpoint>), SocketError>;

    fn close(&mut self) -> Result<(), SocketError>;

    /// Block size exponent (`size = 2^(e+4)`) suited to this transport.
    fn block_exponent(&self) -> u8 {
        DEFAULT_BLOCK_EXPONENT
    }

    /// Whether blockwise uploads can run over this transport.
    fn supports_upload(&self) -> bool {
        true
    }

    /// Default time to wait for the response to one block.
    fn poll_budget(&self) -> Duration {
        HOST_POLL_BUDGET
    }

    /// Whether confirmable responses are acknowledged below this socket.
    fn acknowledges_responses(&self) -> bool {
        false
    }
}

/// Byte stream transport underneath the HTTP helpers.
pub trait StreamSocket {
    fn connect(&mut self, to: &Endpoint) -> Result<(), SocketError>;
    fn send(&mut self, data: &[u8]) -> Result<usize, SocketError>;
    /// Received bytes; empty once the peer has nothing more to deliver.
    fn recv(&mut self) -> Result<Vec<u8>, SocketError>;
    fn close(&mut self) -> Result<(), SocketError>;
}

pub fn encode_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

pub fn decode_hex(text: &str) -> Result<Vec<u8>, SocketError> {
    Ok(hex::decode(text.trim().trim_matches('"'))?)
}

/// Split a hex string into pieces of at most `max` characters, never
/// separating the two digits of one byte.
pub fn hex_chunks(hex: &str, max: usize) -> impl Iterator<Item = &str> {
    let step = (max & !1).max(2);
    (0..hex.len())
        .step_by(step)
        .map(move |start| &hex[start..(start + step).min(hex.len())])
}

/// Run a profile command, turning an error line into [`SocketError::Modem`].
pub(crate) fn run_profile_command(
    modem: &SharedChannel,
    kind: ProfileKind,
    op: ProfileOp,
    cmd: AtCommand,
) -> Result<Response, SocketError> {
    let resp = modem.borrow_mut().execute(&cmd)?;
    if !resp.is_success() {
        return Err(SocketError::Modem { kind, op });
    }
    Ok(resp)
}

/// Issue a profile-allocation command and parse the id it reports.
pub(crate) fn create_profile(
    modem: &SharedChannel,
    kind: ProfileKind,
    command: String,
    pattern: &str,
) -> Result<u32, SocketError> {
    let cmd = AtCommand::new(command).expect(pattern).capture(&[1]);
    let resp = run_profile_command(modem, kind, ProfileOp::Create, cmd)?;
    let id = resp
        .field(0)
        .and_then(|f| f.parse::<u32>().ok())
        .ok_or(SocketError::Modem {
            kind,
            op: ProfileOp::Create,
        })?;
    debug!("{} profile {} allocated", kind, id);
    Ok(id)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_is_uppercase() {
        let hex = encode_hex(b"Hi\n");
        assert_eq!(hex, "48690A");
        assert_eq!(decode_hex("\"48690a\"").unwrap(), b"Hi\n");
        assert!(matches!(decode_hex("4"), Err(SocketError::Hex(_))));
    }

    #[test]
    fn chunks_respect_ceiling() {
        let payload = vec![0x5Au8; 1500];
        let hex = encode_hex(&payload);
        let parts: Vec<&str> = hex_chunks(&hex, SOCKET_HEX_CEILING).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 1024);
        assert_eq!(parts[2].len(), 3000 - 2048);
        assert_eq!(parts.concat(), hex);
    }

    #[test]
    fn odd_ceiling_keeps_byte_pairs() {
        let parts: Vec<&str> = hex_chunks("AABBCC", 3).collect();
        assert_eq!(parts, ["AA", "BB", "CC"]);
    }

    #[test]
    fn timeout_classification() {
        let err = SocketError::from(AtError::Timeout {
            command: "AT".into(),
        });
        assert!(err.is_timeout());
        assert!(!SocketError::NotConnected(ProfileKind::Mqtt).is_timeout());
        assert_eq!(
            SocketError::Modem {
                kind: ProfileKind::Udp,
                op: ProfileOp::Create
            }
            .to_string(),
            "udp profile: create failed"
        );
    }
}
