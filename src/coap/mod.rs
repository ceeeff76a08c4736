//! CoAP (RFC 7252) with blockwise transfers (RFC 7959), limited to what is
//! needed to move one payload to or from one server resource.

use thiserror::Error;

use crate::socket::SocketError;

pub mod block;
pub mod client;
pub mod packet;

pub use client::CoapClient;
pub use packet::{MessageType, ResponseCode};

#[derive(Debug, Error)]
pub enum CoapError {
    /// No usable response to one block within the poll budget.
    #[error("no response to block {block}")]
    Timeout { block: u32 },

    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("server reset the exchange")]
    Reset,

    #[error("server answered {0}")]
    Rejected(ResponseCode),

    #[error("transport does not support blockwise uploads")]
    UnsupportedTransport,

    #[error(transparent)]
    Socket(#[from] SocketError),
}

impl CoapError {
    pub fn is_timeout(&self) -> bool {
        match self {
            CoapError::Timeout { .. } => true,
            CoapError::Socket(e) => e.is_timeout(),
            _ => false,
        }
    }
}
