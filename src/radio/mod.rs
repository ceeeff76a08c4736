//! Radio bearers. Only one is active at a time; the caller brings one down
//! before bringing up the next.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::at::AtError;

pub mod host;
pub mod nbiot;

pub use host::HostRadio;
pub use nbiot::{Nbiot, NbiotConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RadioKind {
    Wlan,
    Lte,
    Nbiot,
}

impl fmt::Display for RadioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RadioKind::Wlan => "RADIO_WLAN",
            RadioKind::Lte => "RADIO_LTE",
            RadioKind::Nbiot => "RADIO_NBIOT",
        })
    }
}

/// Raw `+CSQ` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    pub rssi_raw: u8,
    pub ber_raw: u8,
}

impl SignalQuality {
    const UNKNOWN: u8 = 99;

    /// RSSI in dBm (3GPP TS 27.007), `None` when the modem does not know it.
    pub fn rssi_dbm(&self) -> Option<i32> {
        if self.rssi_raw == Self::UNKNOWN {
            return None;
        }
        Some(-113 + 2 * i32::from(self.rssi_raw))
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rssi_dbm() {
            Some(dbm) => write!(f, "{} dBm (raw {}, ber {})", dbm, self.rssi_raw, self.ber_raw),
            None => write!(f, "unknown (ber {})", self.ber_raw),
        }
    }
}

#[derive(Debug, Error)]
pub enum RadioError {
    #[error(transparent)]
    At(#[from] AtError),

    /// The modem answered a bring-up step with an error or unexpected data.
    #[error("modem rejected {0}")]
    Rejected(String),

    #[error("not attached within {0:?}")]
    AttachTimeout(Duration),

    #[error("modem does not answer")]
    NoModem,

    #[error("power control: {0}")]
    Io(#[from] io::Error),
}

impl RadioError {
    pub fn is_timeout(&self) -> bool {
        match self {
            RadioError::At(e) => e.is_timeout(),
            RadioError::AttachTimeout(_) => true,
            _ => false,
        }
    }
}

pub trait Radio {
    fn kind(&self) -> RadioKind;
    fn connect(&mut self) -> Result<(), RadioError>;
    fn deinit(&mut self) -> Result<(), RadioError>;
    fn is_connected(&self) -> bool;
    /// Current signal quality, if the bearer reports one.
    fn signal_strength(&mut self) -> Result<Option<SignalQuality>, RadioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rssi_conversion() {
        let q = SignalQuality {
            rssi_raw: 20,
            ber_raw: 0,
        };
        assert_eq!(q.rssi_dbm(), Some(-73));
        assert_eq!(SignalQuality { rssi_raw: 0, ber_raw: 0 }.rssi_dbm(), Some(-113));
        let unknown = SignalQuality {
            rssi_raw: 99,
            ber_raw: 99,
        };
        assert_eq!(unknown.rssi_dbm(), None);
        assert_eq!(unknown.to_string(), "unknown (ber 99)");
    }

    #[test]
    fn kind_names() {
        assert_eq!(RadioKind::Nbiot.to_string(), "RADIO_NBIOT");
        assert_eq!(RadioKind::Wlan.to_string(), "RADIO_WLAN");
        assert_eq!(RadioKind::Lte.to_string(), "RADIO_LTE");
    }
}
