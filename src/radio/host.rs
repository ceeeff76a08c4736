use std::net::ToSocketAddrs;

use tracing::info;

use super::{Radio, RadioError, RadioKind, SignalQuality};

/// WLAN or LTE bearer managed by the operating system. Connecting only
/// checks that name resolution works; traffic goes through host sockets.
pub struct HostRadio {
    kind: RadioKind,
    dns_probe: Option<String>,
    connected: bool,
}

impl HostRadio {
    pub fn new(kind: RadioKind) -> Self {
        Self {
            kind,
            dns_probe: None,
            connected: false,
        }
    }

    pub fn with_dns_probe(mut self, host: impl Into<String>) -> Self {
        self.dns_probe = Some(host.into());
        self
    }
}

impl Radio for HostRadio {
    fn kind(&self) -> RadioKind {
        self.kind
    }

    fn connect(&mut self) -> Result<(), RadioError> {
        if let Some(host) = &self.dns_probe {
            let addr = (host.as_str(), 0)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| RadioError::Rejected(format!("dns probe {}", host)))?;
            info!("[{}]: {}", host, addr.ip());
        }
        info!("{} up", self.kind);
        self.connected = true;
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), RadioError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn signal_strength(&mut self) -> Result<Option<SignalQuality>, RadioError> {
        Ok(None)
    }
}
