use std::time::Duration;

use tracing::debug;

use super::{
    DatagramSocket, Endpoint, PROFILE_POLL_BUDGET, ProfileKind, ProfileOp, SOCKET_HEX_CEILING,
    SocketError, create_profile, decode_hex, encode_hex, run_profile_command,
};
use crate::at::{AtCommand, DetachedMode, SharedChannel};

const KIND: ProfileKind = ProfileKind::Udp;

/// CoAP over this profile asks for 256 byte blocks.
pub const UDP_BLOCK_EXPONENT: u8 = 4;

/// UDP socket held by a modem socket profile. The profile is allocated and
/// bound lazily on the first datagram to a peer.
pub struct UdpProfile {
    modem: SharedChannel,
    profile: Option<u32>,
    peer: Option<Endpoint>,
    timeout: Duration,
}

impl UdpProfile {
    pub fn new(modem: SharedChannel) -> Self {
        Self {
            modem,
            profile: None,
            peer: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    pub fn profile_id(&self) -> Option<u32> {
        self.profile
    }

    fn open(&mut self, to: &Endpoint) -> Result<u32, SocketError> {
        let id = create_profile(
            &self.modem,
            KIND,
            "AT+CSOC=1,2,1".to_string(),
            r"\+CSOC: ([0-9]+)",
        )?;
        self.profile = Some(id);
        run_profile_command(
            &self.modem,
            KIND,
            ProfileOp::Connect,
            AtCommand::new(format!("AT+CSOCON={},{},\"{}\"", id, to.port, to.host)),
        )?;
        self.peer = Some(to.clone());
        Ok(id)
    }
}

impl DatagramSocket for UdpProfile {
    fn send_to(&mut self, data: &[u8], to: &Endpoint) -> Result<usize, SocketError> {
        let hex = encode_hex(data);
        if hex.len() > SOCKET_HEX_CEILING {
            return Err(SocketError::TooLarge {
                len: hex.len(),
                max: SOCKET_HEX_CEILING,
            });
        }

        let id = match (self.profile, &self.peer) {
            (Some(id), Some(peer)) if peer == to => id,
            _ => {
                self.close()?;
                self.open(to)?
            }
        };

        run_profile_command(
            &self.modem,
            KIND,
            ProfileOp::Send,
            AtCommand::new(format!("AT+CSOSEND={},{},{}", id, hex.len(), hex)).timeout(self.timeout),
        )?;
        debug!("udp profile {} sent {} bytes", id, data.len());
        Ok(data.len())
    }

    fn recv_from(&mut self, timeout: Duration) -> Result<(Vec<u8>, Option<Endpoint>), SocketError> {
        let Some(id) = self.profile else {
            return Ok((Vec::new(), None));
        };
        let prefix = format!("+CSONMI: {},", id);
        let lines = match self
            .modem
            .borrow_mut()
            .read_detached(&prefix, DetachedMode::First, timeout.min(self.timeout))
        {
            Ok(lines) => lines,
            Err(e) if e.is_timeout() => return Ok((Vec::new(), self.peer.clone())),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        for fields in &lines {
            let hex = fields
                .get(2)
                .ok_or_else(|| SocketError::Indication(fields.join(",")))?;
            data.extend(decode_hex(hex)?);
        }
        Ok((data, self.peer.clone()))
    }

    fn close(&mut self) -> Result<(), SocketError> {
        self.peer = None;
        let Some(id) = self.profile.take() else {
            return Ok(());
        };
        run_profile_command(
            &self.modem,
            KIND,
            ProfileOp::Close,
            AtCommand::new(format!("AT+CSOCL={}", id)),
        )?;
        Ok(())
    }

    fn block_exponent(&self) -> u8 {
        UDP_BLOCK_EXPONENT
    }

    fn poll_budget(&self) -> Duration {
        PROFILE_POLL_BUDGET
    }
}
