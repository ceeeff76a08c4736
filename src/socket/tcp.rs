use std::time::Duration;

use tracing::debug;

use super::{
    Endpoint, ProfileKind, ProfileOp, SOCKET_HEX_CEILING, SocketError, StreamSocket,
    create_profile, decode_hex, encode_hex, hex_chunks, run_profile_command,
};
use crate::at::{AtCommand, DetachedMode, SharedChannel};

const KIND: ProfileKind = ProfileKind::Tcp;

/// TCP connection held by a modem socket profile.
pub struct TcpProfile {
    modem: SharedChannel,
    profile: Option<u32>,
    response_received: bool,
    timeout: Duration,
}

impl TcpProfile {
    pub fn new(modem: SharedChannel) -> Self {
        Self {
            modem,
            profile: None,
            response_received: false,
            timeout: Duration::from_secs(120),
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
}

impl StreamSocket for TcpProfile {
    fn connect(&mut self, to: &Endpoint) -> Result<(), SocketError> {
        self.response_received = false;
        let id = create_profile(
            &self.modem,
            KIND,
            "AT+CSOC=1,1,1".to_string(),
            r"\+CSOC: ([0-9]+)",
        )?;
        self.profile = Some(id);
        run_profile_command(
            &self.modem,
            KIND,
            ProfileOp::Connect,
            AtCommand::new(format!("AT+CSOCON={},{},\"{}\"", id, to.port, to.host)),
        )?;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, SocketError> {
        let id = self.profile.ok_or(SocketError::NotConnected(KIND))?;
        let hex = encode_hex(data);
        for part in hex_chunks(&hex, SOCKET_HEX_CEILING) {
            run_profile_command(
                &self.modem,
                KIND,
                ProfileOp::Send,
                AtCommand::new(format!("AT+CSOSEND={},{},{}", id, part.len(), part)),
            )?;
        }
        Ok(data.len())
    }

    /// The whole reply arrives as a run of indications closed by the socket
    /// error indication, so the first call drains it and later calls are empty.
    fn recv(&mut self) -> Result<Vec<u8>, SocketError> {
        let Some(id) = self.profile else {
            return Ok(Vec::new());
        };
        if self.response_received {
            return Ok(Vec::new());
        }

        let prefix = format!("+CSONMI: {},", id);
        let lines = match self.modem.borrow_mut().read_detached(
            &prefix,
            DetachedMode::Accumulate { until: "+CSOERR:" },
            self.timeout,
        ) {
            Ok(lines) => lines,
            Err(e) if e.is_timeout() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        for fields in &lines {
            let hex = fields
                .get(2)
                .ok_or_else(|| SocketError::Indication(fields.join(",")))?;
            data.extend(decode_hex(hex)?);
        }
        self.response_received = true;
        debug!("tcp profile {} received {} bytes", id, data.len());
        Ok(data)
    }

    fn close(&mut self) -> Result<(), SocketError> {
        self.response_received = false;
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
}
