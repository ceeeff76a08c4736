use std::time::Duration;

use tracing::debug;

use super::{
    COAP_HEX_CEILING, DatagramSocket, Endpoint, PROFILE_POLL_BUDGET, ProfileKind, ProfileOp,
    SocketError, create_profile, decode_hex, encode_hex, run_profile_command,
};
use crate::at::{AtCommand, SharedChannel};

const KIND: ProfileKind = ProfileKind::Coap;

pub const COAP_BLOCK_EXPONENT: u8 = 5;

/// PDP context the modem binds CoAP profiles to.
const CONTEXT_ID: u32 = 0;

/// CoAP client profile of the modem. The modem carries whole CoAP packets:
/// every send command returns the server's response packet in an indication,
/// which the next receive hands out once.
pub struct CoapProfile {
    modem: SharedChannel,
    profile: u32,
    endpoint: Endpoint,
    reusable: bool,
    released: bool,
    response: Option<Vec<u8>>,
    timeout: Duration,
}

impl CoapProfile {
    /// Allocate a profile bound to `endpoint`. A reusable profile survives
    /// `close()` and is only freed by [`CoapProfile::release`].
    pub fn open(modem: SharedChannel, endpoint: Endpoint, reusable: bool) -> Result<Self, SocketError> {
        let profile = create_profile(
            &modem,
            KIND,
            format!(
                "AT+CCOAPNEW=\"{}\",{},{}",
                endpoint.host, endpoint.port, CONTEXT_ID
            ),
            r"\+CCOAPNEW: ([0-9]+)",
        )?;
        Ok(Self {
            modem,
            profile,
            endpoint,
            reusable,
            released: false,
            response: None,
            timeout: PROFILE_POLL_BUDGET,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    pub fn profile_id(&self) -> u32 {
        self.profile
    }

    pub fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }

    /// Free the profile regardless of the reusable flag.
    pub fn release(&mut self) -> Result<(), SocketError> {
        if self.released {
            return Ok(());
        }
        run_profile_command(
            &self.modem,
            KIND,
            ProfileOp::Close,
            AtCommand::new(format!("AT+CCOAPDEL={}", self.profile)),
        )?;
        self.released = true;
        Ok(())
    }
}

impl DatagramSocket for CoapProfile {
    fn send_to(&mut self, data: &[u8], to: &Endpoint) -> Result<usize, SocketError> {
        if self.released {
            return Err(SocketError::NotConnected(KIND));
        }
        if *to != self.endpoint {
            debug!("coap profile {} is bound to {}, ignoring {}", self.profile, self.endpoint, to);
        }
        let hex = encode_hex(data);
        if hex.len() > COAP_HEX_CEILING {
            return Err(SocketError::TooLarge {
                len: hex.len(),
                max: COAP_HEX_CEILING,
            });
        }

        let cmd = AtCommand::new(format!(
            "AT+CCOAPSEND={},{},\"{}\"",
            self.profile,
            data.len(),
            hex
        ))
        .expect(format!(r"\+CCOAPNMI: {},([0-9]+),(.*)", self.profile))
        .capture(&[2])
        .timeout(self.timeout);
        let resp = run_profile_command(&self.modem, KIND, ProfileOp::Send, cmd)?;
        let reply = resp
            .field(0)
            .ok_or_else(|| SocketError::Indication(resp.captured.join(",")))?;
        self.response = Some(decode_hex(reply)?);
        Ok(data.len())
    }

    fn recv_from(&mut self, _timeout: Duration) -> Result<(Vec<u8>, Option<Endpoint>), SocketError> {
        match self.response.take() {
            Some(data) => Ok((data, Some(self.endpoint.clone()))),
            None => Ok((Vec::new(), None)),
        }
    }

    fn close(&mut self) -> Result<(), SocketError> {
        self.response = None;
        if self.reusable {
            return Ok(());
        }
        self.release()
    }

    fn block_exponent(&self) -> u8 {
        COAP_BLOCK_EXPONENT
    }

    fn supports_upload(&self) -> bool {
        false
    }

    // The modem's CoAP client runs the message layer itself.
    fn acknowledges_responses(&self) -> bool {
        true
    }

    fn poll_budget(&self) -> Duration {
        PROFILE_POLL_BUDGET
    }
}
