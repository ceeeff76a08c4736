use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info};

use super::CoapError;
use super::block::{BlockOption, block_size, next_token};
use super::packet::{
    CODE_GET, CODE_POST, CoapPacket, MessageType, OPT_BLOCK1, OPT_BLOCK2, ResponseCode,
};
use crate::socket::{DatagramSocket, Endpoint};

/// Upper bound for waiting on one uploaded block.
pub const POST_POLL_BUDGET: Duration = Duration::from_secs(5);

const IDLE_BACKOFF: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapResponse {
    pub code: ResponseCode,
    pub payload: Vec<u8>,
    pub blocks: u32,
}

/// Blockwise GET/POST against one server over any datagram socket.
///
/// Exactly one block is in flight at a time. A block without a response in
/// the poll budget fails the transfer; retrying is up to the caller.
pub struct CoapClient<'a> {
    socket: &'a mut dyn DatagramSocket,
    server: Endpoint,
    rng: StdRng,
    poll_budget: Option<Duration>,
}

impl<'a> CoapClient<'a> {
    pub fn new(socket: &'a mut dyn DatagramSocket, server: Endpoint) -> Self {
        Self {
            socket,
            server,
            rng: StdRng::from_entropy(),
            poll_budget: None,
        }
    }

    #[cfg(test)]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Override the per-block budget the socket suggests.
    pub fn with_poll_budget(mut self, budget: Duration) -> Self {
        self.poll_budget = Some(budget);
        self
    }

    pub fn get(&mut self, path: &str, mtype: MessageType) -> Result<CoapResponse, CoapError> {
        let budget = self
            .poll_budget
            .unwrap_or_else(|| self.socket.poll_budget());
        let szx = self.socket.block_exponent();

        let mut request = self.start(mtype, CODE_GET, path);
        request.add_option(OPT_BLOCK2, BlockOption::new(0, false, szx).to_bytes());
        let mut payload = Vec::new();
        let mut blocks = 0u32;

        loop {
            let reply = self.exchange(&request, blocks, budget)?;
            payload.extend_from_slice(&reply.payload);
            blocks += 1;
            match reply.block2() {
                Some(b) if b.more => {
                    request = follow_up(&request);
                    request.add_option(OPT_BLOCK2, BlockOption::new(b.num + 1, false, b.szx).to_bytes());
                }
                _ => {
                    let code = reply.response_code();
                    info!("coap get /{}: {}, {} bytes in {} blocks", path, code, payload.len(), blocks);
                    return Ok(CoapResponse {
                        code,
                        payload,
                        blocks,
                    });
                }
            }
        }
    }

    pub fn post(&mut self, path: &str, payload: &[u8], mtype: MessageType) -> Result<CoapResponse, CoapError> {
        if !self.socket.supports_upload() {
            return Err(CoapError::UnsupportedTransport);
        }
        let budget = self
            .poll_budget
            .unwrap_or_else(|| self.socket.poll_budget().min(POST_POLL_BUDGET));
        let szx = self.socket.block_exponent();

        let mut chunks = payload.chunks(block_size(szx)).peekable();
        let mut request = self.start(mtype, CODE_POST, path);
        let mut num = 0u32;
        let reply = loop {
            let chunk = chunks.next().unwrap_or_default();
            let more = chunks.peek().is_some();
            request.add_option(OPT_BLOCK1, BlockOption::new(num, more, szx).to_bytes());
            request.payload = chunk.to_vec();
            let reply = self.exchange(&request, num, budget)?;
            if !more {
                break reply;
            }
            num += 1;
            request = follow_up(&request);
        };

        let code = reply.response_code();
        if code == ResponseCode::CREATED
            && mtype == MessageType::Con
            && reply.mtype != MessageType::Con
            && !self.socket.acknowledges_responses()
        {
            self.send_empty_ack(reply.message_id)?;
        }
        info!("coap post /{}: {}, {} bytes in {} blocks", path, code, payload.len(), num + 1);
        Ok(CoapResponse {
            code,
            payload: reply.payload,
            blocks: num + 1,
        })
    }

    fn start(&mut self, mtype: MessageType, code: u8, path: &str) -> CoapPacket {
        let token = self.rng.next_u32();
        let mut packet = CoapPacket::new(mtype, code, (self.rng.next_u32() >> 16) as u16);
        packet.token = token.to_be_bytes().to_vec();
        packet.set_uri_host(&self.server.host);
        packet.set_uri_path(path);
        packet
    }

    /// Send one block and wait for the response carrying its token.
    fn exchange(&mut self, request: &CoapPacket, block: u32, budget: Duration) -> Result<CoapPacket, CoapError> {
        let wire = request.encode()?;
        self.socket.send_to(&wire, &self.server)?;
        debug!(
            "coap block {} sent: mid {:#06x}, token {}, {} bytes",
            block,
            request.message_id,
            hex::encode(&request.token),
            wire.len()
        );

        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CoapError::Timeout { block });
            }
            let (data, _) = self.socket.recv_from(remaining)?;
            if data.is_empty() {
                thread::sleep(IDLE_BACKOFF.min(remaining));
                continue;
            }
            let reply = match CoapPacket::decode(&data) {
                Ok(reply) => reply,
                Err(e) => {
                    debug!("ignoring undecodable datagram ({} bytes): {}", data.len(), e);
                    continue;
                }
            };
            if reply.mtype == MessageType::Rst && reply.message_id == request.message_id {
                return Err(CoapError::Reset);
            }
            if reply.token != request.token {
                debug!("ignoring packet with token {}", hex::encode(&reply.token));
                continue;
            }
            if reply.mtype == MessageType::Con && !self.socket.acknowledges_responses() {
                self.send_empty_ack(reply.message_id)?;
            }
            let code = reply.response_code();
            if code.is_error() {
                return Err(CoapError::Rejected(code));
            }
            return Ok(reply);
        }
    }

    fn send_empty_ack(&mut self, message_id: u16) -> Result<(), CoapError> {
        let ack = CoapPacket::empty_ack(message_id).encode()?;
        self.socket.send_to(&ack, &self.server)?;
        debug!("acknowledged mid {:#06x}", message_id);
        Ok(())
    }
}

/// Request for the next block: same resource, next message id and token,
/// block options and payload cleared.
fn follow_up(prev: &CoapPacket) -> CoapPacket {
    let mut next = CoapPacket::new(prev.mtype, prev.code, prev.message_id.wrapping_add(1));
    next.token = next_token(&prev.token);
    next.options = prev
        .options
        .iter()
        .filter(|o| o.number != OPT_BLOCK1 && o.number != OPT_BLOCK2)
        .cloned()
        .collect();
    next
}
