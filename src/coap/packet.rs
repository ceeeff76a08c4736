use std::fmt;

use super::CoapError;
use super::block::BlockOption;

const VERSION: u8 = 1;
const PAYLOAD_MARKER: u8 = 0xFF;
const MAX_TOKEN_LEN: usize = 8;

pub const CODE_EMPTY: u8 = 0x00;
pub const CODE_GET: u8 = 0x01;
pub const CODE_POST: u8 = 0x02;

pub const OPT_URI_HOST: u16 = 3;
pub const OPT_URI_PATH: u16 = 11;
pub const OPT_BLOCK2: u16 = 23;
pub const OPT_BLOCK1: u16 = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Con = 0,
    Non = 1,
    Ack = 2,
    Rst = 3,
}

impl MessageType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Con,
            1 => MessageType::Non,
            2 => MessageType::Ack,
            _ => MessageType::Rst,
        }
    }
}

/// Response code split into class and detail, printed as `c.dd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode {
    pub class: u8,
    pub detail: u8,
}

impl ResponseCode {
    pub const CREATED: ResponseCode = ResponseCode::new(2, 1);
    #[cfg(test)]
    pub const CONTENT: ResponseCode = ResponseCode::new(2, 5);
    #[cfg(test)]
    pub const CONTINUE: ResponseCode = ResponseCode::new(2, 31);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    pub fn decode(code: u8) -> Self {
        Self::new(code >> 5, code & 0x1F)
    }

    #[cfg(test)]
    pub fn encode(self) -> u8 {
        (self.class << 5) | (self.detail & 0x1F)
    }

    /// Client or server error class.
    pub fn is_error(self) -> bool {
        self.class >= 4
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapPacket {
    pub mtype: MessageType,
    pub code: u8,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Vec<CoapOption>,
    pub payload: Vec<u8>,
}

impl CoapPacket {
    pub fn new(mtype: MessageType, code: u8, message_id: u16) -> Self {
        Self {
            mtype,
            code,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Empty acknowledgement of the message `message_id`.
    pub fn empty_ack(message_id: u16) -> Self {
        Self::new(MessageType::Ack, CODE_EMPTY, message_id)
    }

    pub fn add_option(&mut self, number: u16, value: Vec<u8>) {
        self.options.push(CoapOption { number, value });
    }

    pub fn set_uri_host(&mut self, host: &str) {
        self.add_option(OPT_URI_HOST, host.as_bytes().to_vec());
    }

    /// One Uri-Path option per non-empty segment.
    pub fn set_uri_path(&mut self, path: &str) {
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(OPT_URI_PATH, seg.as_bytes().to_vec());
        }
    }

    pub fn option(&self, number: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.number == number)
            .map(|o| o.value.as_slice())
    }

    #[cfg(test)]
    pub fn uri_path(&self) -> String {
        self.options
            .iter()
            .filter(|o| o.number == OPT_URI_PATH)
            .map(|o| String::from_utf8_lossy(&o.value))
            .collect::<Vec<_>>()
            .join("/")
    }

    #[cfg(test)]
    pub fn block1(&self) -> Option<BlockOption> {
        self.option(OPT_BLOCK1).map(BlockOption::decode)
    }

    pub fn block2(&self) -> Option<BlockOption> {
        self.option(OPT_BLOCK2).map(BlockOption::decode)
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::decode(self.code)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CoapError> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(CoapError::Malformed("token longer than 8 bytes"));
        }
        let mut out = Vec::with_capacity(4 + self.token.len() + self.payload.len() + 16);
        out.push((VERSION << 6) | ((self.mtype as u8) << 4) | self.token.len() as u8);
        out.push(self.code);
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.token);

        // Options go out in ascending number; repeated options keep their order.
        let mut options: Vec<&CoapOption> = self.options.iter().collect();
        options.sort_by_key(|o| o.number);
        let mut last = 0u16;
        for opt in options {
            let (delta_nibble, delta_ext) = extended(opt.number - last);
            let (len_nibble, len_ext) = extended(opt.value.len() as u16);
            out.push((delta_nibble << 4) | len_nibble);
            out.extend_from_slice(&delta_ext);
            out.extend_from_slice(&len_ext);
            out.extend_from_slice(&opt.value);
            last = opt.number;
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(&self.payload);
        }
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoapError> {
        if buf.len() < 4 {
            return Err(CoapError::Malformed("short header"));
        }
        if buf[0] >> 6 != VERSION {
            return Err(CoapError::Malformed("unknown version"));
        }
        let tkl = (buf[0] & 0x0F) as usize;
        if tkl > MAX_TOKEN_LEN || buf.len() < 4 + tkl {
            return Err(CoapError::Malformed("bad token length"));
        }
        let mut packet = CoapPacket::new(
            MessageType::from_bits(buf[0] >> 4),
            buf[1],
            u16::from_be_bytes([buf[2], buf[3]]),
        );
        packet.token = buf[4..4 + tkl].to_vec();

        let mut pos = 4 + tkl;
        let mut number = 0u16;
        while pos < buf.len() {
            if buf[pos] == PAYLOAD_MARKER {
                pos += 1;
                if pos == buf.len() {
                    return Err(CoapError::Malformed("payload marker without payload"));
                }
                packet.payload = buf[pos..].to_vec();
                break;
            }
            let head = buf[pos];
            pos += 1;
            let delta = read_extended(head >> 4, buf, &mut pos)?;
            let len = read_extended(head & 0x0F, buf, &mut pos)? as usize;
            if pos + len > buf.len() {
                return Err(CoapError::Malformed("option overruns packet"));
            }
            number = number
                .checked_add(delta)
                .ok_or(CoapError::Malformed("option number overflow"))?;
            packet.add_option(number, buf[pos..pos + len].to_vec());
            pos += len;
        }
        Ok(packet)
    }
}

fn extended(value: u16) -> (u8, Vec<u8>) {
    match value {
        0..=12 => (value as u8, Vec::new()),
        13..=268 => (13, vec![(value - 13) as u8]),
        _ => (14, (value - 269).to_be_bytes().to_vec()),
    }
}

fn read_extended(nibble: u8, buf: &[u8], pos: &mut usize) -> Result<u16, CoapError> {
    match nibble {
        0..=12 => Ok(nibble as u16),
        13 => {
            let b = *buf.get(*pos).ok_or(CoapError::Malformed("truncated option"))?;
            *pos += 1;
            Ok(b as u16 + 13)
        }
        14 => {
            let bytes = buf
                .get(*pos..*pos + 2)
                .ok_or(CoapError::Malformed("truncated option"))?;
            *pos += 2;
            u16::from_be_bytes([bytes[0], bytes[1]])
                .checked_add(269)
                .ok_or(CoapError::Malformed("option value overflow"))
        }
        _ => Err(CoapError::Malformed("reserved option nibble")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_formats_with_two_digit_detail() {
        let code = ResponseCode::decode(0x41);
        assert_eq!((code.class, code.detail), (2, 1));
        assert_eq!(code.to_string(), "2.01");
        assert_eq!(code, ResponseCode::CREATED);
        assert_eq!(ResponseCode::decode(0x84).to_string(), "4.04");
        assert!(ResponseCode::decode(0xA0).is_error());
        assert_eq!(ResponseCode::CONTINUE.encode(), 0x5F);
    }

    #[test]
    fn get_request_wire_layout() {
        let mut p = CoapPacket::new(MessageType::Con, CODE_GET, 0x1234);
        p.token = vec![0xAB, 0xCD];
        p.set_uri_host("10.0.0.1");
        p.set_uri_path("short");
        p.add_option(OPT_BLOCK2, vec![0x04]);
        let wire = p.encode().unwrap();

        assert_eq!(&wire[..6], [0x42, 0x01, 0x12, 0x34, 0xAB, 0xCD]);
        // Uri-Host: delta 3, length 8.
        assert_eq!(wire[6], 0x38);
        // Uri-Path after 8 bytes of host: delta 8, length 5.
        assert_eq!(wire[15], 0x85);
        // Block2: delta 12, length 1.
        assert_eq!(wire[21], 0xC1);
        assert_eq!(wire[22], 0x04);
        assert_eq!(wire.len(), 23);

        assert_eq!(CoapPacket::decode(&wire).unwrap(), p);
    }

    #[test]
    fn extended_option_delta_and_length() {
        let mut p = CoapPacket::new(MessageType::Non, CODE_POST, 7);
        p.add_option(OPT_BLOCK1, vec![0x0E]);
        p.add_option(OPT_URI_HOST, vec![b'h'; 300]);
        p.payload = b"body".to_vec();
        let wire = p.encode().unwrap();
        let back = CoapPacket::decode(&wire).unwrap();
        assert_eq!(back.option(OPT_URI_HOST).map(<[u8]>::len), Some(300));
        assert_eq!(back.block1().unwrap().szx, 6);
        assert_eq!(back.payload, b"body");
    }

    #[test]
    fn path_segments_are_separate_options() {
        let mut p = CoapPacket::new(MessageType::Con, CODE_GET, 1);
        p.set_uri_path("/sensors/long");
        assert_eq!(p.options.len(), 2);
        assert_eq!(p.uri_path(), "sensors/long");
    }

    #[test]
    fn empty_ack_is_header_only() {
        let wire = CoapPacket::empty_ack(0xBEEF).encode().unwrap();
        assert_eq!(wire, [0x60, 0x00, 0xBE, 0xEF]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(CoapPacket::decode(&[0x40]), Err(CoapError::Malformed(_))));
        assert!(matches!(CoapPacket::decode(&[0x80, 0, 0, 0]), Err(CoapError::Malformed(_))));
        assert!(matches!(CoapPacket::decode(&[0x49, 0, 0, 0]), Err(CoapError::Malformed(_))));
        assert!(matches!(CoapPacket::decode(&[0x40, 0x45, 0, 1, 0xFF]), Err(CoapError::Malformed(_))));
        assert!(matches!(CoapPacket::decode(&[0x40, 0x45, 0, 1, 0x3F]), Err(CoapError::Malformed(_))));

        let mut long = CoapPacket::new(MessageType::Con, CODE_GET, 1);
        long.token = vec![0; 9];
        assert!(long.encode().is_err());
    }
}
