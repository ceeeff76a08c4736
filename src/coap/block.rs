/// Block1/Block2 option value: `(num << 4) | (more ? 0x08 : 0) | szx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    pub num: u32,
    pub more: bool,
    /// Size exponent, block size is `2^(szx + 4)`.
    pub szx: u8,
}

impl BlockOption {
    pub fn new(num: u32, more: bool, szx: u8) -> Self {
        Self { num, more, szx }
    }

    pub fn value(&self) -> u32 {
        let more = if self.more { 0x08 } else { 0 };
        (self.num << 4) | more | u32::from(self.szx & 0x07)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        to_minimum_bytes(self.value())
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let value = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        Self {
            num: value >> 4,
            more: value & 0x08 != 0,
            szx: (value & 0x07) as u8,
        }
    }

    #[cfg(test)]
    pub fn size(&self) -> usize {
        block_size(self.szx)
    }
}

pub fn block_size(szx: u8) -> usize {
    1 << (szx.min(6) + 4)
}

/// Big-endian bytes of `value` without leading zero bytes; zero is one byte.
pub fn to_minimum_bytes(value: u32) -> Vec<u8> {
    let bits = (32 - value.leading_zeros()).max(1) as usize;
    let len = bits.div_ceil(8);
    value.to_be_bytes()[4 - len..].to_vec()
}

/// Token of the next block of the same transfer.
pub fn next_token(token: &[u8]) -> Vec<u8> {
    let value = token.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    to_minimum_bytes(((value + 1) % 0x1_0000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_number_more_and_exponent() {
        let b = BlockOption::new(3, true, 4);
        assert_eq!(b.value(), 0x3C);
        assert_eq!(b.to_bytes(), [0x3C]);
        assert_eq!(BlockOption::decode(&[0x3C]), b);
        assert_eq!(b.size(), 256);
    }

    #[test]
    fn large_block_numbers_use_more_bytes() {
        let b = BlockOption::new(20, false, 6);
        assert_eq!(b.to_bytes(), [0x01, 0x46]);
        assert_eq!(BlockOption::decode(&[0x01, 0x46]), b);
        assert_eq!(BlockOption::decode(&[]), BlockOption::new(0, false, 0));
    }

    #[test]
    fn minimum_bytes() {
        assert_eq!(to_minimum_bytes(0), [0x00]);
        assert_eq!(to_minimum_bytes(0xFF), [0xFF]);
        assert_eq!(to_minimum_bytes(0x100), [0x01, 0x00]);
        assert_eq!(to_minimum_bytes(0x0102_0304), [1, 2, 3, 4]);
    }

    #[test]
    fn token_rotates_modulo_16_bits() {
        assert_eq!(next_token(&[0xDE, 0xAD, 0x12, 0x34]), [0x12, 0x35]);
        assert_eq!(next_token(&[0x00, 0xFF]), [0x01, 0x00]);
        assert_eq!(next_token(&[0xFF, 0xFF]), [0x00]);
        assert_eq!(next_token(&[]), [0x01]);
    }

    #[test]
    fn chunked_payload_reassembles() {
        let payload: Vec<u8> = (0..2050u32).map(|i| i as u8).collect();
        let chunks: Vec<&[u8]> = payload.chunks(block_size(6)).collect();
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), [1024, 1024, 2]);
        assert_eq!(chunks.concat(), payload);
    }
}
