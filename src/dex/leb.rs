//! LEB128 codecs as used by the DEX format. Values are at most 32 bits wide, so a
//! valid encoding never exceeds five bytes.

use crate::dex::error::DexError;

const MAX_LEB_BYTES: usize = 5;

pub(crate) fn encode_uleb128(buffer: &mut Vec<u8>, value: u32) -> usize {
    let mut remaining = value;
    let mut count = 0;
    loop {
        let byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        count += 1;
        if remaining == 0 {
            buffer.push(byte);
            return count;
        }
        buffer.push(byte | 0x80);
    }
}

pub(crate) fn encode_sleb128(buffer: &mut Vec<u8>, value: i32) -> usize {
    let mut remaining = value;
    let mut count = 0;
    loop {
        let byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        count += 1;
        let done = (remaining == 0 && byte & 0x40 == 0) || (remaining == -1 && byte & 0x40 != 0);
        if done {
            buffer.push(byte);
            return count;
        }
        buffer.push(byte | 0x80);
    }
}

pub(crate) fn encode_uleb128p1(buffer: &mut Vec<u8>, value: i32) -> usize {
    encode_uleb128(buffer, value.wrapping_add(1) as u32)
}

pub(crate) fn uleb128_size(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    std::cmp::max(1, bits.div_ceil(7))
}

/// Decodes an unsigned LEB128 value, returning it with the number of bytes consumed.
pub(crate) fn decode_uleb128(encoded: &[u8]) -> Result<(u32, usize), DexError> {
    let mut value: u32 = 0;
    for (i, &byte) in encoded.iter().take(MAX_LEB_BYTES).enumerate() {
        value |= ((byte & 0x7f) as u32).wrapping_shl(7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if encoded.len() < MAX_LEB_BYTES {
        Err(DexError::new("Unexpected end of stream reading uleb128"))
    } else {
        Err(DexError::new("Invalid uleb128 value: more than 5 bytes"))
    }
}

pub(crate) fn decode_sleb128(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let mut value: i32 = 0;
    for (i, &byte) in encoded.iter().take(MAX_LEB_BYTES).enumerate() {
        let shift = 7 * i as u32;
        value |= ((byte & 0x7f) as i32).wrapping_shl(shift);
        if byte & 0x80 == 0 {
            let used = shift + 7;
            if used < 32 && byte & 0x40 != 0 {
                value |= (-1i32).wrapping_shl(used);
            }
            return Ok((value, i + 1));
        }
    }
    if encoded.len() < MAX_LEB_BYTES {
        Err(DexError::new("Unexpected end of stream reading sleb128"))
    } else {
        Err(DexError::new("Invalid sleb128 value: more than 5 bytes"))
    }
}

pub(crate) fn decode_uleb128p1(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let (v, c) = decode_uleb128(encoded)?;
    Ok(((v as i32).wrapping_sub(1), c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16256, vec![0x80, 0x7F]),
            (624485, vec![0xE5, 0x8E, 0x26]),
            (u32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, expected) in cases {
            let mut out = vec![];
            let n = encode_uleb128(&mut out, value);
            assert_eq!(out, expected);
            assert_eq!(n, expected.len());
            assert_eq!(uleb128_size(value), expected.len());
            assert_eq!(decode_uleb128(&out).unwrap(), (value, expected.len()));
        }
    }

    #[test]
    fn test_sleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (-1, vec![0x7F]),
            (127, vec![0xFF, 0x00]),
            (-128, vec![0x80, 0x7F]),
            (-123456, vec![0xC0, 0xBB, 0x78]),
        ];

        for (value, expected) in cases {
            let mut out = vec![];
            encode_sleb128(&mut out, value);
            assert_eq!(out, expected);
            assert_eq!(decode_sleb128(&expected).unwrap().0, value);
        }
    }

    #[test]
    fn test_uleb128p1_no_index() {
        let mut out = vec![];
        encode_uleb128p1(&mut out, -1);
        assert_eq!(out, vec![0x00]);
        assert_eq!(decode_uleb128p1(&out).unwrap(), (-1, 1));
    }

    #[test]
    fn test_truncated() {
        assert!(decode_uleb128(&[0x80, 0x80]).is_err());
        assert!(decode_sleb128(&[]).is_err());
        assert!(decode_uleb128(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]).is_err());
    }
}
