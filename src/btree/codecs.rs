//! Key and value codecs.
//!
//! The tree compares keys as raw bytes, so [`KeyCodec::encode_key`] must be
//! order-preserving: `a < b` implies `encode(a) < encode(b)` under
//! lexicographic byte comparison. Value encodings carry no such contract.

use crate::types::{Result, ShaleError};

/// Types usable as tree keys.
pub trait KeyCodec: Sized + Send + Sync + 'static {
    /// Order-preserving byte encoding of the key.
    fn encode_key(&self) -> Vec<u8>;
    /// Inverse of [`encode_key`](Self::encode_key).
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Types usable as tree values.
pub trait ValCodec: Sized + Send + Sync + 'static {
    /// Byte encoding of the value.
    fn encode_value(&self) -> Vec<u8>;
    /// Inverse of [`encode_value`](Self::encode_value).
    fn decode_value(bytes: &[u8]) -> Result<Self>;
}

impl KeyCodec for u64 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        let buf: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ShaleError::Corruption("u64 key length"))?;
        Ok(u64::from_be_bytes(buf))
    }
}

impl KeyCodec for i64 {
    /// Big-endian with the sign bit flipped so negatives sort before
    /// positives.
    fn encode_key(&self) -> Vec<u8> {
        ((*self as u64) ^ (1 << 63)).to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        let buf: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ShaleError::Corruption("i64 key length"))?;
        Ok((u64::from_be_bytes(buf) ^ (1 << 63)) as i64)
    }
}

impl KeyCodec for Vec<u8> {
    fn encode_key(&self) -> Vec<u8> {
        self.clone()
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl KeyCodec for String {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ShaleError::Corruption("string key not utf-8"))
    }
}

impl ValCodec for u64 {
    fn encode_value(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_value(bytes: &[u8]) -> Result<Self> {
        let buf: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ShaleError::Corruption("u64 value length"))?;
        Ok(u64::from_be_bytes(buf))
    }
}

impl ValCodec for i64 {
    fn encode_value(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_value(bytes: &[u8]) -> Result<Self> {
        let buf: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ShaleError::Corruption("i64 value length"))?;
        Ok(i64::from_be_bytes(buf))
    }
}

impl ValCodec for Vec<u8> {
    fn encode_value(&self) -> Vec<u8> {
        self.clone()
    }

    fn decode_value(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl ValCodec for String {
    fn encode_value(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode_value(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ShaleError::Corruption("string value not utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_keys_sort_bytewise() {
        let pairs = [(0u64, 1u64), (255, 256), (1, u64::MAX)];
        for (a, b) in pairs {
            assert!(a.encode_key() < b.encode_key());
        }
    }

    #[test]
    fn i64_keys_sort_bytewise_across_zero() {
        let values = [i64::MIN, -1_000_000, -1, 0, 1, 1_000_000, i64::MAX];
        for pair in values.windows(2) {
            assert!(pair[0].encode_key() < pair[1].encode_key());
        }
        for v in values {
            assert_eq!(i64::decode_key(&v.encode_key()).unwrap(), v);
        }
    }

    #[test]
    fn string_keys_round_trip() {
        let s = String::from("wedge");
        assert_eq!(String::decode_key(&s.encode_key()).unwrap(), s);
        assert!(matches!(
            String::decode_key(&[0xFF, 0xFE]).unwrap_err(),
            ShaleError::Corruption(_)
        ));
    }

    #[test]
    fn short_fixed_width_key_is_rejected() {
        assert!(u64::decode_key(&[1, 2, 3]).is_err());
    }
}
