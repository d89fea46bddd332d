//! Zero-free encoding of fixed-width integers as trie keys.
//!
//! The trie treats a zero byte as the end of a key, so integers cannot be
//! stored as their raw bytes. An encoded key is the big-endian bytes of the
//! value with every zero byte replaced by `0x01`, followed by a mask byte.
//! The mask starts at `0xFF` and bit `i` is cleared when byte `i` was zero.
//!
//! For `u64` the value zero clears every mask bit, which leaves a zero mask
//! byte: the key then ends after the eight `0x01` bytes, and [`decode`]
//! accepts that shorter form.
//!
//! Byte order follows numeric order except that `0x00` and `0x01` bytes
//! compare equal until the mask byte, so iteration over encoded keys is only
//! approximately numeric.

use smallvec::SmallVec;

/// Replacement for zero bytes.
const SENTINEL: u8 = 0x01;

/// Encoded key bytes: at most eight value bytes plus the mask.
pub type EncodedKey = SmallVec<[u8; 9]>;

/// Fixed-width unsigned integers usable as trie keys.
pub trait NumericKey: Sized + Copy {
    /// Value bytes, excluding the mask.
    const WIDTH: usize;

    fn encode_key(self) -> EncodedKey;

    /// Inverse of [`NumericKey::encode_key`]; `None` for bytes it could not
    /// have produced.
    fn decode_key(bytes: &[u8]) -> Option<Self>;
}

/// Mask of a value whose every byte is zero.
#[inline]
fn all_zero_mask(width: usize) -> u8 {
    (0xFFu16 << width) as u8
}

fn encode_bytes(raw: &[u8]) -> EncodedKey {
    let mut out = EncodedKey::new();
    let mut mask = 0xFFu8;
    for (i, &byte) in raw.iter().enumerate() {
        if byte == 0 {
            mask ^= 1 << i;
            out.push(SENTINEL);
        } else {
            out.push(byte);
        }
    }
    if mask != 0 {
        out.push(mask);
    }
    out
}

fn decode_bytes<const W: usize>(bytes: &[u8]) -> Option<[u8; W]> {
    let (value, mask) = match bytes.len() {
        n if n == W + 1 => (&bytes[..W], bytes[W]),
        n if n == W && all_zero_mask(W) == 0 => (bytes, 0),
        _ => return None,
    };
    // Bits above the value width are never cleared.
    let unused = all_zero_mask(W);
    if mask & unused != unused || (mask == 0 && bytes.len() != W) {
        return None;
    }

    let mut raw = [0u8; W];
    for (i, (&byte, out)) in value.iter().zip(raw.iter_mut()).enumerate() {
        let zeroed = mask & (1 << i) == 0;
        match (zeroed, byte) {
            (_, 0) => return None,
            (true, SENTINEL) => *out = 0,
            (true, _) => return None,
            (false, byte) => *out = byte,
        }
    }
    Some(raw)
}

macro_rules! impl_numeric_key {
    ($($ty:ty),*) => {$(
        impl NumericKey for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn encode_key(self) -> EncodedKey {
                encode_bytes(&self.to_be_bytes())
            }

            fn decode_key(bytes: &[u8]) -> Option<Self> {
                decode_bytes::<{ std::mem::size_of::<$ty>() }>(bytes).map(<$ty>::from_be_bytes)
            }
        }
    )*};
}

impl_numeric_key!(u16, u32, u64);

/// Encode `value` as a zero-free trie key.
///
/// Encoded keys sort only approximately in numeric order: a `0x00` byte and a
/// `0x01` byte encode to the same sentinel, and only the trailing mask tells
/// them apart. Sort decoded values when exact numeric order matters.
pub fn encode<K: NumericKey>(value: K) -> EncodedKey {
    value.encode_key()
}

/// Decode a key produced by [`encode`].
pub fn decode<K: NumericKey>(bytes: &[u8]) -> Option<K> {
    K::decode_key(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Judy;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_known_encodings() {
        assert_eq!(<u32 as NumericKey>::WIDTH, 4);
        assert_eq!(encode(0x0101u16).len(), <u16 as NumericKey>::WIDTH + 1);
        assert_eq!(encode(0x1234u16).as_slice(), &[0x12, 0x34, 0xFF]);
        assert_eq!(encode(0x0100u16).as_slice(), &[0x01, 0x01, 0xFD]);
        assert_eq!(encode(0u32).as_slice(), &[0x01, 0x01, 0x01, 0x01, 0xF0]);
        assert_eq!(encode(0u64).as_slice(), &[0x01; 8]);
        assert_eq!(
            encode(0x00FF_0000_0000_0001u64).as_slice(),
            &[0x01, 0xFF, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x82]
        );
    }

    #[test]
    fn test_encoded_keys_have_no_zero_byte() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let value: u64 = rng.gen::<u64>() & rng.gen::<u64>() & rng.gen::<u64>();
            let key = encode(value);
            assert!(!key.contains(&0), "{value:#x} -> {key:?}");
            assert_eq!(decode::<u64>(&key), Some(value));
        }
        for value in [0u32, 1, 0xFF, 0x100, 0xFF00_0000, u32::MAX] {
            assert_eq!(decode::<u32>(&encode(value)), Some(value));
        }
        for value in [0u16, 1, 0x100, u16::MAX] {
            assert_eq!(decode::<u16>(&encode(value)), Some(value));
        }
    }

    #[test]
    fn test_decode_rejects_foreign_bytes() {
        assert_eq!(decode::<u32>(&[1, 2, 3]), None);
        assert_eq!(decode::<u32>(&[1, 1, 1, 1]), None);
        assert_eq!(decode::<u32>(&[0, 2, 3, 4, 0xFF]), None);
        assert_eq!(decode::<u32>(&[5, 2, 3, 4, 0xFE]), None);
        assert_eq!(decode::<u32>(&[5, 2, 3, 4, 0x7F]), None);
        assert_eq!(decode::<u64>(&[2; 8]), None);
    }

    #[test]
    fn test_order_without_low_bytes() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut values: Vec<u32> = (0..1000)
            .map(|_| u32::from_be_bytes(std::array::from_fn(|_| rng.gen_range(2..=255))))
            .collect();
        values.sort_unstable();
        values.dedup();
        let keys: Vec<EncodedKey> = values.iter().map(|&v| encode(v)).collect();
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_binary_keys_in_trie() {
        let mut t = Judy::open(32).unwrap();
        let values = [0u64, 1, 0x100, 0xFFFF_FFFF, u64::MAX, 42 << 32];
        for (i, &value) in values.iter().enumerate() {
            *t.insert(&encode(value)).unwrap() = i as u64 + 1;
        }
        assert_eq!(t.len(), values.len());
        for (i, &value) in values.iter().enumerate() {
            assert_eq!(t.get(&encode(value)), Some(i as u64 + 1));
        }

        let mut decoded: Vec<u64> = t.iter().filter_map(|(k, _)| decode(&k)).collect();
        decoded.sort_unstable();
        let mut expected = values.to_vec();
        expected.sort_unstable();
        assert_eq!(decoded, expected);
    }
}
