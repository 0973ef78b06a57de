//! Order-preserving base64 variant used to escape variable-length
//! key-codec components (`encoding::keycode`). Standard base64 is NOT
//! order-preserving: its alphabet's ASCII order doesn't match the value
//! order of the 6-bit groups it encodes (`'0'`-`'9'` sort before `'A'`-`'Z'`
//! in ASCII despite coming later in the alphabet), and its `=` padding
//! varies in length in a way that can disturb comparisons across inputs of
//! different sizes. This codec instead uses a 64-symbol alphabet that is
//! strictly ascending in ASCII order and disables padding, so lexicographic
//! comparison of the encoded bytes always matches lexicographic comparison
//! of the original bytes. None of its symbols collide with the `0x1E`
//! composite-key separator, so encoding a component this way before
//! appending the separator still guarantees the separator can't appear
//! unescaped inside it.

use base64::alphabet::Alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

/// `'>'` (0x3E) through `'}'` (0x7D): 64 distinct, printable, non-separator
/// bytes in strictly ascending order, so every 6-bit group value maps to a
/// byte larger than the one before it.
const ALPHABET: &str = ">?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_`abcdefghijklmnopqrstuvwxyz{|}";

fn engine() -> GeneralPurpose {
    let alphabet = Alphabet::new(ALPHABET).expect("ALPHABET is a valid 64-symbol base64 alphabet");
    let config = GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone);
    GeneralPurpose::new(&alphabet, config)
}

pub struct Base64Codec;

impl Base64Codec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, data: &[u8]) -> Result<String, String> {
        Ok(engine().encode(data))
    }

    pub fn decode(&self, encoded: &str) -> Result<Vec<u8>, String> {
        engine()
            .decode(encoded)
            .map_err(|e| format!("base64 decode error: {e}"))
    }
}

impl Default for Base64Codec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let codec = Base64Codec::new();
        for data in [&b""[..], b"hello", &[0, 1, 2, 3, 255], b"hello world"] {
            let encoded = codec.encode(data).unwrap();
            assert_eq!(codec.decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn alphabet_never_contains_the_keycode_separator() {
        let codec = Base64Codec::new();
        let encoded = codec.encode(&(0u8..=255).collect::<Vec<_>>()).unwrap();
        assert!(!encoded.bytes().any(|b| b == 0x1E));
    }

    #[test]
    fn encoding_preserves_byte_string_order() {
        let codec = Base64Codec::new();
        let mut raw: Vec<&[u8]> = vec![
            b"",
            b"\x00",
            b"\x00\x00",
            b"\x00\x01",
            b"a",
            b"ab",
            b"abc",
            b"abd",
            b"b",
            b"\xff",
            b"\xff\xff",
        ];
        raw.sort();

        let encoded: Vec<String> = raw.iter().map(|r| codec.encode(r).unwrap()).collect();
        let mut sorted_encoded = encoded.clone();
        sorted_encoded.sort();
        assert_eq!(encoded, sorted_encoded);
    }
}
