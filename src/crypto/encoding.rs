//! Binary-to-text transform applied to data keys at the Key Vault
//! boundary. The REST transport carries key material as unpadded
//! base64url, so a data key is encoded before wrap and the unwrapped
//! text is decoded back to bytes.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

pub fn encode_data_key(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_data_key(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(encode_data_key(&[0x01, 0x02, 0x03]), "AQID");
        assert_eq!(encode_data_key(&[0xfb, 0xff]), "-_8");
        assert_eq!(decode_data_key("-_8").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn no_padding() {
        let text = encode_data_key(&[0u8; 32]);
        assert!(!text.contains('='));
        assert_eq!(decode_data_key(&text).unwrap(), vec![0u8; 32]);
    }

    #[test]
    fn rejects_foreign_text() {
        assert!(decode_data_key("not base64!").is_err());
        // Standard alphabet with padding is not accepted.
        assert!(decode_data_key("+/8=").is_err());
    }
}
