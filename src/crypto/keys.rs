use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::BackendError;

/// Length of data keys produced by [`DataKey::generate`].
pub const DATA_KEY_LEN: usize = 32;

/// A plaintext data key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: Vec<u8>,
}

impl DataKey {
    pub fn generate() -> Result<Self, BackendError> {
        let mut bytes = vec![0u8; DATA_KEY_LEN];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| BackendError::Crypto(format!("getrandom failed: {e}")))?;
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = DataKey::generate().unwrap();
        let b = DataKey::generate().unwrap();
        assert_eq!(a.as_bytes().len(), DATA_KEY_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn debug_is_redacted() {
        let key = DataKey::from_bytes(vec![0x42; 4]);
        assert_eq!(format!("{key:?}"), "DataKey(***)");
    }
}
