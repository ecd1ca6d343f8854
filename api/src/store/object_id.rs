use std::fmt;

use rand_core::{OsRng, RngCore};

/// 12-byte record id: big-endian seconds since the epoch followed by 8 random bytes,
/// rendered as 24 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let secs = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        OsRng.fill_bytes(&mut bytes[4..]);
        Self(hex::encode(bytes))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::is_valid(raw).then(|| Self(raw.to_ascii_lowercase()))
    }

    pub fn is_valid(raw: &str) -> bool {
        raw.len() == 24 && raw.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
