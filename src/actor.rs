//! Opaque, server-assigned client identity (spec §3.1).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier assigned by the server when a client activates.
///
/// Stored as a fixed-size byte blob (hex-encoded on the wire and in
/// `Debug`/`Display`), mirroring the real system's 12-byte (Mongo
/// ObjectID-shaped) actor IDs. The all-zero value is the `initial` sentinel
/// used for unattached (pre-activation) state.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ActorID([u8; 12]);

impl ActorID {
    /// The sentinel actor used before a client has activated against a
    /// server (Detached status). Sorts before every real actor.
    pub const INITIAL: ActorID = ActorID([0u8; 12]);

    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        ActorID(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 24 {
            return None;
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in bytes.iter_mut().enumerate() {
            *chunk = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(ActorID(bytes))
    }
}

impl fmt::Debug for ActorID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorID({})", self.to_hex())
    }
}

impl fmt::Display for ActorID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_is_all_zero_and_sorts_first() {
        let a = ActorID::INITIAL;
        assert!(a.is_initial());
        let b = ActorID::from_bytes([1; 12]);
        assert!(a < b);
    }

    #[test]
    fn hex_roundtrip() {
        let a = ActorID::from_bytes([0xab; 12]);
        let hex = a.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(ActorID::from_hex(&hex), Some(a));
    }
}
