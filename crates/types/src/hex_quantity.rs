use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A `u64` that serializes to/from a `0x`-prefixed hex string, the way every
/// EVM JSON-RPC quantity (block number, timestamp, nonce, ...) is encoded on
/// the wire. Kept distinct from `alloy_primitives::U256` (used for `value`,
/// `gas`, `gasPrice` and friends) because the spec calls these fields out by
/// name as "-hex" suffixed: `block-number-hex`, `block-timestamp-hex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HexU64(pub u64);

impl HexU64 {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for HexU64 {
    fn from(value: u64) -> Self {
        HexU64(value)
    }
}

impl fmt::Display for HexU64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Serialize for HexU64 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for HexU64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let trimmed = s.strip_prefix("0x").unwrap_or(&s);
        let value = u64::from_str_radix(trimmed, 16)
            .map_err(|e| D::Error::custom(format!("invalid hex quantity {s:?}: {e}")))?;
        Ok(HexU64(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let value = HexU64(1_234_567);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"0x12d687\"");
        let back: HexU64 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn accepts_hex_without_prefix() {
        let back: HexU64 = serde_json::from_str("\"2a\"").unwrap();
        assert_eq!(back.as_u64(), 0x2a);
    }
}
