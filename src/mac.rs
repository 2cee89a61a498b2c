//! Client hardware identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of the textual form `XX:XX:XX:XX:XX:XX`.
pub const MAC_TEXT_LEN: usize = 17;

/// A six-byte client hardware address.
///
/// Serialized as its textual `XX:XX:XX:XX:XX:XX` form so journal records
/// stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    /// Parses `XX:XX:XX:XX:XX:XX` (case-insensitive, `-` also accepted).
    fn from_str(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidMessage(format!("Invalid MAC address: {:?}", text));

        let normalized = text.trim().replace('-', ":");
        let mut bytes = [0u8; 6];
        let mut parts = normalized.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|byte| byte.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uppercase() {
        let mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0x0d, 0xee, 0xff]);
        assert_eq!(mac.to_string(), "AA:BB:CC:0D:EE:FF");
        assert_eq!(mac.to_string().len(), MAC_TEXT_LEN);
    }

    #[test]
    fn test_parse_accepts_lowercase_and_dashes() {
        let upper: MacAddr = "00:11:22:33:44:55".parse().unwrap();
        let lower: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let dashed: MacAddr = "AA-BB-CC-DD-EE-FF".parse().unwrap();

        assert_eq!(upper.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(lower, dashed);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("AA:BB:CC:DD:EE".parse::<MacAddr>().is_err());
        assert!("AA:BB:CC:DD:EE:GG".parse::<MacAddr>().is_err());
        assert!("AA:BB:CC:DD:EE:FF:00".parse::<MacAddr>().is_err());
        assert!("AABBCCDDEEFF".parse::<MacAddr>().is_err());
        assert!("A:BB:CC:DD:EE:FFF".parse::<MacAddr>().is_err());
        assert!("+A:BB:CC:DD:EE:FF".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_serde_uses_text_form() {
        let mac = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"00:11:22:33:44:55\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}
