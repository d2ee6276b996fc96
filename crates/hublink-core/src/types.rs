//! Shared value types: peripheral addresses, peripheral handles and run outcomes.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("static MAC address pattern")
});

/// Returns `true` if `s` is a colon-separated Bluetooth address (`AA:BB:CC:DD:EE:FF`).
#[must_use]
pub fn is_valid_mac_address(s: &str) -> bool {
    MAC_ADDRESS_RE.is_match(s)
}

/// Error returned when parsing a [`PeripheralAddress`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid Bluetooth address '{input}', expected format AA:BB:CC:DD:EE:FF")]
pub struct AddressParseError {
    /// The rejected input.
    pub input: String,
}

/// A 48-bit Bluetooth device address.
///
/// Used for logging and for matching transport events against the current
/// candidate. Formats as upper-case, colon-separated hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralAddress([u8; 6]);

impl PeripheralAddress {
    /// Creates an address from its six octets, most significant first.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the six octets of the address.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for PeripheralAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressParseError {
            input: s.to_string(),
        };
        if !is_valid_mac_address(s) {
            return Err(invalid());
        }
        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(s.split(':')) {
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl Serialize for PeripheralAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeripheralAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A discovered device that can be offered as connection candidate.
///
/// The radio stack owns the underlying device object; this handle only
/// carries what the session needs to address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripheral {
    /// Stable device address.
    pub address: PeripheralAddress,
    /// Advertised name, if the device broadcast one.
    pub name: Option<String>,
}

impl Peripheral {
    /// Creates a handle for a device with an advertised name.
    pub fn named(address: PeripheralAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: Some(name.into()),
        }
    }

    /// Creates a handle for a device that did not advertise a name.
    #[must_use]
    pub const fn anonymous(address: PeripheralAddress) -> Self {
        Self {
            address,
            name: None,
        }
    }
}

/// Name filter applied to discovered devices before they become candidates.
#[derive(Debug, Clone, Default)]
pub struct PeripheralFilter {
    pattern: Option<Regex>,
}

impl PeripheralFilter {
    /// Accepts every device.
    #[must_use]
    pub const fn any() -> Self {
        Self { pattern: None }
    }

    /// Accepts devices whose advertised name matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns the regex error if `pattern` does not compile.
    pub fn with_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
        })
    }

    /// Returns `true` if the peripheral passes the filter.
    ///
    /// Devices without a name never match a pattern.
    #[must_use]
    pub fn matches(&self, peripheral: &Peripheral) -> bool {
        match (&self.pattern, &peripheral.name) {
            (None, _) => true,
            (Some(re), Some(name)) => re.is_match(name),
            (Some(_), None) => false,
        }
    }
}

/// Terminal result of one discover-and-connect run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A peripheral is connected.
    Connected(PeripheralAddress),
    /// The discovery deadline expired first.
    TimedOut,
    /// The run was canceled by its owner.
    Canceled,
    /// The transport stopped delivering events before anything connected.
    TransportLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parses_and_formats_upper_case() {
        let addr: PeripheralAddress = "c4:d9:87:0a:1b:ff".parse().unwrap();
        assert_eq!(addr.octets(), [0xC4, 0xD9, 0x87, 0x0A, 0x1B, 0xFF]);
        assert_eq!(addr.to_string(), "C4:D9:87:0A:1B:FF");
    }

    #[test]
    fn test_address_rejects_malformed_input() {
        for bad in [
            "",
            "C4:D9:87:0A:1B",
            "C4-D9-87-0A-1B-FF",
            "C4:D9:87:0A:1B:GG",
            "C4:D9:87:0A:1B:FF:00",
        ] {
            assert!(bad.parse::<PeripheralAddress>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_address_serde_uses_text_form() {
        let addr = PeripheralAddress::new([1, 2, 3, 4, 5, 6]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"01:02:03:04:05:06\"");
        let back: PeripheralAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_filter_matches_by_name_pattern() {
        let filter = PeripheralFilter::with_pattern("^Nuimo").unwrap();
        let addr = PeripheralAddress::new([0; 6]);
        assert!(filter.matches(&Peripheral::named(addr, "Nuimo")));
        assert!(!filter.matches(&Peripheral::named(addr, "Headphones")));
        assert!(!filter.matches(&Peripheral::anonymous(addr)));
        assert!(PeripheralFilter::any().matches(&Peripheral::anonymous(addr)));
    }

    #[test]
    fn test_filter_rejects_invalid_pattern() {
        assert!(PeripheralFilter::with_pattern("(unclosed").is_err());
    }
}
