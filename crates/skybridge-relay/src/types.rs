// ============================================
// File: crates/skybridge-relay/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifier types used throughout the relay node:
//! drone session names and device hardware addresses.
//!
//! ## Main Functionality
//! - `DroneName`: fixed-width sequential session name (`drone_001`)
//! - `MacAddr`: normalized hardware identifier used by the allow-list
//! - Parsing, display and serde implementations for both
//!
//! ## Main Logical Flow
//! 1. `MacAddr` values come from configuration (allow-list) and from
//!    neighbor-table enumeration; both are normalized so comparison works
//!    regardless of separator or case
//! 2. `DroneName` values are allocated by the registry (lowest free index)
//!    and used as keys in the session map and in backend calls
//!
//! ## ⚠️ Important Note for Next Developer
//! - The name space is bounded by the device address space: indices run
//!   1..=253, matching one /24 of drone addresses
//! - MacAddr accepts both `:` and `-` separators; Windows ARP output uses
//!   dashes, Linux neighbor tables use colons
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================
// Constants
// ============================================

/// Lowest drone name index.
pub const DRONE_INDEX_MIN: u16 = 1;

/// Highest drone name index (one /24 of device addresses, minus gateway).
pub const DRONE_INDEX_MAX: u16 = 253;

// ============================================
// DroneName
// ============================================

/// Error type for `DroneName` parsing failures.
#[derive(Debug, Clone, Error)]
pub enum DroneNameError {
    /// The string did not have the `drone_NNN` shape.
    #[error("Invalid drone name format: {0}")]
    InvalidFormat(String),
    /// The index was outside the allowed range.
    #[error("Drone index {0} out of range ({DRONE_INDEX_MIN}..={DRONE_INDEX_MAX})")]
    IndexOutOfRange(u16),
}

/// Fixed-width sequential name for a drone session, e.g. `drone_001`.
///
/// Names are unique within one relay node. The registry always assigns the
/// lowest free index, so a destroyed session's name is reused by the next
/// created one.
///
/// # Example
/// ```
/// use skybridge_relay::types::DroneName;
///
/// let name = DroneName::from_index(7).unwrap();
/// assert_eq!(name.to_string(), "drone_007");
/// assert_eq!(name.index(), 7);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DroneName(u16);

impl DroneName {
    /// Creates a name from a numeric index.
    ///
    /// # Errors
    /// Returns `IndexOutOfRange` if the index is outside 1..=253.
    pub fn from_index(index: u16) -> Result<Self, DroneNameError> {
        if !(DRONE_INDEX_MIN..=DRONE_INDEX_MAX).contains(&index) {
            return Err(DroneNameError::IndexOutOfRange(index));
        }
        Ok(Self(index))
    }

    /// Returns the numeric index of this name.
    #[must_use]
    pub const fn index(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for DroneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "drone_{:03}", self.0)
    }
}

impl FromStr for DroneName {
    type Err = DroneNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let index = s
            .strip_prefix("drone_")
            .and_then(|digits| digits.parse::<u16>().ok())
            .ok_or_else(|| DroneNameError::InvalidFormat(s.to_string()))?;
        Self::from_index(index)
    }
}

impl TryFrom<String> for DroneName {
    type Error = DroneNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DroneName> for String {
    fn from(name: DroneName) -> Self {
        name.to_string()
    }
}

// ============================================
// MacAddr
// ============================================

/// Error type for `MacAddr` parsing failures.
#[derive(Debug, Clone, Error)]
#[error("Invalid hardware address: {0}")]
pub struct MacAddrError(String);

/// Normalized device hardware (MAC) address.
///
/// Stored as six raw octets; parsing accepts `:` or `-` separated hex pairs
/// in any case, and display is always lowercase colon-separated, so values
/// from configuration and from neighbor enumeration compare equal.
///
/// # Example
/// ```
/// use skybridge_relay::types::MacAddr;
///
/// let a: MacAddr = "60-60-1F-5B-4B-EA".parse().unwrap();
/// let b: MacAddr = "60:60:1f:5b:4b:ea".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "60:60:1f:5b:4b:ea");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Creates an address from raw octets.
    #[must_use]
    pub const fn from_octets(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = MacAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(MacAddrError(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacAddrError(s.to_string()))?;
        }

        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = MacAddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(addr: MacAddr) -> Self {
        addr.to_string()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drone_name_format() {
        let name = DroneName::from_index(1).unwrap();
        assert_eq!(name.to_string(), "drone_001");

        let name = DroneName::from_index(42).unwrap();
        assert_eq!(name.to_string(), "drone_042");

        let name = DroneName::from_index(253).unwrap();
        assert_eq!(name.to_string(), "drone_253");
    }

    #[test]
    fn test_drone_name_range() {
        assert!(DroneName::from_index(0).is_err());
        assert!(DroneName::from_index(254).is_err());
        assert!(DroneName::from_index(DRONE_INDEX_MIN).is_ok());
        assert!(DroneName::from_index(DRONE_INDEX_MAX).is_ok());
    }

    #[test]
    fn test_drone_name_roundtrip() {
        let name: DroneName = "drone_017".parse().unwrap();
        assert_eq!(name.index(), 17);
        assert_eq!(name.to_string(), "drone_017");

        assert!("drone_".parse::<DroneName>().is_err());
        assert!("pigeon_001".parse::<DroneName>().is_err());
        assert!("drone_999".parse::<DroneName>().is_err());
    }

    #[test]
    fn test_mac_addr_normalization() {
        let dashes: MacAddr = "60-60-1F-5B-4B-EA".parse().unwrap();
        let colons: MacAddr = "60:60:1f:5b:4b:ea".parse().unwrap();

        assert_eq!(dashes, colons);
        assert_eq!(dashes.to_string(), "60:60:1f:5b:4b:ea");
    }

    #[test]
    fn test_mac_addr_invalid() {
        assert!("60:60:1f:5b:4b".parse::<MacAddr>().is_err());
        assert!("60:60:1f:5b:4b:ea:ff".parse::<MacAddr>().is_err());
        assert!("zz:60:1f:5b:4b:ea".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_addr_octets() {
        let addr = MacAddr::from_octets([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa]);
        assert_eq!(addr.to_string(), "aa:aa:aa:aa:aa:aa");
        assert_eq!(addr.octets(), [0xaa; 6]);
    }
}
