//! Shared MAC driver types
//!
//! Result codes, link parameters and the hardware address type used by the
//! MAC driver and its PHY collaborator.
//!
//! ## Result model
//!
//! Every MAC operation returns `Result<_, MacError>`. Two outcomes are not
//! failures and are reported through [`MacStatus`] instead:
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | `MacStatus::Ok` | The request completed |
//! | `MacStatus::Pending` | Accepted, but the hardware queue is full or nothing is ready yet; call again later |
//!
//! `NoDescriptors` and `NoQueueNodes` are transient backpressure conditions:
//! the driver never retries internally, the caller polls again on its next
//! `process()` tick.

use core::fmt;
use core::str::FromStr;

/// Errors reported by the MAC driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacError {
    /// Driver not initialized (or not yet `Ready` where that is required)
    NotReady,

    /// Operation needs an open client
    NotOpen,

    /// Only one client may hold the driver open
    AlreadyOpen,

    /// Configuration rejected by validation
    InvalidConfig,

    /// Not enough free TX descriptors for the packet (retry later)
    NoDescriptors,

    /// RX buffer queue exhausted and dynamic allocation failed
    NoQueueNodes,

    /// No free TX queue node to accept another packet
    QueueTxFull,

    /// Malformed packet (no data segment, empty payload)
    PacketError,

    /// Buffer or descriptor allocation failed
    OutOfMemory,

    /// The PHY did not initialize
    PhyInitFailed,

    /// Interrupt/event notification could not be set up
    EventInitFailed,
}

impl fmt::Display for MacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacError::NotReady => write!(f, "MAC not ready"),
            MacError::NotOpen => write!(f, "MAC not open"),
            MacError::AlreadyOpen => write!(f, "MAC already open"),
            MacError::InvalidConfig => write!(f, "Invalid configuration"),
            MacError::NoDescriptors => write!(f, "No free descriptors"),
            MacError::NoQueueNodes => write!(f, "RX buffer queue exhausted"),
            MacError::QueueTxFull => write!(f, "TX queue full"),
            MacError::PacketError => write!(f, "Malformed packet"),
            MacError::OutOfMemory => write!(f, "Out of memory"),
            MacError::PhyInitFailed => write!(f, "PHY initialization failed"),
            MacError::EventInitFailed => write!(f, "Event initialization failed"),
        }
    }
}

/// Non-error outcome of a MAC operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacStatus {
    Ok,
    /// Accepted but not completed; poll again
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Speed10,
    Speed100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Negotiated (or forced) link configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub speed: LinkSpeed,
    pub duplex: Duplex,
}

impl fmt::Display for LinkParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let speed = match self.speed {
            LinkSpeed::Speed10 => 10,
            LinkSpeed::Speed100 => 100,
        };
        let duplex = match self.duplex {
            Duplex::Half => "half",
            Duplex::Full => "full",
        };
        write!(f, "{} Mbps {}-duplex", speed, duplex)
    }
}

/// 48-bit MAC (Media Access Control) address
///
/// Format: 6 bytes, displayed as XX:XX:XX:XX:XX:XX in hexadecimal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Broadcast MAC address (FF:FF:FF:FF:FF:FF)
    pub const fn broadcast() -> Self {
        Self([0xFF; 6])
    }

    /// Zero MAC address (00:00:00:00:00:00)
    pub const fn zero() -> Self {
        Self([0x00; 6])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0x00; 6]
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    /// Check if this is a multicast address (bit 0 of first byte is 1)
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0x01) != 0
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Bit `n` of the address as transmitted, counting from bit 0 of the
    /// first byte.
    pub fn bit(&self, n: usize) -> u8 {
        (self.0[n / 8] >> (n % 8)) & 1
    }
}

/// Parse a MAC address from a colon-separated hex string
///
/// Example: "02:04:25:1C:A0:02"
impl FromStr for MacAddress {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(())?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| ())?;
        }
        if parts.next().is_some() {
            return Err(());
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_address_parse_and_display() {
        let mac: MacAddress = "02:04:25:1c:a0:02".parse().unwrap();
        assert_eq!(mac, MacAddress::new([0x02, 0x04, 0x25, 0x1C, 0xA0, 0x02]));
        assert_eq!(format!("{}", mac), "02:04:25:1C:A0:02");

        assert!("02:04:25:1c:a0".parse::<MacAddress>().is_err());
        assert!("02:04:25:1c:a0:02:03".parse::<MacAddress>().is_err());
        assert!("zz:04:25:1c:a0:02".parse::<MacAddress>().is_err());
    }

    #[test]
    fn mac_address_classes() {
        assert!(MacAddress::broadcast().is_broadcast());
        assert!(MacAddress::broadcast().is_multicast());
        assert!(MacAddress::zero().is_zero());
        assert!(!MacAddress::new([0x02, 0, 0, 0, 0, 1]).is_multicast());
        assert!(MacAddress::new([0x01, 0x00, 0x5E, 0, 0, 1]).is_multicast());
    }

    #[test]
    fn address_bits_count_from_first_byte_lsb() {
        let mac = MacAddress::new([0b0000_0100, 0, 0, 0, 0, 0b1000_0000]);
        assert_eq!(mac.bit(2), 1);
        assert_eq!(mac.bit(3), 0);
        assert_eq!(mac.bit(47), 1);
    }

    #[test]
    fn link_params_display() {
        let p = LinkParams {
            speed: LinkSpeed::Speed100,
            duplex: Duplex::Full,
        };
        assert_eq!(format!("{}", p), "100 Mbps full-duplex");
    }
}
