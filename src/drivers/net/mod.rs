//! Network device drivers and abstractions

pub mod gmac;
pub mod netdev;
pub mod phy;

// Re-export the shared MAC types for convenience
pub use netdev::*;
