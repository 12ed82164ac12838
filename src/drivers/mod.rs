//! Device drivers subsystem
//!
//! Organized by device class:
//! - `clocksource`: Free-running counters with compare interrupts
//! - `net`: Network device drivers (GMAC) and the PHY contract
//!
//! `barrier` holds the memory ordering helpers shared by drivers that hand
//! memory to a DMA engine.

pub mod barrier;
pub mod clocksource;
pub mod net;
