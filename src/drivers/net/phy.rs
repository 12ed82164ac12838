//! Ethernet PHY contract
//!
//! The MAC driver never touches MDIO itself. It starts the PHY, polls it
//! until its own setup finishes, then asks it for the link state. How the PHY
//! gets there (reset, auto-negotiation, vendor quirks) is the implementation's
//! business.

use super::netdev::LinkParams;
use core::fmt;

/// Progress of the PHY's initialization, reported by [`Phy::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyPoll {
    /// Still working; poll again
    Busy,
    /// Detected and configured
    Ready,
    /// Gave up (not detected, reset timeout)
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyError {
    NotDetected,
    Timeout,
}

impl fmt::Display for PhyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhyError::NotDetected => write!(f, "PHY not detected"),
            PhyError::Timeout => write!(f, "PHY timeout"),
        }
    }
}

pub trait Phy: Send {
    /// Start the PHY. Completion is reported through [`Phy::poll`].
    fn init(&mut self) -> Result<(), PhyError>;

    /// Advance the PHY's setup state machine.
    fn poll(&mut self) -> PhyPoll;

    /// Current link state; `None` while the link is down.
    fn link_status(&mut self) -> Option<LinkParams>;

    /// Result of auto-negotiation; `None` if it has not completed with the
    /// link up.
    fn negotiation_result(&mut self) -> Option<LinkParams> {
        self.link_status()
    }

    fn close(&mut self) {}
}

/// PHY whose link state is set by the test through a shared [`PhyControl`]
#[cfg(test)]
pub(crate) struct ScriptedPhy(pub PhyControl);

#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct PhyControl {
    pub link: alloc::sync::Arc<std::sync::Mutex<Option<LinkParams>>>,
    pub init_failed: alloc::sync::Arc<core::sync::atomic::AtomicBool>,
    pub poll_failed: alloc::sync::Arc<core::sync::atomic::AtomicBool>,
    pub closes: alloc::sync::Arc<core::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
impl PhyControl {
    pub fn set_link(&self, link: Option<LinkParams>) {
        *self.link.lock().unwrap() = link;
    }

    pub fn closes(&self) -> usize {
        self.closes.load(core::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Phy for ScriptedPhy {
    fn init(&mut self) -> Result<(), PhyError> {
        if self.0.init_failed.load(core::sync::atomic::Ordering::SeqCst) {
            Err(PhyError::NotDetected)
        } else {
            Ok(())
        }
    }

    fn poll(&mut self) -> PhyPoll {
        if self.0.poll_failed.load(core::sync::atomic::Ordering::SeqCst) {
            PhyPoll::Failed
        } else {
            PhyPoll::Ready
        }
    }

    fn link_status(&mut self) -> Option<LinkParams> {
        *self.0.link.lock().unwrap()
    }

    fn close(&mut self) {
        self.0
            .closes
            .fetch_add(1, core::sync::atomic::Ordering::SeqCst);
    }
}
