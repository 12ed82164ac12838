//! Module lifecycle status shared by the system services and drivers.

use core::fmt;

/// Lifecycle state reported by `status()` on a service or driver object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleStatus {
    /// Never initialized, or deinitialized.
    #[default]
    Uninitialized,
    /// Initialization started but is still completing (e.g. waiting on the PHY).
    Busy,
    /// Fully operational.
    Ready,
    /// Initialization failed; the object must be deinitialized.
    Error,
}

impl ModuleStatus {
    pub fn is_ready(self) -> bool {
        self == ModuleStatus::Ready
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Uninitialized => write!(f, "uninitialized"),
            ModuleStatus::Busy => write!(f, "busy"),
            ModuleStatus::Ready => write!(f, "ready"),
            ModuleStatus::Error => write!(f, "error"),
        }
    }
}
