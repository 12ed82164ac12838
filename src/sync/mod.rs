//! Synchronization primitives
//!
//! Interrupt-safe locking for state shared between thread code and
//! interrupt handlers.

pub mod mutex;

pub use mutex::{IrqState, IsrScope, Mutex, MutexGuard};
