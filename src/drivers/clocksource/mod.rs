//! Clock sources driving the timer service.
//!
//! [`HwCounter`] is the contract between the timer service and a timer
//! peripheral: a free-running up-counter of fixed width with one compare
//! channel whose match raises an interrupt.

pub mod bcm2711;

pub use bcm2711::SystemTimer;

/// Compare-match notification: `(status, context)`.
pub type CompareCallback = fn(u32, usize);

/// Free-running hardware counter with a compare-match interrupt.
pub trait HwCounter: Send {
    /// Current raw counter value.
    fn counter_get(&self) -> u32;

    /// Program the compare register. The match interrupt fires when the
    /// counter reaches `value`.
    fn compare_set(&mut self, value: u32);

    /// Program the counter's wrap modulus. Counters with a fixed modulus
    /// ignore this.
    fn period_set(&mut self, _value: u32) {}

    /// Counter input frequency in Hz.
    fn frequency_get(&self) -> u32;

    fn start(&mut self);

    fn stop(&mut self);

    /// Register the handler invoked from the compare-match interrupt.
    fn callback_set(&mut self, callback: CompareCallback, context: usize);
}
