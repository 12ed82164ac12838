//! Interrupt-masking spinlock with interrupt-nesting tracking
//!
//! `Mutex` masks IRQs on the local core, then takes a spinlock. This is the
//! `spin_lock_irqsave()` pattern: a handler that fires while the lock is held
//! can never spin on it, because it cannot fire at all.
//!
//! ## Interrupt context
//!
//! A compare-match handler that walks shared state calls back into the same
//! API the application uses. The lock therefore also carries a nesting count,
//! raised with [`Mutex::enter_isr`] for the duration of a handler. Code that
//! behaves differently inside a handler (e.g. skipping a fresh hardware
//! counter read) checks [`Mutex::in_isr`].
//!
//! The lock itself is taken the same way from both contexts. From a handler it
//! is always free: thread code only holds it with IRQs masked. Handlers must
//! drop their guard before invoking callbacks that may lock again.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Mutex that disables interrupts while locked
///
/// # Example
/// ```ignore
/// static STATE: Mutex<Counter> = Mutex::new(Counter::new());
///
/// let mut state = STATE.lock();
/// state.advance(40);
/// // Interrupts restored when guard is dropped
/// ```
pub struct Mutex<T> {
    inner: UnsafeCell<T>,
    locked: AtomicBool,
    nesting: AtomicU32,
}

// SAFETY: Mutex is Sync because:
// - Access to inner data is protected by the atomic `locked` flag
// - IRQs are masked while the lock is held, so a handler cannot observe a
//   half-updated value
unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
            locked: AtomicBool::new(false),
            nesting: AtomicU32::new(0),
        }
    }

    /// Acquire the lock (disables interrupts)
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let irq_state = IrqState::disable();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        MutexGuard {
            mutex: self,
            irq_state,
        }
    }

    /// Mark entry into interrupt context; the returned scope marks the exit.
    pub fn enter_isr(&self) -> IsrScope<'_, T> {
        self.nesting.fetch_add(1, Ordering::AcqRel);
        IsrScope { mutex: self }
    }

    /// True while at least one [`IsrScope`] is alive.
    pub fn in_isr(&self) -> bool {
        self.nesting.load(Ordering::Acquire) != 0
    }
}

/// Guard returned by `Mutex::lock()`
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    irq_state: IrqState,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Lock is held, so we have exclusive access
        unsafe { &*self.mutex.inner.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Lock is held, so we have exclusive access
        unsafe { &mut *self.mutex.inner.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        self.irq_state.restore();
    }
}

/// Interrupt-context marker returned by [`Mutex::enter_isr`].
pub struct IsrScope<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Drop for IsrScope<'_, T> {
    fn drop(&mut self) {
        self.mutex.nesting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Saved IRQ mask state
///
/// On AArch64 this is the DAIF register; only the IRQ bit (bit 1) is touched.
/// Hosted builds have no interrupts to mask.
pub struct IrqState {
    #[cfg(target_arch = "aarch64")]
    daif: u64,
}

impl IrqState {
    /// Disable IRQs and return previous state
    #[cfg(target_arch = "aarch64")]
    pub fn disable() -> Self {
        let daif: u64;

        // SAFETY: Reading/writing DAIF is safe because:
        // 1. DAIF is accessible at EL1
        // 2. `msr daifset` masks IRQs atomically
        // 3. The old value is saved for restore()
        unsafe {
            core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
            core::arch::asm!("msr daifset, #2", options(nomem, nostack));
        }

        Self { daif }
    }

    #[cfg(not(target_arch = "aarch64"))]
    pub fn disable() -> Self {
        Self {}
    }

    /// Restore previous IRQ state
    #[cfg(target_arch = "aarch64")]
    pub fn restore(&self) {
        // SAFETY: Restoring a DAIF value previously read from the same core
        unsafe {
            core::arch::asm!("msr daif, {}", in(reg) self.daif, options(nomem, nostack));
        }
    }

    #[cfg(not(target_arch = "aarch64"))]
    pub fn restore(&self) {}
}
