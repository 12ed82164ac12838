//! BCM2711 System Timer as a compare-match clock source.
//!
//! The System Timer is a free-running counter incrementing at 1 MHz with four
//! 32-bit compare channels. Channels 0 and 2 belong to the GPU; the ARM side
//! may use 1 and 3. A match sets the channel's bit in CS and raises the
//! channel's interrupt line until software writes that bit back.
//!
//! ## Register Layout
//!
//! | Offset | Register | Purpose |
//! |--------|----------|---------|
//! | +0x00  | CS       | Control/Status (match flags, write 1 to clear) |
//! | +0x04  | CLO      | Counter Lower 32 bits |
//! | +0x08  | CHI      | Counter Upper 32 bits |
//! | +0x0C  | C0..C3   | Compare 0-3 |
//!
//! Only CLO takes part in compare matching, so the counter behaves as a 32-bit
//! up-counter wrapping at `u32::MAX`.
//!
//! ## References
//!
//! - BCM2711 ARM Peripherals: Section 10
//! - Base address: 0xFE003000 (ARM physical)

use super::{CompareCallback, HwCounter};
use volatile::Volatile;

/// Base address of the System Timer peripheral (BCM2711 on Pi 4).
pub const TIMER_BASE: usize = 0xFE00_3000;

/// Counter input clock.
pub const TIMER_FREQUENCY_HZ: u32 = 1_000_000;

/// First compare channel owned by the ARM cores.
pub const ARM_CHANNEL: usize = 1;

#[repr(C)]
struct Registers {
    cs: Volatile<u32>,  // 0x00 - Control/Status
    clo: Volatile<u32>, // 0x04 - Counter Lower 32 bits
    chi: Volatile<u32>, // 0x08 - Counter Higher 32 bits
    c: [Volatile<u32>; 4],
}

/// One compare channel of the System Timer.
pub struct SystemTimer {
    registers: *mut Registers,
    channel: usize,
    running: bool,
    callback: Option<(CompareCallback, usize)>,
}

// SAFETY: the register block is MMIO reachable from any core, and each
// SystemTimer owns exactly one compare channel.
unsafe impl Send for SystemTimer {}

impl SystemTimer {
    /// Bind compare `channel` of the timer block at `base`.
    ///
    /// # Safety
    /// `base` must point to a System Timer register block (or memory laid out
    /// like one) valid for the lifetime of the returned value, and no other
    /// `SystemTimer` may use the same channel.
    pub unsafe fn new(base: usize, channel: usize) -> Self {
        Self {
            registers: base as *mut Registers,
            channel: channel & 0x3,
            running: false,
            callback: None,
        }
    }

    fn regs(&self) -> &Registers {
        // SAFETY: validity guaranteed by the contract of `new`
        unsafe { &*self.registers }
    }

    fn regs_mut(&mut self) -> &mut Registers {
        // SAFETY: validity guaranteed by the contract of `new`; &mut self
        // gives exclusive use of this channel
        unsafe { &mut *self.registers }
    }

    /// Read the full 64-bit counter, re-reading CHI to catch a CLO rollover.
    pub fn read_counter64(&self) -> u64 {
        loop {
            let hi1 = self.regs().chi.read();
            let lo = self.regs().clo.read();
            let hi2 = self.regs().chi.read();
            if hi1 == hi2 {
                return ((hi1 as u64) << 32) | (lo as u64);
            }
        }
    }

    /// Interrupt handler for this channel's IRQ line.
    ///
    /// Acknowledges the match and forwards it to the registered callback.
    /// Returns false if this channel had not matched.
    pub fn handle_interrupt(&mut self) -> bool {
        let mask = 1u32 << self.channel;
        let status = self.regs().cs.read();
        if status & mask == 0 {
            return false;
        }
        self.regs_mut().cs.write(mask);

        if self.running {
            if let Some((callback, context)) = self.callback {
                callback(status, context);
            }
        }
        true
    }
}

impl HwCounter for SystemTimer {
    fn counter_get(&self) -> u32 {
        self.regs().clo.read()
    }

    fn compare_set(&mut self, value: u32) {
        let channel = self.channel;
        self.regs_mut().c[channel].write(value);
    }

    fn frequency_get(&self) -> u32 {
        TIMER_FREQUENCY_HZ
    }

    fn start(&mut self) {
        // The counter itself never stops; drop any stale match first
        let mask = 1u32 << self.channel;
        self.regs_mut().cs.write(mask);
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn callback_set(&mut self, callback: CompareCallback, context: usize) {
        self.callback = Some((callback, context));
    }
}
