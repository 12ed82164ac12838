//! GMAC register contract
//!
//! [`GmacHw`] is the single seam between the driver and the MAC's register
//! block. Implementations provide raw 32-bit access; every register-level
//! operation the driver needs is a provided method on top of it, so the MMIO
//! implementation and test doubles behave identically.
//!
//! Access is through `&self`: the RX and TX paths run under separate locks
//! and both need the register block.
//!
//! ## Register Layout (subset)
//!
//! | Offset | Register | Purpose |
//! |--------|----------|---------|
//! | 0x000 | NCR | Network control (RX/TX enable, transmit start) |
//! | 0x004 | NCFGR | Network configuration (speed, duplex) |
//! | 0x010 | DCFGR | DMA configuration (RX buffer size) |
//! | 0x014 | TSR | Transmit status |
//! | 0x018 | RBQB | Queue 0 RX descriptor base |
//! | 0x01C | TBQB | Queue 0 TX descriptor base |
//! | 0x020 | RSR | Receive status (buffer not available) |
//! | 0x024 | ISR | Interrupt status (clear on read) |
//! | 0x028 / 0x02C / 0x030 | IER / IDR / IMR | Interrupt enable / disable / mask |
//! | 0x080 / 0x084 | HRB / HRT | Hash filter bottom / top 32 bits |
//! | 0x088 / 0x08C | SAB / SAT | Specific address 1 bottom / top |
//! | 0x440 + 4(q-1) | TBQBAPQ | Priority queue q TX descriptor base |
//! | 0x480 + 4(q-1) | RBQBAPQ | Priority queue q RX descriptor base |
//! | 0x4A0 + 4(q-1) | RBSRPQ | Priority queue q RX buffer size |
//! | 0x600 + 4(q-1) | IERPQ | Priority queue q interrupt enable |
//! | 0x620 + 4(q-1) | IDRPQ | Priority queue q interrupt disable |

use super::super::netdev::{Duplex, LinkParams, LinkSpeed, MacAddress};
use volatile::Volatile;

// ============================================================================
// Register Offsets
// ============================================================================

pub const NCR: usize = 0x000;
pub const NCFGR: usize = 0x004;
pub const DCFGR: usize = 0x010;
pub const TSR: usize = 0x014;
pub const RBQB: usize = 0x018;
pub const TBQB: usize = 0x01C;
pub const RSR: usize = 0x020;
pub const ISR: usize = 0x024;
pub const IER: usize = 0x028;
pub const IDR: usize = 0x02C;
pub const IMR: usize = 0x030;
pub const HRB: usize = 0x080;
pub const HRT: usize = 0x084;
pub const SAB: usize = 0x088;
pub const SAT: usize = 0x08C;
pub const TBQBAPQ: usize = 0x440;
pub const RBQBAPQ: usize = 0x480;
pub const RBSRPQ: usize = 0x4A0;
pub const IERPQ: usize = 0x600;
pub const IDRPQ: usize = 0x620;

/// Size of the register window covered by the offsets above
pub const REGISTER_SPAN: usize = 0x640;

// NCR bits
pub const NCR_RXEN: u32 = 1 << 2;
pub const NCR_TXEN: u32 = 1 << 3;
pub const NCR_CLRSTAT: u32 = 1 << 5;
pub const NCR_TSTART: u32 = 1 << 9;

// NCFGR bits
pub const NCFGR_SPD: u32 = 1 << 0;
pub const NCFGR_FD: u32 = 1 << 1;

// DCFGR RX buffer size field, in 64-byte units
const DCFGR_DRBS_SHIFT: u32 = 16;
const DCFGR_DRBS_MASK: u32 = 0xFF << DCFGR_DRBS_SHIFT;

// TSR bits
pub const TSR_TXCOMP: u32 = 1 << 5;

// RSR bits
pub const RSR_BNA: u32 = 1 << 0;
pub const RSR_REC: u32 = 1 << 1;
pub const RSR_RXOVR: u32 = 1 << 2;

// Interrupt bits (ISR/IER/IDR/IMR)
pub const INT_RCOMP: u32 = 1 << 1;
pub const INT_RXUBR: u32 = 1 << 2;
pub const INT_TUR: u32 = 1 << 4;
pub const INT_RLEX: u32 = 1 << 5;
pub const INT_TFC: u32 = 1 << 6;
pub const INT_TCOMP: u32 = 1 << 7;
pub const INT_ROVR: u32 = 1 << 10;
pub const INT_HRESP: u32 = 1 << 11;
pub const INT_ALL: u32 = 0xFFFF_FFFF;

pub const INT_RX_BITS: u32 = INT_RCOMP | INT_RXUBR | INT_ROVR;
pub const INT_TX_BITS: u32 = INT_TUR | INT_RLEX | INT_TFC | INT_HRESP | INT_TCOMP;

/// Queue base registers only hold word-aligned addresses
const QUEUE_BASE_MASK: u32 = 0xFFFF_FFFC;

pub trait GmacHw: Send + Sync {
    fn read(&self, offset: usize) -> u32;

    fn write(&self, offset: usize, value: u32);

    /// Hook the MAC interrupt into the system interrupt controller.
    fn event_init(&self) -> bool {
        true
    }

    fn event_deinit(&self) {}

    // ========================================================================
    // Provided operations
    // ========================================================================

    fn set_bits(&self, offset: usize, bits: u32) {
        let value = self.read(offset);
        self.write(offset, value | bits);
    }

    fn clear_bits(&self, offset: usize, bits: u32) {
        let value = self.read(offset);
        self.write(offset, value & !bits);
    }

    /// Quiesce the MAC: transfers off, interrupts masked, statistics and
    /// latched status cleared.
    fn reset(&self, priority_queues: usize) {
        self.clear_bits(NCR, NCR_TXEN | NCR_RXEN);
        self.write(IDR, INT_ALL);
        for q in 0..priority_queues {
            self.write(IDRPQ + 4 * q, INT_ALL);
        }
        self.set_bits(NCR, NCR_CLRSTAT);
        self.write(RSR, RSR_RXOVR | RSR_REC | RSR_BNA);
        self.write(TSR, INT_ALL);
        let _ = self.read(ISR);
        self.write(NCFGR, NCFGR_SPD | NCFGR_FD);
    }

    fn configure_rx_buffer_size(&self, queue: usize, size: usize) {
        let units = ((size >> 6) as u32) & 0xFF;
        if queue == 0 {
            let value = self.read(DCFGR) & !DCFGR_DRBS_MASK;
            self.write(DCFGR, value | (units << DCFGR_DRBS_SHIFT));
        } else {
            self.write(RBSRPQ + 4 * (queue - 1), units);
        }
    }

    fn set_rx_queue_base(&self, queue: usize, address: u32) {
        let offset = if queue == 0 { RBQB } else { RBQBAPQ + 4 * (queue - 1) };
        self.write(offset, address & QUEUE_BASE_MASK);
    }

    fn set_tx_queue_base(&self, queue: usize, address: u32) {
        let offset = if queue == 0 { TBQB } else { TBQBAPQ + 4 * (queue - 1) };
        self.write(offset, address & QUEUE_BASE_MASK);
    }

    fn enable_queue_interrupts(&self, queue: usize, bits: u32) {
        let offset = if queue == 0 { IER } else { IERPQ + 4 * (queue - 1) };
        self.write(offset, bits);
    }

    fn enable_transfers(&self) {
        self.set_bits(NCR, NCR_TXEN | NCR_RXEN);
    }

    fn disable_transfers(&self) {
        self.clear_bits(NCR, NCR_TXEN | NCR_RXEN);
        let _ = self.read(ISR);
    }

    fn enable_tx(&self, enable: bool) {
        if enable {
            self.set_bits(NCR, NCR_TXEN);
        } else {
            self.clear_bits(NCR, NCR_TXEN);
        }
    }

    fn transmit_start(&self) {
        self.set_bits(NCR, NCR_TSTART);
    }

    fn clear_tx_complete(&self) {
        self.write(TSR, TSR_TXCOMP);
    }

    /// Check and clear the "buffer not available" receive status.
    fn take_buffer_not_available(&self) -> bool {
        if self.read(RSR) & RSR_BNA == 0 {
            return false;
        }
        self.write(RSR, RSR_BNA);
        true
    }

    /// Apply the negotiated link to the MAC, pausing transfers around it.
    fn configure_link(&self, link: LinkParams) {
        self.clear_bits(NCR, NCR_TXEN | NCR_RXEN);
        let mut ncfgr = self.read(NCFGR) & !(NCFGR_SPD | NCFGR_FD);
        if link.speed == LinkSpeed::Speed100 {
            ncfgr |= NCFGR_SPD;
        }
        if link.duplex == Duplex::Full {
            ncfgr |= NCFGR_FD;
        }
        self.write(NCFGR, ncfgr);
        self.set_bits(NCR, NCR_RXEN | NCR_TXEN);
    }

    fn mac_address(&self) -> MacAddress {
        let bottom = self.read(SAB).to_le_bytes();
        let top = self.read(SAT).to_le_bytes();
        MacAddress::new([bottom[0], bottom[1], bottom[2], bottom[3], top[0], top[1]])
    }

    fn set_mac_address(&self, mac: MacAddress) {
        let b = mac.as_bytes();
        self.write(SAB, u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        self.write(SAT, u32::from(b[4]) | (u32::from(b[5]) << 8));
    }

    fn hash(&self) -> u64 {
        (u64::from(self.read(HRT)) << 32) | u64::from(self.read(HRB))
    }

    fn set_hash(&self, hash: u64) {
        self.write(HRB, hash as u32);
        self.write(HRT, (hash >> 32) as u32);
    }

    /// Read (and thereby clear) the interrupt status.
    fn take_interrupt_status(&self) -> u32 {
        self.read(ISR)
    }

    fn enable_interrupts(&self, bits: u32) {
        self.write(IER, bits);
    }

    fn disable_interrupts(&self, bits: u32) {
        self.write(IDR, bits);
    }
}

/// Hash filter bit selected by a destination address
///
/// Bit `k` of the 6-bit index is the XOR of address bits `k, k+6, ..., k+42`,
/// counting from bit 0 of the first byte.
pub fn hash_index(mac: &MacAddress) -> u32 {
    let mut index = 0;
    for k in 0..6 {
        let bit = (0..8).fold(0, |acc, j| acc ^ mac.bit(k + 6 * j));
        index |= u32::from(bit) << k;
    }
    index
}

// ============================================================================
// MMIO Implementation
// ============================================================================

/// GMAC register block at a fixed physical address
pub struct MmioGmac {
    base: usize,
}

impl MmioGmac {
    /// # Safety
    /// `base` must point to a GMAC register block (or memory laid out like
    /// one, [`REGISTER_SPAN`] bytes) valid for the lifetime of the returned
    /// value, and no other driver may program it.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn register(&self, offset: usize) -> *mut Volatile<u32> {
        (self.base + offset) as *mut Volatile<u32>
    }
}

// SAFETY: register accesses are single volatile word reads/writes; callers
// serialize read-modify-write sequences through the driver's locks
unsafe impl Send for MmioGmac {}
unsafe impl Sync for MmioGmac {}

impl GmacHw for MmioGmac {
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: validity guaranteed by the contract of `new`
        unsafe { (*self.register(offset)).read() }
    }

    fn write(&self, offset: usize, value: u32) {
        // SAFETY: validity guaranteed by the contract of `new`
        unsafe { (*self.register(offset)).write(value) }
    }
}

/// RAM-backed register block that records every write
#[cfg(test)]
pub(crate) struct FakeGmac {
    regs: alloc::vec::Vec<core::sync::atomic::AtomicU32>,
    writes: spin::Mutex<alloc::vec::Vec<(usize, u32)>>,
    pub event_init_ok: core::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FakeGmac {
    pub fn new() -> Self {
        Self {
            regs: (0..REGISTER_SPAN / 4)
                .map(|_| core::sync::atomic::AtomicU32::new(0))
                .collect(),
            writes: spin::Mutex::new(alloc::vec::Vec::new()),
            event_init_ok: core::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn peek(&self, offset: usize) -> u32 {
        self.regs[offset / 4].load(core::sync::atomic::Ordering::SeqCst)
    }

    /// Set a register without recording it, as hardware would.
    pub fn poke(&self, offset: usize, value: u32) {
        self.regs[offset / 4].store(value, core::sync::atomic::Ordering::SeqCst);
    }

    pub fn writes_to(&self, offset: usize) -> alloc::vec::Vec<u32> {
        self.writes
            .lock()
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }
}

#[cfg(test)]
impl GmacHw for FakeGmac {
    fn read(&self, offset: usize) -> u32 {
        self.peek(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        self.writes.lock().push((offset, value));
        self.poke(offset, value);
    }

    fn event_init(&self) -> bool {
        self.event_init_ok.load(core::sync::atomic::Ordering::SeqCst)
    }
}
