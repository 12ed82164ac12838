//! GMAC DMA descriptors
//!
//! Both rings are arrays of two-word descriptors in normal memory that the
//! DMA engine walks on its own. Neither side can lock the other out, so all
//! coordination goes through ownership bits:
//!
//! ## RX descriptor
//!
//! | Word | Bits | Meaning |
//! |------|------|---------|
//! | 0 (address) | 31:2 | Buffer address |
//! | 0 (address) | 1 | WRAP: last descriptor in the ring |
//! | 0 (address) | 0 | OWNERSHIP: set by hardware when a frame (part) landed; software owns the slot |
//! | 1 (status) | 13:0 | Frame length (valid on the EOF descriptor) |
//! | 1 (status) | 14 / 15 | Start / end of frame |
//! | 1 (status) | 29 / 30 / 31 | Unicast hash / multicast hash / broadcast match |
//!
//! Writing a fresh address word (bit 0 clear) hands the slot back to hardware.
//!
//! ## TX descriptor
//!
//! | Word | Bits | Meaning |
//! |------|------|---------|
//! | 0 (address) | 31:0 | Buffer address |
//! | 1 (status) | 13:0 | Buffer length |
//! | 1 (status) | 15 | LAST buffer of the frame |
//! | 1 (status) | 27 / 28 / 29 | Frame corrupted / underrun / retry limit exceeded |
//! | 1 (status) | 30 | WRAP: last descriptor in the ring |
//! | 1 (status) | 31 | USED: software owns the slot (hardware sets it after sending) |
//!
//! Hardware only sets USED on the first descriptor of a sent frame.

use alloc::boxed::Box;
use alloc::vec::Vec;
use volatile::Volatile;

// ============================================================================
// Descriptor Bits
// ============================================================================

/// Address bits of a descriptor word; the low two bits carry flags
pub const ADDRESS_MASK: u32 = 0xFFFF_FFFC;
/// Frame/buffer length field
pub const LENGTH_MASK: u32 = 0x3FFF;

pub const RX_OWNERSHIP: u32 = 1 << 0;
pub const RX_WRAP: u32 = 1 << 1;
pub const RX_SOF: u32 = 1 << 14;
pub const RX_EOF: u32 = 1 << 15;
pub const RX_UNICAST_HASH: u32 = 1 << 29;
pub const RX_MULTICAST_HASH: u32 = 1 << 30;
pub const RX_BROADCAST: u32 = 1 << 31;

pub const TX_LAST: u32 = 1 << 15;
pub const TX_FRAME_CORRUPT: u32 = 1 << 27;
pub const TX_UNDERRUN: u32 = 1 << 28;
pub const TX_RETRY_LIMIT: u32 = 1 << 29;
pub const TX_WRAP: u32 = 1 << 30;
pub const TX_USED: u32 = 1 << 31;
pub const TX_ERROR_BITS: u32 = TX_RETRY_LIMIT | TX_UNDERRUN | TX_FRAME_CORRUPT;

// ============================================================================
// RX
// ============================================================================

#[repr(C, align(8))]
pub struct RxDescriptor {
    address: Volatile<u32>,
    status: Volatile<u32>,
}

impl RxDescriptor {
    pub fn new() -> Self {
        Self {
            address: Volatile::new(0),
            status: Volatile::new(0),
        }
    }

    pub fn address_word(&self) -> u32 {
        self.address.read()
    }

    pub fn status(&self) -> RxStatus {
        RxStatus(self.status.read())
    }

    /// Hardware has written into this slot and handed it to software.
    pub fn is_software_owned(&self) -> bool {
        self.address.read() & RX_OWNERSHIP != 0
    }

    pub fn buffer_address(&self) -> u32 {
        self.address.read() & ADDRESS_MASK
    }

    /// Attach a buffer and give the slot to hardware.
    pub fn arm(&mut self, buffer: u32, wrap: bool) {
        self.status.write(0);
        let word = if wrap {
            buffer | RX_WRAP
        } else {
            buffer & ADDRESS_MASK
        };
        self.address.write(word);
    }

    /// Drop the buffer address, keeping the ownership and wrap flags.
    pub fn clear_buffer(&mut self) {
        self.address.update(|word| *word &= !ADDRESS_MASK);
    }

    pub fn reset(&mut self, wrap: bool) {
        self.status.write(0);
        self.address.write(if wrap { RX_WRAP } else { 0 });
    }

    /// Hardware side of the protocol, for driving the ring without a MAC.
    #[cfg(test)]
    pub fn complete(&mut self, status: u32) {
        self.status.write(status);
        self.address.update(|word| *word |= RX_OWNERSHIP);
    }
}

impl Default for RxDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Status word of a received frame's last descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxStatus(pub u32);

impl RxStatus {
    pub fn frame_len(self) -> usize {
        (self.0 & LENGTH_MASK) as usize
    }

    pub fn is_start(self) -> bool {
        self.0 & RX_SOF != 0
    }

    pub fn is_end(self) -> bool {
        self.0 & RX_EOF != 0
    }

    pub fn is_broadcast(self) -> bool {
        self.0 & RX_BROADCAST != 0
    }

    pub fn is_multicast_hash(self) -> bool {
        self.0 & RX_MULTICAST_HASH != 0
    }

    pub fn is_unicast_hash(self) -> bool {
        self.0 & RX_UNICAST_HASH != 0
    }
}

// ============================================================================
// TX
// ============================================================================

#[repr(C, align(8))]
pub struct TxDescriptor {
    address: Volatile<u32>,
    status: Volatile<u32>,
}

impl TxDescriptor {
    pub fn new() -> Self {
        Self {
            address: Volatile::new(0),
            status: Volatile::new(TX_USED | TX_LAST),
        }
    }

    pub fn address(&self) -> u32 {
        self.address.read()
    }

    pub fn status(&self) -> u32 {
        self.status.read()
    }

    pub fn is_used(&self) -> bool {
        self.status.read() & TX_USED != 0
    }

    /// Software-owned, empty, single-buffer frame.
    pub fn reset(&mut self, wrap: bool) {
        self.address.write(0);
        let mut status = TX_USED | TX_LAST;
        if wrap {
            status |= TX_WRAP;
        }
        self.status.write(status);
    }

    /// Point the slot at `len` bytes at `buffer`. Everything but WRAP and
    /// USED is cleared first so a stale length or LAST bit never shows.
    pub fn fill(&mut self, buffer: u32, len: usize) {
        self.status.update(|s| *s &= TX_WRAP | TX_USED);
        self.address.write(buffer);
        let len = len as u32 & LENGTH_MASK;
        self.status.update(|s| *s |= len);
    }

    pub fn mark_last(&mut self) {
        self.status.update(|s| *s |= TX_LAST);
    }

    /// Hand the slot to hardware.
    pub fn release(&mut self) {
        self.status.update(|s| *s &= !TX_USED);
    }

    pub fn reclaim(&mut self) {
        self.status.update(|s| *s |= TX_USED);
    }

    #[cfg(test)]
    pub fn complete(&mut self, error_bits: u32) {
        self.status.update(|s| *s |= TX_USED | error_bits);
    }
}

impl Default for TxDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Ring Helpers
// ============================================================================

/// Allocate a ring of `count` descriptors.
pub fn ring<D: Default>(count: usize) -> Box<[D]> {
    (0..count).map(|_| D::default()).collect::<Vec<_>>().into_boxed_slice()
}

/// Bus address of a descriptor ring as programmed into the queue base
/// register.
pub fn ring_address<D>(ring: &[D]) -> u32 {
    (ring.as_ptr() as usize as u32) & ADDRESS_MASK
}

/// Free slots between the producer (`head`) and consumer (`tail`). One slot
/// always stays empty so a full ring is distinguishable from an empty one.
pub fn ring_space(head: usize, tail: usize, size: usize) -> usize {
    (tail as isize - (head as isize + 1)).rem_euclid(size as isize) as usize
}

pub fn ring_next(index: usize, size: usize) -> usize {
    if index + 1 >= size { 0 } else { index + 1 }
}

pub fn ring_prev(index: usize, size: usize) -> usize {
    if index == 0 { size - 1 } else { index - 1 }
}
