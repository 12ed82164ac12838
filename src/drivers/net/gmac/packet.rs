//! Packets, data segments and DMA buffers
//!
//! A [`MacPacket`] is an ordered chain of [`DataSegment`]s. Every segment
//! owns one [`DmaBuffer`]: cache-line aligned heap memory whose address can
//! be written straight into a descriptor.
//!
//! Received frames that span several RX buffers come back as one packet with
//! one segment per buffer. The Ethernet header is not part of the first
//! segment's data; it stays reachable through [`MacPacket::mac_header`].
//!
//! Transmit packets carry an acknowledgment callback. The driver hands the
//! packet back through it once hardware is done with it (or the packet was
//! discarded).

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

/// Ethernet II header: destination (6) + source (6) + EtherType (2)
pub const ETH_HEADER_SIZE: usize = 14;

/// Buffer alignment; a buffer never shares a cache line with other data
pub const DMA_ALIGN: usize = 64;

// ============================================================================
// DMA Buffer
// ============================================================================

/// Zeroed, [`DMA_ALIGN`]-aligned heap buffer
pub struct DmaBuffer {
    ptr: NonNull<u8>,
    size: usize,
}

// SAFETY: DmaBuffer uniquely owns its allocation, like Box<[u8]>
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    /// Allocate `size` bytes; `None` if `size` is zero or the heap is
    /// exhausted.
    pub fn new(size: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, DMA_ALIGN).ok()?;
        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc_zeroed(layout) };
        NonNull::new(ptr).map(|ptr| Self { ptr, size })
    }

    /// Address as seen by the DMA engine (identity-mapped, 32-bit bus)
    pub fn dma_addr(&self) -> u32 {
        self.ptr.as_ptr() as usize as u32
    }
}

impl Deref for DmaBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr is a live allocation of `size` initialized bytes
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }
}

impl DerefMut for DmaBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self gives exclusive access
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with exactly this layout
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.size, DMA_ALIGN);
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DmaBuffer({:#010x}, {})", self.dma_addr(), self.size)
    }
}

// ============================================================================
// Data Segment
// ============================================================================

#[derive(Debug)]
pub struct DataSegment {
    buffer: DmaBuffer,
    offset: usize,
    len: usize,
    sticky: bool,
}

impl DataSegment {
    /// Segment over `buffer` holding its first `len` bytes.
    pub fn new(buffer: DmaBuffer, len: usize) -> Self {
        let len = len.min(buffer.len());
        Self {
            buffer,
            offset: 0,
            len,
            sticky: false,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buffer.len() - self.offset);
    }

    /// Bus address of the first data byte.
    pub fn dma_addr(&self) -> u32 {
        self.buffer.dma_addr().wrapping_add(self.offset as u32)
    }

    /// Bus address of the underlying buffer, independent of any stripped
    /// header.
    pub fn buffer_addr(&self) -> u32 {
        self.buffer.dma_addr()
    }

    /// Pre-allocated RX buffer that is recycled rather than freed.
    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub fn set_sticky(&mut self, sticky: bool) {
        self.sticky = sticky;
    }

    /// Back to an empty view of the whole buffer.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.len = 0;
    }

    pub fn into_buffer(self) -> DmaBuffer {
        self.buffer
    }

    fn skip(&mut self, count: usize) {
        let count = count.min(self.len);
        self.offset += count;
        self.len -= count;
    }

    fn bytes_before(&self, count: usize) -> Option<&[u8]> {
        let start = self.offset.checked_sub(count)?;
        Some(&self.buffer[start..self.offset])
    }
}

// ============================================================================
// Packet
// ============================================================================

/// Packet state flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u16);

impl PacketFlags {
    /// Owned by the driver (queued for TX, or delivered from RX)
    pub const QUEUED: PacketFlags = PacketFlags(1 << 0);
    /// Received frame spans more than one buffer
    pub const SPLIT: PacketFlags = PacketFlags(1 << 1);
    pub const BROADCAST: PacketFlags = PacketFlags(1 << 2);
    pub const MULTICAST: PacketFlags = PacketFlags(1 << 3);
    pub const UNICAST: PacketFlags = PacketFlags(1 << 4);
    pub const CAST_MASK: PacketFlags =
        PacketFlags(Self::BROADCAST.0 | Self::MULTICAST.0 | Self::UNICAST.0);

    pub const fn empty() -> Self {
        PacketFlags(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PacketFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PacketFlags) {
        self.0 &= !other.0;
    }
}

/// Why a packet was handed back to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// Transmitted
    TxOk,
    /// Hardware flagged the frame (underrun, retry limit, corruption)
    TxError,
    /// Driver torn down with the packet still queued
    NetDown,
    /// Link dropped with the packet still queued
    LinkDown,
}

/// Packet acknowledgment; receives the packet, the result and the parameter
/// registered with [`MacPacket::set_ack`].
pub type PacketAckFn = fn(MacPacket, AckResult, usize);

#[derive(Debug, Default)]
pub struct MacPacket {
    segments: Vec<DataSegment>,
    pub flags: PacketFlags,
    header_len: usize,
    ack: Option<(PacketAckFn, usize)>,
}

impl MacPacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segments(segments: Vec<DataSegment>) -> Self {
        Self {
            segments,
            ..Self::default()
        }
    }

    /// Single-segment packet holding a copy of `frame`.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let mut buffer = DmaBuffer::new(frame.len())?;
        buffer.copy_from_slice(frame);
        let len = buffer.len();
        let mut segments = Vec::with_capacity(1);
        segments.push(DataSegment::new(buffer, len));
        Some(Self::with_segments(segments))
    }

    pub fn push_segment(&mut self, segment: DataSegment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[DataSegment] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [DataSegment] {
        &mut self.segments
    }

    pub fn into_segments(self) -> Vec<DataSegment> {
        self.segments
    }

    /// Data bytes across all segments (header excluded once stripped).
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(DataSegment::len).sum()
    }

    pub fn set_ack(&mut self, ack: PacketAckFn, param: usize) {
        self.ack = Some((ack, param));
    }

    /// Hand the packet back to its owner; dropped if no callback is set.
    pub fn acknowledge(mut self, result: AckResult) {
        if let Some((ack, param)) = self.ack.take() {
            ack(self, result, param);
        }
    }

    /// Move the Ethernet header out of the first segment's data.
    pub fn strip_mac_header(&mut self) -> bool {
        match self.segments.first_mut() {
            Some(first) if first.len() >= ETH_HEADER_SIZE => {
                first.skip(ETH_HEADER_SIZE);
                self.header_len = ETH_HEADER_SIZE;
                true
            }
            _ => false,
        }
    }

    /// Ethernet header of a received frame.
    pub fn mac_header(&self) -> Option<&[u8]> {
        if self.header_len == 0 {
            return None;
        }
        self.segments.first()?.bytes_before(self.header_len)
    }

    /// Copy the whole frame, header included, into `out`.
    pub fn write_frame(&self, out: &mut Vec<u8>) {
        out.clear();
        if let Some(header) = self.mac_header() {
            out.extend_from_slice(header);
        }
        for segment in &self.segments {
            out.extend_from_slice(segment.data());
        }
    }
}

// ============================================================================
// Allocation
// ============================================================================

/// Buffer allocation contract used for RX buffers
pub trait PacketAllocator: Send {
    fn alloc_buffer(&mut self, size: usize) -> Option<DmaBuffer>;

    fn free_buffer(&mut self, buffer: DmaBuffer) {
        drop(buffer);
    }
}

/// Allocates straight from the global heap
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl PacketAllocator for HeapAllocator {
    fn alloc_buffer(&mut self, size: usize) -> Option<DmaBuffer> {
        DmaBuffer::new(size)
    }
}

/// Heap allocator that counts buffers in and out, with an optional cap
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct CountingAllocator {
    pub allocated: alloc::sync::Arc<core::sync::atomic::AtomicUsize>,
    pub freed: alloc::sync::Arc<core::sync::atomic::AtomicUsize>,
    pub limit: Option<usize>,
}

#[cfg(test)]
impl CountingAllocator {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(core::sync::atomic::Ordering::SeqCst)
    }

    pub fn freed(&self) -> usize {
        self.freed.load(core::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl PacketAllocator for CountingAllocator {
    fn alloc_buffer(&mut self, size: usize) -> Option<DmaBuffer> {
        if self.limit.is_some_and(|limit| self.allocated() >= limit) {
            return None;
        }
        self.allocated
            .fetch_add(1, core::sync::atomic::Ordering::SeqCst);
        DmaBuffer::new(size)
    }

    fn free_buffer(&mut self, buffer: DmaBuffer) {
        self.freed.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
        drop(buffer);
    }
}
