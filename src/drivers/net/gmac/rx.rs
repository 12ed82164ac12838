//! RX descriptor ring
//!
//! Every descriptor slot either holds a buffer the DMA engine may fill or is
//! empty. Buffers come from a per-queue free list (`free`); every buffer lent
//! out (to hardware, or to the stack inside a received packet) is tracked by
//! a node on the in-flight list until it comes back.
//!
//! ```text
//!   alloc ──▶ free ──append──▶ slot (hardware) ──take_frame──▶ stack
//!              ▲                   │ discard                     │
//!              └───────────────────┴───────── rx_packet_ack ◀────┘
//! ```
//!
//! Sticky buffers are allocated once at init and always return to `free`.
//! Dynamic buffers are allocated when `free` runs below the threshold and
//! handed back to the allocator once `free` is above it again.
//!
//! A queue never owns more than `rx_desc_count + rx_sticky_buffers +
//! rx_alloc_count` buffers. Both lists are sized for that bound at init, so
//! the receive path does not allocate list storage. With every buffer lent
//! out, empty slots wait for acknowledgements instead.
//!
//! ## Frame search
//!
//! A frame is one or more software-owned descriptors from a start-of-frame
//! (SOF) to an end-of-frame (EOF) descriptor. The scan resumes where the
//! previous one stopped and covers at most one ring length. A partial frame
//! (a second SOF before the EOF, or a hardware-owned slot after the SOF) is
//! discarded and its slots re-armed; the scan then restarts at the slot that
//! broke the frame.

use super::QueueConfig;
use super::descriptor::{RxDescriptor, RxStatus, ring, ring_address, ring_next, ring_prev};
use super::packet::{DataSegment, MacPacket, PacketAllocator};
use super::queue::NodeList;
use crate::drivers::barrier::dmb;
use crate::drivers::net::netdev::MacError;
use crate::println;
use alloc::boxed::Box;
use alloc::vec::Vec;

/// In-flight bookkeeping for one lent-out buffer
#[derive(Debug, Clone, Copy)]
pub struct BufferNode {
    dma_addr: u32,
}

impl BufferNode {
    /// Base address of the buffer handed to hardware
    pub fn dma_addr(&self) -> u32 {
        self.dma_addr
    }
}

/// Descriptors holding one complete received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpan {
    pub start: usize,
    pub end: usize,
    pub count: usize,
}

#[derive(Clone, Copy)]
enum Scan {
    Idle,
    InFrame { start: usize, count: usize },
}

pub struct RxQueue {
    index: usize,
    ring: Box<[RxDescriptor]>,
    slots: Vec<Option<DataSegment>>,
    buffer_size: usize,
    threshold: usize,
    alloc_count: usize,
    max_buffers: usize,
    free: NodeList<DataSegment>,
    in_flight: NodeList<BufferNode>,
    scan: usize,
}

impl RxQueue {
    /// Allocate the sticky buffers and arm every descriptor.
    pub fn new<A: PacketAllocator + ?Sized>(
        index: usize,
        config: &QueueConfig,
        alloc: &mut A,
    ) -> Result<Self, MacError> {
        let count = config.rx_desc_count;
        let max_buffers = count + config.rx_sticky_buffers + config.rx_alloc_count;
        let mut queue = Self {
            index,
            ring: ring(count),
            slots: (0..count).map(|_| None).collect(),
            buffer_size: config.rx_buffer_size,
            threshold: config.rx_buffer_threshold,
            alloc_count: config.rx_alloc_count,
            max_buffers,
            free: NodeList::with_capacity(max_buffers),
            in_flight: NodeList::with_capacity(max_buffers),
            scan: 0,
        };
        queue.reset_ring();

        let armed = queue
            .allocate(config.rx_sticky_buffers, true, alloc)
            .and_then(|()| queue.append(0, count, alloc));
        if let Err(e) = armed {
            queue.release_all(alloc);
            return Err(e);
        }
        Ok(queue)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ring_address(&self) -> u32 {
        ring_address(&self.ring)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn free_buffers(&self) -> usize {
        self.free.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn descriptors(&self) -> &[RxDescriptor] {
        &self.ring
    }

    fn owned(&self) -> usize {
        self.in_flight.len() + self.free.len()
    }

    fn reset_ring(&mut self) {
        let last = self.ring.len().saturating_sub(1);
        for (i, desc) in self.ring.iter_mut().enumerate() {
            desc.reset(i == last);
        }
        self.scan = 0;
    }

    fn allocate<A: PacketAllocator + ?Sized>(
        &mut self,
        count: usize,
        sticky: bool,
        alloc: &mut A,
    ) -> Result<(), MacError> {
        for _ in 0..count {
            let buffer = alloc
                .alloc_buffer(self.buffer_size)
                .ok_or(MacError::OutOfMemory)?;
            let mut segment = DataSegment::new(buffer, 0);
            segment.set_sticky(sticky);
            self.free.tail_add(segment);
        }
        Ok(())
    }

    /// Give a buffer to every empty slot in `count` slots from `start`,
    /// topping up the free list from the allocator when it runs low.
    pub fn append<A: PacketAllocator + ?Sized>(
        &mut self,
        start: usize,
        count: usize,
        alloc: &mut A,
    ) -> Result<(), MacError> {
        let size = self.ring.len();
        let mut index = start;
        for _ in 0..count {
            if self.free.len() < self.threshold {
                let room = self.max_buffers - self.owned();
                // A short allocation still leaves whatever it managed to add
                let _ = self.allocate(self.alloc_count.min(room), false, alloc);
            }
            if self.slots[index].is_none() {
                let Some(segment) = self.free.head_remove() else {
                    println!("[GMAC] RX queue {}: buffer queue exhausted", self.index);
                    dmb();
                    return Err(MacError::NoQueueNodes);
                };
                let dma_addr = segment.buffer_addr();
                self.ring[index].arm(dma_addr, index == size - 1);
                self.in_flight.tail_add(BufferNode { dma_addr });
                self.slots[index] = Some(segment);
            }
            index = ring_next(index, size);
        }
        dmb();
        Ok(())
    }

    /// Look for the next complete frame.
    pub fn search<A: PacketAllocator + ?Sized>(&mut self, alloc: &mut A) -> Option<FrameSpan> {
        let size = self.ring.len();
        let mut index = self.scan;
        let mut searched = 0;
        let mut state = Scan::Idle;
        let mut found = None;

        dmb();
        while searched < size {
            let desc = &self.ring[index];
            if desc.is_software_owned() {
                if desc.buffer_address() == 0 {
                    let _ = self.append(index, 1, alloc);
                } else {
                    let status = desc.status();
                    match state {
                        Scan::Idle if status.is_start() => {
                            state = Scan::InFrame {
                                start: index,
                                count: 1,
                            };
                            searched = 1;
                            if status.is_end() {
                                found = Some(FrameSpan {
                                    start: index,
                                    end: index,
                                    count: 1,
                                });
                                break;
                            }
                        }
                        Scan::Idle => {}
                        Scan::InFrame { start, count } if status.is_start() => {
                            self.discard(start, count, alloc);
                            state = Scan::Idle;
                            searched -= 1;
                            index = ring_prev(index, size);
                        }
                        Scan::InFrame { start, count } => {
                            let count = count + 1;
                            state = Scan::InFrame { start, count };
                            if status.is_end() {
                                found = Some(FrameSpan {
                                    start,
                                    end: index,
                                    count,
                                });
                                break;
                            }
                        }
                    }
                }
            } else if let Scan::InFrame { start, count } = state {
                self.discard(start, count, alloc);
                state = Scan::Idle;
                searched -= 1;
                index = ring_prev(index, size);
            }
            index = ring_next(index, size);
            searched += 1;
        }

        self.scan = index;
        found
    }

    /// Return the buffers of a partial frame and re-arm its slots.
    fn discard<A: PacketAllocator + ?Sized>(&mut self, start: usize, count: usize, alloc: &mut A) {
        let size = self.ring.len();
        let mut index = (start + count - 1) % size;
        for _ in 0..count {
            if let Some(segment) = self.slots[index].take() {
                let _ = self.release_buffer(segment, alloc);
            }
            self.ring[index].clear_buffer();
            index = ring_prev(index, size);
        }
        println!(
            "[GMAC] RX queue {}: discarded partial frame ({} buffers at {})",
            self.index, count, start
        );
        let _ = self.append(start, count, alloc);
    }

    /// Detach the buffers of `span` as one packet and re-arm the slots.
    ///
    /// Buffers past the frame length go straight back to the free list. A
    /// failed refill leaves the slots empty for the next search to retry;
    /// the frame is still delivered.
    pub fn take_frame<A: PacketAllocator + ?Sized>(
        &mut self,
        span: FrameSpan,
        alloc: &mut A,
    ) -> Result<(MacPacket, RxStatus), MacError> {
        let size = self.ring.len();
        let status = self.ring[span.end].status();
        let mut remaining = status.frame_len();
        let mut packet = MacPacket::new();

        let mut index = span.start;
        for _ in 0..span.count {
            if let Some(mut segment) = self.slots[index].take() {
                if remaining > 0 {
                    let len = remaining.min(self.buffer_size);
                    segment.set_len(len);
                    remaining -= len;
                    packet.push_segment(segment);
                } else {
                    let _ = self.release_buffer(segment, alloc);
                }
            }
            self.ring[index].clear_buffer();
            index = ring_next(index, size);
        }

        if let Err(e) = self.append(span.start, span.count, alloc) {
            println!("[GMAC] RX queue {}: refill failed: {}", self.index, e);
        }

        if packet.segments().is_empty() {
            return Err(MacError::PacketError);
        }
        Ok((packet, status))
    }

    /// Take back the buffers of a packet delivered by [`Self::take_frame`].
    pub fn ack_packet<A: PacketAllocator + ?Sized>(
        &mut self,
        packet: MacPacket,
        alloc: &mut A,
    ) -> Result<(), MacError> {
        if packet.segments().is_empty() {
            return Err(MacError::PacketError);
        }
        let mut result = Ok(());
        for segment in packet.into_segments() {
            if let Err(e) = self.release_buffer(segment, alloc) {
                result = result.and(Err(e));
            }
        }
        result
    }

    fn release_buffer<A: PacketAllocator + ?Sized>(
        &mut self,
        mut segment: DataSegment,
        alloc: &mut A,
    ) -> Result<(), MacError> {
        let addr = segment.buffer_addr();
        if self
            .in_flight
            .remove_first(|node| node.dma_addr() == addr)
            .is_none()
        {
            println!("[GMAC] RX queue {}: buffer {:#x} was not lent out", self.index, addr);
            alloc.free_buffer(segment.into_buffer());
            return Err(MacError::PacketError);
        }
        if self.free.len() > self.threshold && !segment.is_sticky() {
            alloc.free_buffer(segment.into_buffer());
        } else {
            segment.reset();
            self.free.tail_add(segment);
        }
        Ok(())
    }

    /// Hardware side of a single-buffer reception into slot `index`.
    #[cfg(test)]
    pub fn receive(&mut self, index: usize, frame: &[u8], status_bits: u32) {
        use super::descriptor::{RX_EOF, RX_SOF};
        if let Some(segment) = self.slots[index].as_mut() {
            segment.set_len(frame.len());
            segment.data_mut().copy_from_slice(frame);
        }
        self.ring[index].complete(RX_SOF | RX_EOF | status_bits | frame.len() as u32);
    }

    /// Hand every buffer the queue holds back to the allocator and leave
    /// the ring empty.
    pub fn release_all<A: PacketAllocator + ?Sized>(&mut self, alloc: &mut A) {
        for slot in self.slots.iter_mut() {
            if let Some(segment) = slot.take() {
                alloc.free_buffer(segment.into_buffer());
            }
        }
        for segment in self.free.drain() {
            alloc.free_buffer(segment.into_buffer());
        }
        let _ = self.in_flight.drain().count();
        self.reset_ring();
    }
}
