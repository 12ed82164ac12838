//! TX descriptor ring
//!
//! Packets move through three node lists (see [`super::queue`]): `new` holds
//! free nodes, `start` holds packets waiting for descriptors, and `ack` holds
//! packets the DMA engine owns. `head` is the next descriptor software fills;
//! `tail` is the oldest descriptor not yet reclaimed.
//!
//! ## Handing a frame to hardware
//!
//! 1. Fill every descriptor of the frame while they all still show USED
//! 2. Set LAST on the final descriptor
//! 3. Clear USED from the last descriptor back to the first
//! 4. Barrier, then TSTART
//!
//! Clearing the first descriptor last keeps the engine from starting on a
//! frame whose later descriptors are still stale.
//!
//! Completion is detected on the first descriptor only; hardware does not
//! set USED on the rest, so software reclaims them.

use super::descriptor::{
    TX_ERROR_BITS, TxDescriptor, ring, ring_address, ring_next, ring_prev, ring_space,
};
use super::packet::{AckResult, MacPacket, PacketFlags};
use super::queue::NodeList;
use super::regs::GmacHw;
use crate::drivers::barrier::dmb;
use crate::drivers::net::netdev::MacError;
use alloc::boxed::Box;
use alloc::vec::Vec;

/// Tracks one packet from `packet_tx` until hardware is done with it
#[derive(Debug, Default)]
pub struct TxNode {
    packet: Option<MacPacket>,
    /// First and last descriptor the packet occupies
    start: u16,
    end: u16,
}

/// Result of one attempt to push the head of the pending list into the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Sent,
    /// Nothing pending
    Idle,
    /// Not enough free descriptors; the packet stays at the head of `start`
    NoDescriptors,
}

/// Packets hardware is finished with, to be acknowledged once the TX lock
/// is released
pub type TxCompletions = Vec<(MacPacket, AckResult)>;

pub struct TxQueue {
    index: usize,
    ring: Box<[TxDescriptor]>,
    buffer_size: usize,
    head: usize,
    tail: usize,
    new: NodeList<TxNode>,
    start: NodeList<TxNode>,
    ack: NodeList<TxNode>,
}

impl TxQueue {
    /// Ring of `desc_count` software-owned descriptors with one node per
    /// descriptor.
    pub fn new(index: usize, desc_count: usize, buffer_size: usize) -> Self {
        let mut queue = Self {
            index,
            ring: ring(desc_count),
            buffer_size,
            head: 0,
            tail: 0,
            new: NodeList::with_capacity(desc_count),
            start: NodeList::with_capacity(desc_count),
            ack: NodeList::with_capacity(desc_count),
        };
        queue.reset_ring();
        for _ in 0..desc_count {
            queue.new.tail_add(TxNode::default());
        }
        queue
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ring_address(&self) -> u32 {
        ring_address(&self.ring)
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn free_nodes(&self) -> usize {
        self.new.len()
    }

    pub fn pending(&self) -> usize {
        self.start.len()
    }

    /// Packets owned by the DMA engine
    pub fn in_flight(&self) -> usize {
        self.ack.len()
    }

    pub fn descriptors(&self) -> &[TxDescriptor] {
        &self.ring
    }

    fn reset_ring(&mut self) {
        let last = self.ring.len().saturating_sub(1);
        for (i, desc) in self.ring.iter_mut().enumerate() {
            desc.reset(i == last);
        }
        self.head = 0;
        self.tail = 0;
    }

    /// Descriptors `packet` occupies; a segment longer than one TX buffer
    /// spans several.
    pub fn descriptors_needed(&self, packet: &MacPacket) -> usize {
        packet
            .segments()
            .iter()
            .map(|seg| seg.len().div_ceil(self.buffer_size))
            .sum()
    }

    /// Queue `packet` for transmission. On rejection the packet comes back
    /// with the reason.
    pub fn enqueue(&mut self, mut packet: MacPacket) -> Result<(), (MacError, MacPacket)> {
        let first_ok = packet.segments().first().is_some_and(|seg| !seg.is_empty());
        let needed = self.descriptors_needed(&packet);
        if !first_ok || needed >= self.ring.len() {
            return Err((MacError::PacketError, packet));
        }
        let Some(mut node) = self.new.head_remove() else {
            return Err((MacError::QueueTxFull, packet));
        };
        packet.flags.insert(PacketFlags::QUEUED);
        node.packet = Some(packet);
        self.start.tail_add(node);
        Ok(())
    }

    /// Move the head of the pending list into the ring.
    pub fn send_packet<H: GmacHw + ?Sized>(&mut self, hw: &H) -> TxOutcome {
        let Some(node) = self.start.head_remove() else {
            return TxOutcome::Idle;
        };
        let Some(packet) = node.packet.as_ref() else {
            self.new.tail_add(node);
            return TxOutcome::Idle;
        };

        let size = self.ring.len();
        let needed = self.descriptors_needed(packet);
        if needed == 0 || needed > ring_space(self.head, self.tail, size) {
            self.start.head_add(node);
            return TxOutcome::NoDescriptors;
        }

        let first = self.head;
        let mut index = first;
        let mut last = first;
        for seg in packet.segments() {
            let mut offset = 0;
            while offset < seg.len() {
                let chunk = (seg.len() - offset).min(self.buffer_size);
                self.ring[index].fill(seg.dma_addr().wrapping_add(offset as u32), chunk);
                last = index;
                index = ring_next(index, size);
                offset += chunk;
            }
        }
        self.ring[last].mark_last();
        dmb();

        let mut i = last;
        loop {
            self.ring[i].release();
            if i == first {
                break;
            }
            i = ring_prev(i, size);
        }
        self.head = index;
        dmb();
        hw.transmit_start();

        let mut node = node;
        node.start = first as u16;
        node.end = last as u16;
        self.ack.tail_add(node);
        TxOutcome::Sent
    }

    /// Push pending packets until the list drains or the ring fills.
    pub fn send_pending<H: GmacHw + ?Sized>(&mut self, hw: &H) -> TxOutcome {
        loop {
            match self.send_packet(hw) {
                TxOutcome::Sent => continue,
                outcome => return outcome,
            }
        }
    }

    /// Reap packets whose first descriptor hardware has marked USED, in
    /// send order.
    pub fn ack_packets(&mut self, done: &mut TxCompletions) {
        let size = self.ring.len();
        while let Some(node) = self.ack.head() {
            let (start, end) = (node.start as usize, node.end as usize);
            if !self.ring[start].is_used() {
                break;
            }
            let Some(mut node) = self.ack.head_remove() else {
                break;
            };
            let result = if self.ring[start].status() & TX_ERROR_BITS != 0 {
                AckResult::TxError
            } else {
                AckResult::TxOk
            };

            let mut i = start;
            loop {
                self.ring[i].reclaim();
                if i == end {
                    break;
                }
                i = ring_next(i, size);
            }
            self.tail = ring_next(end, size);

            if let Some(mut packet) = node.packet.take() {
                packet.flags.remove(PacketFlags::QUEUED);
                done.push((packet, result));
            }
            self.new.tail_add(node);
        }
    }

    /// Hardware side: finish every frame handed to the ring.
    #[cfg(test)]
    pub fn complete_sent(&mut self, error_bits: u32) {
        for node in self.ack.iter() {
            self.ring[node.start as usize].complete(error_bits);
        }
    }

    /// Hand back every queued and in-flight packet with `result` and empty
    /// the ring. Transmission must already be stopped.
    pub fn drain(&mut self, result: AckResult, done: &mut TxCompletions) {
        for list in [&mut self.start, &mut self.ack] {
            for mut node in list.drain() {
                if let Some(mut packet) = node.packet.take() {
                    packet.flags.remove(PacketFlags::QUEUED);
                    done.push((packet, result));
                }
                self.new.tail_add(node);
            }
        }
        self.reset_ring();
    }

    /// Abort everything queued or in flight and restart the ring empty.
    pub fn discard<H: GmacHw + ?Sized>(
        &mut self,
        hw: &H,
        result: AckResult,
        done: &mut TxCompletions,
    ) {
        hw.enable_tx(false);
        self.drain(result, done);
        hw.set_tx_queue_base(self.index, self.ring_address());
        hw.enable_tx(true);
    }
}

#[cfg(test)]
mod tests {
    use super::super::descriptor::{TX_LAST, TX_UNDERRUN, TX_USED, TX_WRAP};
    use super::super::packet::{DataSegment, DmaBuffer};
    use super::super::regs::{FakeGmac, NCR, NCR_TSTART, NCR_TXEN, TBQB};
    use super::*;

    const BUF: usize = 128;

    fn packet(segment_lens: &[usize], tag: u8) -> MacPacket {
        let mut pkt = MacPacket::new();
        for &len in segment_lens {
            let mut buf = DmaBuffer::new(len).unwrap();
            buf.fill(tag);
            pkt.push_segment(DataSegment::new(buf, len));
        }
        pkt
    }

    fn snapshot(q: &TxQueue) -> Vec<(u32, u32)> {
        q.descriptors().iter().map(|d| (d.address(), d.status())).collect()
    }

    fn tag_of(pkt: &MacPacket) -> u8 {
        pkt.segments()[0].data()[0]
    }

    #[test]
    fn init_leaves_every_descriptor_with_software() {
        let q = TxQueue::new(0, 4, BUF);
        assert!(q.descriptors().iter().all(|d| d.is_used()));
        assert_eq!(q.descriptors()[3].status(), TX_USED | TX_LAST | TX_WRAP);
        assert_eq!(q.free_nodes(), 4);
        assert_eq!((q.head(), q.tail()), (0, 0));
    }

    #[test]
    fn send_fills_and_releases_descriptors() {
        let hw = FakeGmac::new();
        let mut q = TxQueue::new(0, 8, BUF);
        q.enqueue(packet(&[BUF, 60], 1)).unwrap();
        assert_eq!(q.send_packet(&hw), TxOutcome::Sent);

        let d = q.descriptors();
        assert_eq!(d[0].status(), BUF as u32);
        assert_eq!(d[1].status(), TX_LAST | 60);
        assert!(d[2].is_used());
        assert_eq!(q.head(), 2);
        assert_eq!(q.in_flight(), 1);
        assert_ne!(hw.peek(NCR) & NCR_TSTART, 0);
    }

    #[test]
    fn long_segment_spans_descriptors() {
        let hw = FakeGmac::new();
        let mut q = TxQueue::new(0, 8, BUF);
        let pkt = packet(&[BUF * 2 + 10], 1);
        let base = pkt.segments()[0].dma_addr();
        assert_eq!(q.descriptors_needed(&pkt), 3);
        q.enqueue(pkt).unwrap();
        q.send_packet(&hw);

        let d = q.descriptors();
        assert_eq!(d[1].address(), base + BUF as u32);
        assert_eq!(d[2].address(), base + 2 * BUF as u32);
        assert_eq!(d[2].status(), TX_LAST | 10);
    }

    #[test]
    fn full_ring_leaves_state_untouched() {
        let hw = FakeGmac::new();
        let mut q = TxQueue::new(0, 4, BUF);
        q.enqueue(packet(&[BUF, BUF], 1)).unwrap();
        assert_eq!(q.send_packet(&hw), TxOutcome::Sent);

        q.enqueue(packet(&[BUF, BUF], 2)).unwrap();
        q.enqueue(packet(&[BUF], 3)).unwrap();
        let before = snapshot(&q);
        assert_eq!(q.send_packet(&hw), TxOutcome::NoDescriptors);

        assert_eq!(snapshot(&q), before);
        assert_eq!((q.head(), q.tail()), (2, 0));
        assert_eq!(q.pending(), 2);
        assert_eq!(q.start.head().and_then(|n| n.packet.as_ref()).map(tag_of), Some(2));
    }

    #[test]
    fn second_packet_waits_for_first_ack() {
        let hw = FakeGmac::new();
        let mut q = TxQueue::new(0, 4, BUF);
        let mut done = TxCompletions::new();

        q.enqueue(packet(&[BUF, BUF, BUF], 1)).unwrap();
        q.enqueue(packet(&[BUF, BUF], 2)).unwrap();
        assert_eq!(q.send_pending(&hw), TxOutcome::NoDescriptors);
        assert_eq!(q.pending(), 1);

        // Nothing completed yet: still blocked
        q.ack_packets(&mut done);
        assert!(done.is_empty());
        assert_eq!(q.send_pending(&hw), TxOutcome::NoDescriptors);

        q.ring[0].complete(0);
        q.ack_packets(&mut done);
        assert_eq!(done.len(), 1);
        assert_eq!(q.tail(), 3);

        assert_eq!(q.send_pending(&hw), TxOutcome::Idle);
        assert_eq!(q.pending(), 0);
        let d = q.descriptors();
        assert!(!d[3].is_used() && !d[0].is_used());
        assert_eq!(d[0].status() & TX_LAST, TX_LAST);
        assert_eq!(q.head(), 1);
    }

    #[test]
    fn acks_follow_send_order() {
        let hw = FakeGmac::new();
        let mut q = TxQueue::new(0, 8, BUF);
        let mut done = TxCompletions::new();
        for tag in 1..=4 {
            q.enqueue(packet(&[64], tag)).unwrap();
        }
        q.send_pending(&hw);
        assert_eq!(q.free_nodes(), 4);

        // Later packets completing first are held back behind packet 1
        q.ring[1].complete(0);
        q.ring[2].complete(0);
        q.ack_packets(&mut done);
        assert!(done.is_empty());

        q.ring[0].complete(0);
        q.ring[3].complete(0);
        q.ack_packets(&mut done);

        let tags: Vec<u8> = done.iter().map(|(p, _)| tag_of(p)).collect();
        assert_eq!(tags, [1, 2, 3, 4]);
        assert!(done.iter().all(|(p, r)| *r == AckResult::TxOk && p.flags.bits() == 0));
        assert_eq!(q.free_nodes(), 8);
        assert_eq!(q.in_flight(), 0);

        q.ack_packets(&mut done);
        assert_eq!(done.len(), 4);
    }

    #[test]
    fn error_bits_report_tx_error() {
        let hw = FakeGmac::new();
        let mut q = TxQueue::new(0, 4, BUF);
        let mut done = TxCompletions::new();
        q.enqueue(packet(&[64, 64], 1)).unwrap();
        q.send_pending(&hw);
        q.ring[0].complete(TX_UNDERRUN);
        q.ack_packets(&mut done);

        assert_eq!(done[0].1, AckResult::TxError);
        // Hardware only flags the first descriptor; the second is reclaimed
        assert!(q.descriptors()[1].is_used());
    }

    #[test]
    fn malformed_packets_are_rejected() {
        let mut q = TxQueue::new(0, 4, BUF);
        let (err, _) = q.enqueue(MacPacket::new()).unwrap_err();
        assert_eq!(err, MacError::PacketError);
        let (err, _) = q.enqueue(packet(&[BUF * 4], 1)).unwrap_err();
        assert_eq!(err, MacError::PacketError);

        for tag in 0..4 {
            q.enqueue(packet(&[10], tag)).unwrap();
        }
        let (err, pkt) = q.enqueue(packet(&[10], 9)).unwrap_err();
        assert_eq!(err, MacError::QueueTxFull);
        assert_eq!(tag_of(&pkt), 9);
    }

    #[test]
    fn discard_returns_everything() {
        let hw = FakeGmac::new();
        let mut q = TxQueue::new(0, 4, BUF);
        let mut done = TxCompletions::new();
        q.enqueue(packet(&[BUF, BUF], 1)).unwrap();
        q.enqueue(packet(&[BUF, BUF], 2)).unwrap();
        q.send_pending(&hw);
        hw.clear_writes();

        q.discard(&hw, AckResult::LinkDown, &mut done);

        let tags: Vec<u8> = done.iter().map(|(p, _)| tag_of(p)).collect();
        assert_eq!(tags, [2, 1]);
        assert!(done.iter().all(|(_, r)| *r == AckResult::LinkDown));
        assert_eq!(q.free_nodes(), 4);
        assert_eq!((q.head(), q.tail()), (0, 0));
        assert!(q.descriptors().iter().all(|d| d.is_used()));
        assert_eq!(hw.writes_to(TBQB), [q.ring_address()]);
        assert_ne!(hw.peek(NCR) & NCR_TXEN, 0);
    }
}
