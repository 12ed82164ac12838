//! smoltcp adapter
//!
//! Wraps an open [`Gmac`] as a [`smoltcp::phy::Device`]. Received frames are
//! copied out of their DMA buffers (header included) and the buffers go back
//! to the ring as soon as the stack has looked at them. Transmitted frames
//! are built straight in a fresh DMA buffer.

use super::packet::{DataSegment, DmaBuffer, MacPacket, PacketAllocator};
use super::regs::GmacHw;
use super::{Gmac, MTU};
use crate::drivers::net::phy::Phy;
use crate::println;
use alloc::vec;
use alloc::vec::Vec;
use smoltcp::phy::{self, DeviceCapabilities, Medium};
use smoltcp::time::Instant;

/// Ethernet II header plus IP MTU, without FCS
pub const MAX_FRAME_SIZE: usize = MTU + super::packet::ETH_HEADER_SIZE;

pub struct GmacDevice<'d, H, P, A> {
    mac: &'d Gmac<H, P, A>,
    rx_buf: Vec<u8>,
}

impl<'d, H: GmacHw, P: Phy, A: PacketAllocator> GmacDevice<'d, H, P, A> {
    /// The driver must already be open.
    pub fn new(mac: &'d Gmac<H, P, A>) -> Self {
        Self {
            mac,
            rx_buf: Vec::with_capacity(MAX_FRAME_SIZE),
        }
    }
}

pub struct GmacRxToken<'a, H, P, A> {
    mac: &'a Gmac<H, P, A>,
    packet: MacPacket,
    buf: &'a mut Vec<u8>,
}

impl<H: GmacHw, P: Phy, A: PacketAllocator> phy::RxToken for GmacRxToken<'_, H, P, A> {
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        self.packet.write_frame(self.buf);
        if let Err(e) = self.mac.rx_packet_ack(self.packet) {
            println!("[GMAC] RX buffer return failed: {}", e);
        }
        f(self.buf)
    }
}

pub struct GmacTxToken<'a, H, P, A> {
    mac: &'a Gmac<H, P, A>,
}

impl<H: GmacHw, P: Phy, A: PacketAllocator> phy::TxToken for GmacTxToken<'_, H, P, A> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let Some(mut buffer) = DmaBuffer::new(len) else {
            println!("[GMAC] TX dropped: no buffer for {} bytes", len);
            return f(&mut vec![0; len]);
        };
        let result = f(&mut buffer);

        let packet = MacPacket::with_segments(vec![DataSegment::new(buffer, len)]);
        if let Err(rejected) = self.mac.packet_tx(vec![packet]) {
            println!("[GMAC] TX dropped: {}", rejected.error);
        }
        result
    }
}

impl<'d, H: GmacHw, P: Phy, A: PacketAllocator> phy::Device for GmacDevice<'d, H, P, A> {
    type RxToken<'a>
        = GmacRxToken<'a, H, P, A>
    where
        Self: 'a;
    type TxToken<'a>
        = GmacTxToken<'a, H, P, A>
    where
        Self: 'a;

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = MAX_FRAME_SIZE;
        caps
    }

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let frame = match self.mac.packet_rx() {
            Ok(frame) => frame?,
            Err(e) => {
                println!("[GMAC] RX error: {}", e);
                return None;
            }
        };
        Some((
            GmacRxToken {
                mac: self.mac,
                packet: frame.packet,
                buf: &mut self.rx_buf,
            },
            GmacTxToken { mac: self.mac },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if !self.mac.tx_ready() {
            // Reap completions before giving up
            let _ = self.mac.process();
        }
        self.mac.tx_ready().then_some(GmacTxToken { mac: self.mac })
    }
}

#[cfg(test)]
mod tests {
    use super::super::descriptor::{LENGTH_MASK, TX_USED};
    use super::super::tests::ready_driver;
    use super::*;
    use smoltcp::phy::{Device, RxToken, TxToken};

    fn frame(payload_len: usize) -> Vec<u8> {
        let mut frame = vec![0xFF; 6];
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x20, 0x08, 0x06]);
        frame.extend((0..payload_len).map(|i| i as u8));
        frame
    }

    #[test]
    fn ethernet_capabilities() {
        let (gmac, _, _) = ready_driver();
        let device = GmacDevice::new(&gmac);
        let caps = device.capabilities();
        assert_eq!(caps.medium, Medium::Ethernet);
        assert_eq!(caps.max_transmission_unit, 1514);
    }

    #[test]
    fn receive_hands_over_whole_frame() {
        let (gmac, _, _) = ready_driver();
        let mut device = GmacDevice::new(&gmac);
        assert!(device.receive(Instant::ZERO).is_none());

        let data = frame(28);
        gmac.rx.lock().queues[0].receive(0, &data, 0);
        let (rx, _tx) = device.receive(Instant::ZERO).unwrap();
        let seen = rx.consume(|bytes| bytes.to_vec());
        assert_eq!(seen, data);

        // Buffer went back to the pool
        assert_eq!(gmac.rx.lock().queues[0].in_flight(), 4);
        let (rx_stats, _) = gmac.statistics().unwrap();
        assert_eq!(rx_stats.rx_ok, 1);
    }

    #[test]
    fn transmit_fills_a_descriptor() {
        let (gmac, _, _) = ready_driver();
        let mut device = GmacDevice::new(&gmac);
        let token = device.transmit(Instant::ZERO).unwrap();
        token.consume(42, |buf| buf.copy_from_slice(&frame(28)));

        let tx = gmac.tx.lock();
        let desc = &tx.queues[0].descriptors()[0];
        assert_eq!(desc.status() & LENGTH_MASK, 42);
        assert_eq!(desc.status() & TX_USED, 0);
        assert_eq!(tx.queues[0].in_flight(), 1);
    }

    #[test]
    fn transmit_reaps_before_reporting_full() {
        let (gmac, _, _) = ready_driver();
        let mut device = GmacDevice::new(&gmac);
        for _ in 0..3 {
            let token = device.transmit(Instant::ZERO).unwrap();
            token.consume(60, |buf| buf.fill(0x11));
        }
        // Three in flight, the fourth node is free
        assert!(device.transmit(Instant::ZERO).is_some());
        let token = device.transmit(Instant::ZERO).unwrap();
        token.consume(60, |buf| buf.fill(0x22));
        assert!(device.transmit(Instant::ZERO).is_none());

        gmac.tx.lock().queues[0].complete_sent(0);
        assert!(device.transmit(Instant::ZERO).is_some());
    }
}
