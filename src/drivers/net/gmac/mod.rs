//! GMAC Ethernet MAC driver
//!
//! The MAC moves frames between the wire and memory on its own, through
//! per-queue rings of DMA descriptors. This driver owns the rings, the RX
//! buffer pool and the packet queues around them; the network stack sees
//! packets, statistics and events.
//!
//! ## Lifecycle
//!
//! ```text
//!  Uninitialized ──initialize──▶ Busy ──tasks (PHY ready)──▶ Ready
//!        ▲                        │ tasks (PHY failed)
//!        │                        ▼
//!        └────deinitialize──── Error
//! ```
//!
//! `initialize` programs the MAC and starts the PHY; `tasks` is polled until
//! the PHY finishes its own setup. After that `link_check` is polled to track
//! the link, and `packet_tx`, `packet_rx` and `process` move traffic.
//!
//! ## Queues
//!
//! Every enabled queue gets RX and TX rings, but traffic flows on queue 0
//! only. The priority queues are programmed so the DMA engine never walks
//! an unset ring.
//!
//! ## Locking
//!
//! | Lock | Protects | Taken by |
//! |------|----------|----------|
//! | `state` | status, configuration | lifecycle, link |
//! | `link` | PHY, link state | tasks, link_check |
//! | `tx` | TX rings, TX statistics | packet_tx, process |
//! | `rx` | RX rings, buffer pool, RX statistics | packet_rx, rx_packet_ack |
//! | `events` | event masks (IRQ-masking) | event API, interrupt |
//!
//! Locks are taken in table order. RX and TX never wait on each other.
//! Packet acknowledgments run after every lock is released, so an
//! acknowledgment may submit the next packet.

pub mod descriptor;
pub mod device;
pub mod events;
pub mod packet;
pub mod queue;
pub mod regs;
pub mod rx;
pub mod tx;

pub use descriptor::RxStatus;
pub use device::GmacDevice;
pub use events::{EventNotifyFn, MacEvents};
pub use packet::{
    AckResult, DataSegment, DmaBuffer, HeapAllocator, MacPacket, PacketAckFn, PacketAllocator,
    PacketFlags,
};
pub use regs::{GmacHw, MmioGmac};

use super::netdev::{LinkParams, MacAddress, MacError, MacStatus};
use super::phy::{Phy, PhyPoll};
use crate::println;
use crate::status::ModuleStatus;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use events::EventState;
use regs::{INT_ALL, INT_RX_BITS, INT_TX_BITS};
use rx::RxQueue;
use tx::{TxCompletions, TxOutcome, TxQueue};

// ============================================================================
// Configuration
// ============================================================================

/// Queues the MAC provides (queue 0 plus five priority queues)
pub const MAX_QUEUES: usize = 6;
/// One TX descriptor always stays empty
pub const MIN_TX_DESCRIPTORS: usize = 2;
/// Smallest RX buffer; RX buffer sizes are programmed in 64-byte units
pub const MIN_RX_BUFFER_SIZE: usize = 64;
/// Largest RX buffer the 8-bit DMA size field can express
pub const MAX_RX_BUFFER_SIZE: usize = 0xFF * 64;
/// Largest TX buffer a descriptor length field can express
pub const MAX_TX_BUFFER_SIZE: usize = descriptor::LENGTH_MASK as usize;
/// IP MTU reported to the stack
pub const MTU: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub tx_desc_count: usize,
    pub rx_desc_count: usize,
    pub tx_buffer_size: usize,
    pub rx_buffer_size: usize,
    /// RX buffers allocated at init and never freed
    pub rx_sticky_buffers: usize,
    /// Free-list low-water mark that triggers dynamic allocation
    pub rx_buffer_threshold: usize,
    /// Buffers allocated per dynamic refill
    pub rx_alloc_count: usize,
    pub enabled: bool,
}

impl QueueConfig {
    pub const DEFAULT: QueueConfig = QueueConfig {
        tx_desc_count: 8,
        rx_desc_count: 8,
        tx_buffer_size: 1536,
        rx_buffer_size: 1536,
        rx_sticky_buffers: 12,
        rx_buffer_threshold: 1,
        rx_alloc_count: 1,
        enabled: true,
    };

    /// Priority queue placeholder; rings exist but carry no traffic.
    pub const DISABLED: QueueConfig = QueueConfig {
        enabled: false,
        ..Self::DEFAULT
    };

    fn validate(&self) -> Result<(), MacError> {
        let valid = self.tx_desc_count >= MIN_TX_DESCRIPTORS
            && self.tx_desc_count <= u16::MAX as usize
            && self.rx_desc_count >= 2
            && self.rx_buffer_size >= MIN_RX_BUFFER_SIZE
            && self.rx_buffer_size <= MAX_RX_BUFFER_SIZE
            && self.rx_buffer_size % MIN_RX_BUFFER_SIZE == 0
            && self.tx_buffer_size > 0
            && self.tx_buffer_size <= MAX_TX_BUFFER_SIZE;
        if valid { Ok(()) } else { Err(MacError::InvalidConfig) }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GmacConfig {
    /// Per-queue settings; index 0 is the traffic queue
    pub queues: Vec<QueueConfig>,
    pub mac_address: MacAddress,
    /// Settling time after the PHY reports a link before it is trusted
    pub link_init_delay_ms: u32,
    /// Take speed/duplex from auto-negotiation instead of the link status
    pub auto_negotiate: bool,
}

impl GmacConfig {
    pub fn validate(&self) -> Result<(), MacError> {
        let queue0_enabled = self.queues.first().is_some_and(|q| q.enabled);
        if !queue0_enabled || self.queues.len() > MAX_QUEUES {
            return Err(MacError::InvalidConfig);
        }
        self.queues
            .iter()
            .filter(|q| q.enabled)
            .try_for_each(QueueConfig::validate)
    }
}

impl Default for GmacConfig {
    fn default() -> Self {
        Self {
            queues: vec![QueueConfig::DEFAULT],
            mac_address: MacAddress::new([0x00, 0x04, 0xA3, 0x00, 0x00, 0x01]),
            link_init_delay_ms: 500,
            auto_negotiate: true,
        }
    }
}

// ============================================================================
// Reported Data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxStatistics {
    pub rx_ok: u32,
    pub rx_error: u32,
    pub rx_buffer_not_available: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxStatistics {
    pub tx_ok: u32,
    pub tx_error: u32,
    pub tx_queue_full: u32,
    /// Packets handed to hardware and not yet acknowledged
    pub tx_pending_buffers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacParameters {
    pub mac_address: MacAddress,
    pub mtu: usize,
    pub processes_rx: bool,
    pub processes_tx: bool,
    pub link: Option<LinkParams>,
}

/// A received frame; hand the packet back with [`Gmac::rx_packet_ack`].
#[derive(Debug)]
pub struct RxFrame {
    pub packet: MacPacket,
    pub status: RxStatus,
}

/// Packets `packet_tx` did not queue: the one that failed and every one
/// after it. Those before it were queued.
#[derive(Debug)]
pub struct TxRejected {
    pub error: MacError,
    pub packets: Vec<MacPacket>,
}

// ============================================================================
// Driver State
// ============================================================================

#[derive(Default)]
struct State {
    status: ModuleStatus,
    config: GmacConfig,
}

struct LinkControl<P> {
    phy: P,
    /// PHY finished its setup
    present: bool,
    up: bool,
    /// Settling delay elapsed since the link was last seen down
    settled: bool,
    down_since: Option<u32>,
    params: Option<LinkParams>,
    /// Link was up at the previous `tasks`; a drop flushes TX
    flush_armed: bool,
}

impl<P> LinkControl<P> {
    fn new(phy: P) -> Self {
        Self {
            phy,
            present: false,
            up: false,
            settled: false,
            down_since: None,
            params: None,
            flush_armed: false,
        }
    }

    fn reset(&mut self) {
        self.present = false;
        self.set_down(None);
        self.flush_armed = false;
    }

    fn set_down(&mut self, now_ms: Option<u32>) {
        self.up = false;
        self.settled = false;
        self.down_since = now_ms;
        self.params = None;
    }
}

struct RxPath<A> {
    alloc: A,
    queues: Vec<RxQueue>,
    stats: RxStatistics,
}

#[derive(Default)]
struct TxPath {
    queues: Vec<TxQueue>,
    stats: TxStatistics,
}

impl TxPath {
    fn record(&mut self, done: &TxCompletions) {
        for (_, result) in done {
            match result {
                AckResult::TxOk => self.stats.tx_ok += 1,
                AckResult::TxError => self.stats.tx_error += 1,
                AckResult::NetDown | AckResult::LinkDown => {}
            }
        }
    }

    /// Push pending packets on queue 0, then reap completions.
    fn send_and_reap<H: GmacHw + ?Sized>(&mut self, hw: &H, done: &mut TxCompletions) -> MacStatus {
        let Some(queue) = self.queues.first_mut() else {
            return MacStatus::Ok;
        };
        let outcome = queue.send_pending(hw);
        queue.ack_packets(done);
        self.record(done);
        if outcome == TxOutcome::NoDescriptors {
            self.stats.tx_queue_full += 1;
            MacStatus::Pending
        } else {
            MacStatus::Ok
        }
    }
}

fn acknowledge_all(done: TxCompletions) {
    for (packet, result) in done {
        packet.acknowledge(result);
    }
}

// ============================================================================
// Driver
// ============================================================================

pub struct Gmac<H, P, A = HeapAllocator> {
    hw: H,
    state: spin::Mutex<State>,
    link: spin::Mutex<LinkControl<P>>,
    tx: spin::Mutex<TxPath>,
    rx: spin::Mutex<RxPath<A>>,
    events: crate::sync::Mutex<EventState>,
    open: AtomicBool,
}

impl<H: GmacHw, P: Phy> Gmac<H, P, HeapAllocator> {
    pub fn new(hw: H, phy: P) -> Self {
        Self::with_allocator(hw, phy, HeapAllocator)
    }
}

impl<H: GmacHw, P: Phy, A: PacketAllocator> Gmac<H, P, A> {
    /// Driver with RX buffers drawn from `alloc`.
    pub fn with_allocator(hw: H, phy: P, alloc: A) -> Self {
        Self {
            hw,
            state: spin::Mutex::new(State::default()),
            link: spin::Mutex::new(LinkControl::new(phy)),
            tx: spin::Mutex::new(TxPath::default()),
            rx: spin::Mutex::new(RxPath {
                alloc,
                queues: Vec::new(),
                stats: RxStatistics::default(),
            }),
            events: crate::sync::Mutex::new(EventState::default()),
            open: AtomicBool::new(false),
        }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Program the MAC, build the rings and start the PHY.
    ///
    /// On success the driver is `Busy` until [`Self::tasks`] sees the PHY
    /// ready. On failure everything built so far is torn down and the driver
    /// stays `Uninitialized`. Initializing a running driver restarts it.
    pub fn initialize(&self, config: GmacConfig) -> Result<(), MacError> {
        config.validate()?;

        let mut state = self.state.lock();
        let mut link = self.link.lock();
        let mut tx = self.tx.lock();
        let mut rx = self.rx.lock();

        let mut done = TxCompletions::new();
        if state.status != ModuleStatus::Uninitialized {
            done = self.teardown(&mut tx, &mut rx, AckResult::NetDown);
            if state.status != ModuleStatus::Error {
                link.phy.close();
            }
        }
        link.reset();
        state.status = ModuleStatus::Uninitialized;
        self.open.store(false, Ordering::Release);
        self.events.lock().clear();
        tx.stats = TxStatistics::default();
        rx.stats = RxStatistics::default();

        let result = self.bring_up(&config, &mut link, &mut tx, &mut rx);
        match result {
            Ok(()) => {
                println!(
                    "[GMAC] Initialized: MAC {}, {} queue(s)",
                    config.mac_address,
                    tx.queues.len()
                );
                state.config = config;
                state.status = ModuleStatus::Busy;
            }
            Err(e) => {
                println!("[GMAC] Initialization failed: {}", e);
                done.append(&mut self.teardown(&mut tx, &mut rx, AckResult::NetDown));
                if e != MacError::PhyInitFailed {
                    link.phy.close();
                }
            }
        }

        drop((rx, tx, link, state));
        acknowledge_all(done);
        result
    }

    fn bring_up(
        &self,
        config: &GmacConfig,
        link: &mut LinkControl<P>,
        tx: &mut TxPath,
        rx: &mut RxPath<A>,
    ) -> Result<(), MacError> {
        self.hw.reset(config.queues.len() - 1);

        if let Err(e) = link.phy.init() {
            println!("[GMAC] PHY: {}", e);
            return Err(MacError::PhyInitFailed);
        }

        let RxPath { alloc, queues, .. } = rx;
        for (index, queue) in config.queues.iter().enumerate() {
            if !queue.enabled {
                continue;
            }
            let rx_queue = RxQueue::new(index, queue, alloc)?;
            self.hw.set_rx_queue_base(index, rx_queue.ring_address());
            self.hw.configure_rx_buffer_size(index, queue.rx_buffer_size);
            queues.push(rx_queue);

            let tx_queue = TxQueue::new(index, queue.tx_desc_count, queue.tx_buffer_size);
            self.hw.set_tx_queue_base(index, tx_queue.ring_address());
            tx.queues.push(tx_queue);

            self.hw.enable_queue_interrupts(index, INT_RX_BITS | INT_TX_BITS);
        }

        self.hw.set_mac_address(config.mac_address);
        self.hw.enable_transfers();

        if !self.hw.event_init() {
            return Err(MacError::EventInitFailed);
        }
        Ok(())
    }

    /// Stop the MAC and release the rings. Returns the TX packets to
    /// acknowledge once the locks are dropped.
    fn teardown(&self, tx: &mut TxPath, rx: &mut RxPath<A>, result: AckResult) -> TxCompletions {
        self.hw.disable_transfers();
        self.hw.disable_interrupts(INT_ALL);

        let mut done = TxCompletions::new();
        for queue in tx.queues.iter_mut() {
            queue.drain(result, &mut done);
        }
        tx.queues.clear();

        let RxPath { alloc, queues, .. } = rx;
        for queue in queues.iter_mut() {
            queue.release_all(alloc);
        }
        queues.clear();
        done
    }

    pub fn deinitialize(&self) {
        let mut state = self.state.lock();
        if state.status == ModuleStatus::Uninitialized {
            return;
        }
        let mut link = self.link.lock();
        let mut tx = self.tx.lock();
        let mut rx = self.rx.lock();

        let done = self.teardown(&mut tx, &mut rx, AckResult::NetDown);
        self.hw.event_deinit();
        self.events.lock().clear();
        if state.status != ModuleStatus::Error {
            link.phy.close();
        }
        link.reset();
        self.open.store(false, Ordering::Release);
        state.status = ModuleStatus::Uninitialized;
        println!("[GMAC] Deinitialized");

        drop((rx, tx, link, state));
        acknowledge_all(done);
    }

    pub fn status(&self) -> ModuleStatus {
        self.state.lock().status
    }

    /// Drive initialization to completion and react to link loss.
    pub fn tasks(&self) {
        let mut state = self.state.lock();
        let mut link = self.link.lock();
        let mut done = TxCompletions::new();

        if state.status == ModuleStatus::Busy {
            match link.phy.poll() {
                PhyPoll::Busy => {}
                PhyPoll::Failed => {
                    println!("[GMAC] PHY initialization failed");
                    let mut tx = self.tx.lock();
                    let mut rx = self.rx.lock();
                    done = self.teardown(&mut tx, &mut rx, AckResult::NetDown);
                    link.phy.close();
                    state.status = ModuleStatus::Error;
                }
                PhyPoll::Ready => {
                    link.present = true;
                    state.status = ModuleStatus::Ready;
                    println!("[GMAC] PHY ready");
                }
            }
        }

        if link.up {
            link.flush_armed = true;
        } else if link.flush_armed {
            link.flush_armed = false;
            let mut tx = self.tx.lock();
            if let Some(queue) = tx.queues.first_mut() {
                queue.discard(&self.hw, AckResult::LinkDown, &mut done);
            }
        }

        drop((link, state));
        acknowledge_all(done);
    }

    /// Single client; the stack opens the driver before moving traffic.
    pub fn open(&self) -> Result<(), MacError> {
        if self.state.lock().status == ModuleStatus::Uninitialized {
            return Err(MacError::NotReady);
        }
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(MacError::AlreadyOpen);
        }
        Ok(())
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    // ========================================================================
    // Link
    // ========================================================================

    /// Poll the link; `now_ms` is any free-running millisecond clock.
    ///
    /// A link coming up is trusted only after `link_init_delay_ms` has passed
    /// since it was last seen down (or since the first check). The MAC is
    /// then reconfigured for the link's speed and duplex.
    #[must_use]
    pub fn link_check(&self, now_ms: u32) -> bool {
        let state = self.state.lock();
        let mut link = self.link.lock();
        if !link.present {
            return false;
        }

        let Some(current) = link.phy.link_status() else {
            if link.up {
                println!("[GMAC] Link down");
            }
            link.set_down(Some(now_ms));
            return false;
        };
        if link.up {
            return true;
        }

        let since = *link.down_since.get_or_insert(now_ms);
        if !link.settled {
            if now_ms.wrapping_sub(since) < state.config.link_init_delay_ms {
                return false;
            }
            link.settled = true;
        }

        let params = if state.config.auto_negotiate {
            link.phy.negotiation_result()
        } else {
            Some(current)
        };
        // Negotiation still running
        let Some(params) = params else {
            return false;
        };

        self.hw.configure_link(params);
        link.up = true;
        link.params = Some(params);
        println!("[GMAC] Link up: {}", params);
        true
    }

    // ========================================================================
    // Traffic
    // ========================================================================

    /// Queue packets on queue 0 and push as many as fit into the ring.
    ///
    /// `Ok(MacStatus::Pending)` means the ring is full; the rest go out on
    /// later [`Self::process`] calls.
    pub fn packet_tx(&self, packets: Vec<MacPacket>) -> Result<MacStatus, TxRejected> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TxRejected {
                error: MacError::NotOpen,
                packets,
            });
        }

        let mut tx = self.tx.lock();
        let Some(queue) = tx.queues.first_mut() else {
            return Err(TxRejected {
                error: MacError::NotReady,
                packets,
            });
        };

        let mut pending = packets.into_iter();
        while let Some(packet) = pending.next() {
            if let Err((error, packet)) = queue.enqueue(packet) {
                let mut rejected = Vec::with_capacity(pending.len() + 1);
                rejected.push(packet);
                rejected.extend(pending);
                return Err(TxRejected {
                    error,
                    packets: rejected,
                });
            }
        }

        let mut done = TxCompletions::new();
        let status = tx.send_and_reap(&self.hw, &mut done);
        drop(tx);
        acknowledge_all(done);
        Ok(status)
    }

    /// Reap TX completions, then push packets left pending.
    pub fn process(&self) -> Result<MacStatus, MacError> {
        let mut tx = self.tx.lock();
        let Some(queue) = tx.queues.first_mut() else {
            return Err(MacError::NotReady);
        };

        let mut done = TxCompletions::new();
        queue.ack_packets(&mut done);
        self.hw.clear_tx_complete();
        let outcome = queue.send_pending(&self.hw);
        tx.record(&done);
        let status = if outcome == TxOutcome::NoDescriptors {
            tx.stats.tx_queue_full += 1;
            MacStatus::Pending
        } else {
            MacStatus::Ok
        };

        drop(tx);
        acknowledge_all(done);
        Ok(status)
    }

    /// Next received frame on queue 0, or `None` if none is complete.
    pub fn packet_rx(&self) -> Result<Option<RxFrame>, MacError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(MacError::NotOpen);
        }

        let mut rx = self.rx.lock();
        let RxPath {
            alloc,
            queues,
            stats,
        } = &mut *rx;
        let Some(queue) = queues.first_mut() else {
            return Err(MacError::NotReady);
        };

        if self.hw.take_buffer_not_available() {
            stats.rx_buffer_not_available += 1;
        }

        let Some(span) = queue.search(alloc) else {
            return Ok(None);
        };
        let (mut packet, status) = match queue.take_frame(span, alloc) {
            Ok(frame) => frame,
            Err(e) => {
                stats.rx_error += 1;
                return Err(e);
            }
        };

        if packet.segments().len() > 1 {
            packet.flags.insert(PacketFlags::SPLIT);
        }
        packet.flags.insert(PacketFlags::QUEUED);
        packet.flags.remove(PacketFlags::CAST_MASK);
        if status.is_broadcast() {
            packet.flags.insert(PacketFlags::BROADCAST);
        } else if status.is_multicast_hash() {
            packet.flags.insert(PacketFlags::MULTICAST);
        } else if status.is_unicast_hash() {
            packet.flags.insert(PacketFlags::UNICAST);
        }

        if !packet.strip_mac_header() {
            stats.rx_error += 1;
            let _ = queue.ack_packet(packet, alloc);
            return Err(MacError::PacketError);
        }

        stats.rx_ok += 1;
        Ok(Some(RxFrame { packet, status }))
    }

    /// Return a packet delivered by [`Self::packet_rx`] to the buffer pool.
    pub fn rx_packet_ack(&self, mut packet: MacPacket) -> Result<(), MacError> {
        packet.flags.remove(PacketFlags::QUEUED);
        let mut rx = self.rx.lock();
        let RxPath { alloc, queues, .. } = &mut *rx;
        match queues.first_mut() {
            Some(queue) => queue.ack_packet(packet, alloc),
            None => {
                for segment in packet.into_segments() {
                    alloc.free_buffer(segment.into_buffer());
                }
                Err(MacError::NotReady)
            }
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn statistics(&self) -> Result<(RxStatistics, TxStatistics), MacError> {
        if self.status() == ModuleStatus::Uninitialized {
            return Err(MacError::NotReady);
        }
        let tx_stats = {
            let tx = self.tx.lock();
            let mut stats = tx.stats;
            stats.tx_pending_buffers = tx.queues.iter().map(|q| q.in_flight() as u32).sum();
            stats
        };
        let rx_stats = self.rx.lock().stats;
        Ok((rx_stats, tx_stats))
    }

    pub fn parameters(&self) -> Result<MacParameters, MacError> {
        let state = self.state.lock();
        if state.status != ModuleStatus::Ready {
            return Err(MacError::NotReady);
        }
        let link = self.link.lock().params;
        Ok(MacParameters {
            mac_address: self.hw.mac_address(),
            mtu: MTU,
            processes_rx: true,
            processes_tx: true,
            link,
        })
    }

    pub fn mac_address(&self) -> MacAddress {
        self.hw.mac_address()
    }

    pub fn set_mac_address(&self, mac: MacAddress) {
        let mut state = self.state.lock();
        self.hw.set_mac_address(mac);
        state.config.mac_address = mac;
    }

    /// Accept frames whose destination hashes like `mac`. `None` (or the
    /// zero address) clears the whole hash filter.
    pub fn rx_filter_hash_set(&self, mac: Option<MacAddress>) {
        let _state = self.state.lock();
        match mac {
            Some(mac) if !mac.is_zero() => {
                let hash = self.hw.hash() | 1u64 << regs::hash_index(&mac);
                self.hw.set_hash(hash);
            }
            _ => self.hw.set_hash(0),
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn set_event_notify(&self, notify: Option<EventNotifyFn>, param: usize) {
        self.events
            .lock()
            .set_notify(notify.map(|notify| (notify, param)));
    }

    pub fn event_mask_set(&self, events: MacEvents, enable: bool) {
        self.events.lock().mask_set(&self.hw, events, enable);
    }

    /// Clear pending events and unmask their sources. False when no events
    /// are enabled.
    pub fn event_acknowledge(&self, events: MacEvents) -> bool {
        self.events.lock().acknowledge(&self.hw, events)
    }

    pub fn event_pending(&self) -> MacEvents {
        self.events.lock().pending()
    }

    /// MAC interrupt entry point.
    pub fn interrupt(&self) {
        let status = self.hw.take_interrupt_status();
        let notify = self.events.lock().latch(&self.hw, status);
        if let Some((notify, param, events)) = notify {
            notify(events, param);
        }
    }

    /// TX queue 0 can accept another packet.
    pub fn tx_ready(&self) -> bool {
        self.tx
            .lock()
            .queues
            .first()
            .is_some_and(|q| q.free_nodes() > 0)
    }
}
