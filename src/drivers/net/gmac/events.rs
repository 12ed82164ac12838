//! MAC event notification
//!
//! The stack enables the events it cares about, the MAC interrupt latches
//! them as pending and masks their sources, and the stack acknowledges them
//! once it has done the work. Acknowledging unmasks the sources again, so an
//! event source interrupts at most once per acknowledgment.
//!
//! | Event | Interrupt source |
//! |-------|------------------|
//! | `TX_DONE` | TCOMP |
//! | `RX_DONE` | RCOMP |
//! | `RX_OVERFLOW` | ROVR |
//! | `TX_BUS_ERROR` | TFC |
//! | `TX_ABORT` | TUR |
//! | `RX_BUFFER_NA` | RXUBR |

use super::regs::{GmacHw, INT_RCOMP, INT_ROVR, INT_RXUBR, INT_TCOMP, INT_TFC, INT_TUR};
use core::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacEvents(u32);

impl MacEvents {
    pub const NONE: MacEvents = MacEvents(0);
    pub const TX_DONE: MacEvents = MacEvents(1 << 0);
    pub const RX_DONE: MacEvents = MacEvents(1 << 1);
    pub const RX_OVERFLOW: MacEvents = MacEvents(1 << 2);
    pub const TX_BUS_ERROR: MacEvents = MacEvents(1 << 3);
    pub const TX_ABORT: MacEvents = MacEvents(1 << 4);
    pub const RX_BUFFER_NA: MacEvents = MacEvents(1 << 5);
    pub const ALL: MacEvents = MacEvents(0x3F);

    const SOURCES: [(MacEvents, u32); 6] = [
        (Self::TX_DONE, INT_TCOMP),
        (Self::RX_DONE, INT_RCOMP),
        (Self::RX_OVERFLOW, INT_ROVR),
        (Self::TX_BUS_ERROR, INT_TFC),
        (Self::TX_ABORT, INT_TUR),
        (Self::RX_BUFFER_NA, INT_RXUBR),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        MacEvents(bits & Self::ALL.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: MacEvents) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersection(self, other: MacEvents) -> MacEvents {
        MacEvents(self.0 & other.0)
    }

    pub fn insert(&mut self, other: MacEvents) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: MacEvents) {
        self.0 &= !other.0;
    }

    /// Interrupt sources behind these events
    pub fn to_interrupts(self) -> u32 {
        Self::SOURCES
            .iter()
            .filter(|(event, _)| self.contains(*event))
            .fold(0, |bits, (_, source)| bits | source)
    }

    /// Events raised by an interrupt status word
    pub fn from_interrupts(status: u32) -> Self {
        Self::SOURCES
            .iter()
            .filter(|(_, source)| status & source != 0)
            .fold(Self::NONE, |events, (event, _)| events | *event)
    }
}

impl BitOr for MacEvents {
    type Output = MacEvents;

    fn bitor(self, rhs: MacEvents) -> MacEvents {
        MacEvents(self.0 | rhs.0)
    }
}

/// Event notification; receives every pending event and the registered
/// parameter. Runs in interrupt context.
pub type EventNotifyFn = fn(MacEvents, usize);

#[derive(Default)]
pub(crate) struct EventState {
    enabled: MacEvents,
    pending: MacEvents,
    notify: Option<(EventNotifyFn, usize)>,
}

impl EventState {
    pub fn pending(&self) -> MacEvents {
        self.pending
    }

    pub fn set_notify(&mut self, notify: Option<(EventNotifyFn, usize)>) {
        self.notify = notify;
    }

    pub fn mask_set<H: GmacHw + ?Sized>(&mut self, hw: &H, events: MacEvents, enable: bool) {
        let events = events.intersection(MacEvents::ALL);
        if enable {
            self.enabled.insert(events);
            let mut arm = events;
            arm.remove(self.pending);
            if !arm.is_empty() {
                hw.enable_interrupts(arm.to_interrupts());
            }
        } else {
            self.enabled.remove(events);
            self.pending.remove(events);
            hw.disable_interrupts(events.to_interrupts());
        }
    }

    pub fn acknowledge<H: GmacHw + ?Sized>(&mut self, hw: &H, events: MacEvents) -> bool {
        if self.enabled.is_empty() {
            return false;
        }
        self.pending.remove(events);
        let rearm = events.intersection(self.enabled);
        if !rearm.is_empty() {
            hw.enable_interrupts(rearm.to_interrupts());
        }
        true
    }

    /// Latch the enabled events in `status` and mask their sources.
    /// Returns the notification to run once the lock is released.
    pub fn latch<H: GmacHw + ?Sized>(
        &mut self,
        hw: &H,
        status: u32,
    ) -> Option<(EventNotifyFn, usize, MacEvents)> {
        let raised = MacEvents::from_interrupts(status).intersection(self.enabled);
        if raised.is_empty() {
            return None;
        }
        self.pending.insert(raised);
        hw.disable_interrupts(raised.to_interrupts());
        self.notify
            .map(|(notify, param)| (notify, param, self.pending))
    }

    pub fn clear(&mut self) {
        self.enabled = MacEvents::NONE;
        self.pending = MacEvents::NONE;
    }
}
