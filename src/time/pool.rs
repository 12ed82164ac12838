//! Fixed-size pool of software timer slots and generation-checked handles.

use super::TimeError;
use core::fmt;

/// Timer expiry callback; receives the context given at creation.
pub type TimerCallback = fn(usize);

/// Tokens run 1..TOKEN_MAX and then wrap back to 1.
const TOKEN_MAX: u16 = 0xFFFF;
const INDEX_MASK: u32 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once. With a callback the slot is released after it fires.
    Single,
    /// Reloaded with its period every time it fires.
    Periodic,
}

/// Handle to a timer slot: `token << 16 | index`.
///
/// The token changes every time a slot is handed out, so a handle kept past
/// `destroy` stops resolving even after the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u32);

impl TimerHandle {
    pub const INVALID: TimerHandle = TimerHandle(u32::MAX);

    const fn new(token: u16, index: u16) -> Self {
        Self(((token as u32) << 16) | index as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    pub const fn token(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0 && self.0 != 0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// One software timer.
#[derive(Debug, Clone, Copy)]
pub struct TimerSlot {
    pub in_use: bool,
    /// Linked into the active list (or, for periodic timers, between expiry
    /// and reload).
    pub active: bool,
    pub kind: TimerKind,
    /// Period in counter ticks.
    pub requested: u32,
    /// Ticks remaining after the timer in front of this one expires.
    pub pending: u32,
    pub callback: Option<TimerCallback>,
    pub context: usize,
    /// Set on expiry, cleared when polled.
    pub elapsed_flag: bool,
    /// Set on expiry, cleared once a periodic timer has been re-queued.
    pub elapsed_transient: bool,
    pub next: Option<u16>,
    pub handle: TimerHandle,
}

impl TimerSlot {
    pub const EMPTY: TimerSlot = TimerSlot {
        in_use: false,
        active: false,
        kind: TimerKind::Single,
        requested: 0,
        pending: 0,
        callback: None,
        context: 0,
        elapsed_flag: false,
        elapsed_transient: false,
        next: None,
        handle: TimerHandle::INVALID,
    };

    pub fn clear_elapsed(&mut self) {
        self.elapsed_flag = false;
        self.elapsed_transient = false;
    }
}

pub struct TimerPool<const N: usize> {
    slots: [TimerSlot; N],
    token: u16,
}

impl<const N: usize> TimerPool<N> {
    pub const fn new() -> Self {
        Self {
            slots: [TimerSlot::EMPTY; N],
            token: 1,
        }
    }

    /// Claim a free slot for a timer that has `count` of its `period`
    /// ticks already behind it.
    pub fn allocate(
        &mut self,
        count: u32,
        period: u32,
        callback: Option<TimerCallback>,
        context: usize,
        kind: TimerKind,
    ) -> Result<TimerHandle, TimeError> {
        if period == 0 || period < count {
            return Err(TimeError::InvalidPeriod);
        }

        let index = self
            .slots
            .iter()
            .position(|slot| !slot.in_use)
            .ok_or(TimeError::NoFreeSlot)?;

        let handle = TimerHandle::new(self.token, index as u16);
        self.token = next_token(self.token);

        self.slots[index] = TimerSlot {
            in_use: true,
            active: false,
            kind,
            requested: period,
            pending: period - count,
            callback,
            context,
            elapsed_flag: false,
            elapsed_transient: false,
            next: None,
            handle,
        };
        Ok(handle)
    }

    /// Slot index for a live handle.
    pub fn resolve(&self, handle: TimerHandle) -> Result<usize, TimeError> {
        if !handle.is_valid() {
            return Err(TimeError::InvalidHandle);
        }
        let index = handle.index();
        match self.slots.get(index) {
            Some(slot) if slot.in_use && slot.handle == handle => Ok(index),
            _ => Err(TimeError::InvalidHandle),
        }
    }

    pub fn slots(&self) -> &[TimerSlot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [TimerSlot] {
        &mut self.slots
    }

    pub fn slot(&self, index: usize) -> &TimerSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut TimerSlot {
        &mut self.slots[index]
    }

    /// Number of slots currently handed out.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }

    /// Drop every slot; the token sequence restarts.
    pub fn reset(&mut self) {
        self.slots = [TimerSlot::EMPTY; N];
        self.token = 1;
    }
}

impl<const N: usize> Default for TimerPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn next_token(token: u16) -> u16 {
    let next = token.wrapping_add(1);
    if next >= TOKEN_MAX || next == 0 { 1 } else { next }
}
