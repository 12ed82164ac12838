//! Ordered list of active timers, stored as deltas.
//!
//! Each linked slot's `pending` is the number of ticks between the expiry of
//! the timer in front of it and its own. The absolute time remaining for a
//! timer is therefore the sum of `pending` from the head up to and including
//! that timer. Advancing time only touches the front of the list.
//!
//! Links are slot indices into the pool, so the list never allocates.

use super::pool::TimerSlot;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerList {
    head: Option<u16>,
}

impl TimerList {
    pub const fn new() -> Self {
        Self { head: None }
    }

    pub fn head(&self) -> Option<usize> {
        self.head.map(usize::from)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn clear(&mut self) {
        self.head = None;
    }

    /// Link `index` in deadline order, taking its current `pending` as the
    /// absolute delay. Timers with equal deadlines keep insertion order.
    ///
    /// Returns true if the new timer became the head.
    pub fn insert(&mut self, slots: &mut [TimerSlot], index: usize) -> bool {
        debug_assert!(!self.contains(slots, index));

        let delay = slots[index].pending;
        let mut total: u64 = 0;
        let mut prev: Option<usize> = None;
        let mut cursor = self.head();

        while let Some(i) = cursor {
            let pending = slots[i].pending as u64;
            if total + pending > delay as u64 {
                break;
            }
            total += pending;
            prev = Some(i);
            cursor = slots[i].next.map(usize::from);
        }

        slots[index].next = cursor.map(|i| i as u16);
        let head_changed = match prev {
            None => {
                self.head = Some(index as u16);
                true
            }
            Some(p) => {
                slots[p].next = Some(index as u16);
                false
            }
        };

        // total <= delay, so the difference fits
        let relative = delay - total as u32;
        slots[index].pending = relative;
        if let Some(next) = cursor {
            slots[next].pending -= relative;
        }

        head_changed
    }

    /// Unlink `index`, handing its remaining delta to its successor.
    ///
    /// Returns true if the head changed. A timer that is not linked leaves
    /// the list untouched.
    pub fn remove(&mut self, slots: &mut [TimerSlot], index: usize) -> bool {
        let mut prev: Option<usize> = None;
        let mut cursor = self.head();

        while let Some(i) = cursor {
            if i == index {
                break;
            }
            prev = Some(i);
            cursor = slots[i].next.map(usize::from);
        }

        if cursor.is_none() {
            return false;
        }

        let next = slots[index].next;
        if let Some(n) = next {
            let pending = slots[index].pending;
            let successor = &mut slots[usize::from(n)];
            successor.pending = successor.pending.saturating_add(pending);
        }
        slots[index].next = None;

        match prev {
            None => {
                self.head = next;
                true
            }
            Some(p) => {
                slots[p].next = next;
                false
            }
        }
    }

    /// Consume `elapsed` ticks from the front of the list.
    ///
    /// Timers whose delta is used up are left at zero; ticks beyond the last
    /// expired timer carry on to the next one until the budget is spent.
    pub fn advance(&self, slots: &mut [TimerSlot], mut elapsed: u32) {
        let mut cursor = self.head();
        while let Some(i) = cursor {
            if elapsed == 0 {
                break;
            }
            let slot = &mut slots[i];
            if slot.pending >= elapsed {
                slot.pending -= elapsed;
                elapsed = 0;
            } else {
                elapsed -= slot.pending;
                slot.pending = 0;
            }
            cursor = slot.next.map(usize::from);
        }
    }

    /// Delta of the first timer in the list.
    pub fn head_pending(&self, slots: &[TimerSlot]) -> Option<u32> {
        self.head().map(|i| slots[i].pending)
    }

    /// Absolute ticks remaining for `index`, or `None` if it is not linked.
    pub fn pending_through(&self, slots: &[TimerSlot], index: usize) -> Option<u32> {
        let mut total: u64 = 0;
        for i in self.iter(slots) {
            total += slots[i].pending as u64;
            if i == index {
                return Some(u32::try_from(total).unwrap_or(u32::MAX));
            }
        }
        None
    }

    pub fn contains(&self, slots: &[TimerSlot], index: usize) -> bool {
        self.iter(slots).any(|i| i == index)
    }

    /// Slot indices from head to tail.
    pub fn iter<'a>(&self, slots: &'a [TimerSlot]) -> Iter<'a> {
        Iter {
            slots,
            cursor: self.head(),
        }
    }
}

pub struct Iter<'a> {
    slots: &'a [TimerSlot],
    cursor: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.cursor?;
        self.cursor = self.slots[current].next.map(usize::from);
        Some(current)
    }
}
