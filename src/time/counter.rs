//! Hardware counter bookkeeping: elapsed ticks across wraparound, the 64-bit
//! software counter, compare-value selection and tick/time conversions.

/// Snapshot of the hardware counter as last seen by the timer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    /// Counter value at the last list update.
    pub previous: u32,
    /// Counter value read at the start of the current update.
    pub current: u32,
    /// Last value written to the compare register.
    pub compare: u32,
    /// Minimum lead time between "now" and a programmed compare value.
    pub margin: u32,
    /// Counter wrap modulus (all ones for the counter width).
    pub period: u32,
    pub sw_low: u32,
    pub sw_high: u32,
}

impl CounterState {
    /// State for a counter `width_bits` wide (1..=32).
    pub const fn new(width_bits: u32) -> Self {
        let period = period_for_width(width_bits);
        Self {
            previous: 0,
            current: 0,
            compare: period >> 1,
            margin: 2,
            period,
            sw_low: 0,
            sw_high: 0,
        }
    }

    pub const fn half_period(&self) -> u32 {
        self.period >> 1
    }

    /// Ticks between `previous` and `current`.
    ///
    /// A current value that is not strictly ahead of `previous` is taken as
    /// one wrap of the counter: `period - previous + current + 1`.
    pub fn elapsed(&self, current: u32) -> u32 {
        if current > self.previous {
            current - self.previous
        } else {
            (self.period - self.previous)
                .wrapping_add(current)
                .wrapping_add(1)
        }
    }

    /// Ticks since the last update as the timer service counts them.
    ///
    /// The compare interrupt fires at least every half period, so an
    /// unchanged reading means no time has passed rather than a full wrap.
    pub fn since_update(&self, current: u32) -> u32 {
        if current == self.previous {
            0
        } else {
            self.elapsed(current)
        }
    }

    /// Low word after adding `elapsed`, and whether it carried.
    pub fn counter32_with(&self, elapsed: u32) -> (u32, bool) {
        self.sw_low.overflowing_add(elapsed)
    }

    pub fn counter64_update(&mut self, elapsed: u32) {
        let (low, carried) = self.counter32_with(elapsed);
        self.sw_low = low;
        if carried {
            self.sw_high = self.sw_high.wrapping_add(1);
        }
    }

    /// 64-bit software counter as it would read after adding `elapsed`.
    pub fn counter64_with(&self, elapsed: u32) -> u64 {
        let (low, carried) = self.counter32_with(elapsed);
        let high = self.sw_high as u64 + carried as u64;
        (high << 32) + low as u64
    }

    pub fn counter_set(&mut self, count: u32) {
        self.sw_low = count;
        self.sw_high = 0;
    }

    /// Choose the next compare value and record it.
    ///
    /// `head_pending` is the relative delay of the first queued timer, `now`
    /// a fresh counter read. The value fires after the head timer but never
    /// more than half a period out, never closer to `now` than `margin`, and
    /// never on zero.
    pub fn next_compare(&mut self, head_pending: Option<u32>, now: u32) -> u32 {
        self.previous = self.current;

        let lead = match head_pending {
            Some(pending) if pending <= self.half_period() => pending,
            _ => self.half_period(),
        };
        let next = self.current as u64 + lead as u64;

        let mut now = now as u64;
        if now < self.previous as u64 {
            // Rolled over since `current` was sampled
            now += self.period as u64;
        }

        let earliest = now + self.margin as u64;
        let mut compare = if next < earliest { earliest } else { next };

        if compare & self.period as u64 == 0 {
            compare = 1;
        }

        self.compare = (compare & self.period as u64) as u32;
        self.compare
    }
}

/// Counter wrap modulus for a counter `width_bits` wide.
pub const fn period_for_width(width_bits: u32) -> u32 {
    if width_bits == 0 || width_bits >= 32 {
        u32::MAX
    } else {
        (1u32 << width_bits) - 1
    }
}

/// Minimum compare lead in counter ticks.
///
/// `update_cycles` is the worst-case CPU cycle count between reading the
/// counter and writing the compare register.
pub fn compare_margin(cpu_clock_hz: u32, counter_hz: u32, update_cycles: u32) -> u32 {
    let cycles_per_tick = if counter_hz == 0 {
        1
    } else {
        (cpu_clock_hz / counter_hz).max(1)
    };
    update_cycles / cycles_per_tick + 2
}

pub fn count_to_us(count: u32, frequency: u32) -> u32 {
    scale(count, 1_000_000, frequency)
}

pub fn count_to_ms(count: u32, frequency: u32) -> u32 {
    scale(count, 1_000, frequency)
}

pub fn us_to_count(us: u32, frequency: u32) -> u32 {
    scale(us, frequency, 1_000_000)
}

pub fn ms_to_count(ms: u32, frequency: u32) -> u32 {
    scale(ms, frequency, 1_000)
}

/// `value * mul / div`, truncated, saturating at `u32::MAX`.
fn scale(value: u32, mul: u32, div: u32) -> u32 {
    if div == 0 {
        return 0;
    }
    let wide = value as u64 * mul as u64 / div as u64;
    u32::try_from(wide).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_without_wrap() {
        let mut c = CounterState::new(32);
        c.previous = 100;
        assert_eq!(c.elapsed(140), 40);
    }

    #[test]
    fn elapsed_across_wrap_boundaries() {
        let mut c = CounterState::new(16);
        let period = c.period;
        assert_eq!(period, 0xFFFF);

        c.previous = period - 1;
        assert_eq!(c.elapsed(0), 2);

        c.previous = period;
        assert_eq!(c.elapsed(period), period + 1);

        c.previous = 0xFFF0;
        assert_eq!(c.elapsed(0x10), 0x20);
    }

    #[test]
    fn elapsed_full_width_wraps_like_hardware() {
        let mut c = CounterState::new(32);
        c.previous = u32::MAX - 4;
        assert_eq!(c.elapsed(5), 10);
    }

    #[test]
    fn unchanged_reading_is_no_time() {
        let mut c = CounterState::new(16);
        c.previous = 0x1234;
        assert_eq!(c.since_update(0x1234), 0);
        assert_eq!(c.since_update(0x1230), 0xFFFD);
        assert_eq!(c.since_update(0x1240), 0x0C);
    }

    #[test]
    fn counter64_carries_into_high_word() {
        let mut c = CounterState::new(32);
        c.sw_low = u32::MAX - 9;
        assert_eq!(c.counter64_with(20), (1u64 << 32) + 10);
        c.counter64_update(20);
        assert_eq!((c.sw_high, c.sw_low), (1, 10));

        c.counter_set(7);
        assert_eq!((c.sw_high, c.sw_low), (0, 7));
    }

    #[test]
    fn compare_tracks_head_timer() {
        let mut c = CounterState::new(32);
        c.margin = 6;
        c.current = 1000;
        assert_eq!(c.next_compare(Some(100), 1001), 1100);
        assert_eq!(c.previous, 1000);
    }

    #[test]
    fn compare_capped_at_half_period() {
        let mut c = CounterState::new(16);
        c.margin = 6;
        c.current = 10;
        assert_eq!(c.next_compare(Some(60_000), 10), 10 + 0x7FFF);
        assert_eq!(c.next_compare(None, 10), 10 + 0x7FFF);
    }

    #[test]
    fn compare_pushed_out_by_margin() {
        let mut c = CounterState::new(32);
        c.margin = 6;
        c.current = 1000;
        // Head due in 3 ticks but 2 have already passed while updating
        assert_eq!(c.next_compare(Some(3), 1002), 1008);
    }

    #[test]
    fn compare_never_zero() {
        let mut c = CounterState::new(16);
        c.margin = 2;
        c.current = 0xFFFF - 9;
        // 0xFFF6 + 10 lands exactly on the wrap point
        assert_eq!(c.next_compare(Some(10), 0xFFF6), 1);
    }

    #[test]
    fn compare_handles_rollover_during_update() {
        let mut c = CounterState::new(16);
        c.margin = 4;
        c.current = 0xFFF0;
        // Counter wrapped to 0x0002 before the compare was computed
        let compare = c.next_compare(Some(5), 0x0002);
        assert_eq!(compare, (0xFFFF + 0x0002 + 4) & 0xFFFF);
    }

    #[test]
    fn margin_from_cycle_budget() {
        assert_eq!(compare_margin(200_000_000, 1_000_000, 900), 6);
        assert_eq!(compare_margin(1_000, 1_000_000, 900), 902);
        assert_eq!(compare_margin(1_000, 0, 10), 12);
    }

    #[test]
    fn conversions_truncate() {
        assert_eq!(count_to_us(3, 32_768), 91);
        assert_eq!(count_to_ms(32_767, 32_768), 999);
        assert_eq!(us_to_count(1_000, 32_768), 32);
        assert_eq!(ms_to_count(10, 32_768), 327);
        assert_eq!(us_to_count(5, 0), 0);
    }

    #[test]
    fn conversions_round_trip_within_one_tick() {
        // Tick-or-coarser counters: one microsecond never spans two ticks
        for &freq in &[1_000_000u32, 100_000, 32_768, 3] {
            let tick_us = 1_000_000 / freq + 1;
            let step = (freq / 997).max(1);
            let mut x = 0u32;
            while x <= freq {
                let back = count_to_us(us_to_count(x, freq), freq);
                assert!(x - back <= tick_us, "freq {} us {} back {}", freq, x, back);

                let counts = us_to_count(count_to_us(x, freq), freq);
                assert!(x - counts <= 1, "freq {} count {} back {}", freq, x, counts);
                x += step;
            }
        }
    }
}
