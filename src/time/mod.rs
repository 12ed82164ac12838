//! Tickless software timer service.
//!
//! Any number of software timers (up to the pool size `N`) share a single
//! free-running hardware counter with one compare channel. Active timers sit
//! in a delta list ordered by deadline, and the compare register is always
//! programmed for the nearest deadline (or half a counter period, whichever
//! comes first), so the interrupt rate follows the timers rather than a fixed
//! tick.
//!
//! ## Contexts
//!
//! Timer operations may be called from thread code and from timer callbacks.
//! Callbacks run from [`SysTime::on_compare_match`], i.e. in the compare
//! interrupt. All state sits behind one IRQ-masking lock; the interrupt
//! handler releases it before invoking callbacks, so a callback can start,
//! stop, reload, create or destroy timers (including its own).
//!
//! ## Example
//!
//! ```ignore
//! static SYS_TIME: SysTime<SystemTimer> = SysTime::new();
//!
//! fn on_match(_status: u32, _context: usize) {
//!     SYS_TIME.on_compare_match();
//! }
//!
//! let counter = unsafe { SystemTimer::new(TIMER_BASE, ARM_CHANNEL) };
//! SYS_TIME.initialize(counter, SysTimeConfig::default(), on_match)?;
//!
//! let blink = SYS_TIME.callback_register_ms(Some(toggle_led), 0, 500, TimerKind::Periodic)?;
//! ```

pub mod counter;
pub mod list;
pub mod pool;

pub use counter::{
    compare_margin, count_to_ms, count_to_us, ms_to_count, us_to_count, CounterState,
};
pub use pool::{TimerCallback, TimerHandle, TimerKind};

use crate::drivers::clocksource::{CompareCallback, HwCounter};
use crate::println;
use crate::status::ModuleStatus;
use crate::sync::Mutex;
use core::fmt;
use list::TimerList;
use pool::{TimerPool, TimerSlot};

/// Timer slots per service unless a different `N` is chosen.
pub const DEFAULT_MAX_TIMERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeError {
    /// The service has not been initialized.
    NotReady,
    /// Counter width outside 1..=32 bits, or a counter reporting 0 Hz.
    InvalidConfig,
    /// Stale, malformed or out-of-range handle.
    InvalidHandle,
    /// Every timer slot is in use.
    NoFreeSlot,
    /// Period is zero or shorter than the initial count.
    InvalidPeriod,
    /// Single-shot timers need a callback.
    MissingCallback,
    /// Delay or callback duration of zero.
    ZeroDuration,
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeError::NotReady => write!(f, "timer service not initialized"),
            TimeError::InvalidConfig => write!(f, "invalid counter configuration"),
            TimeError::InvalidHandle => write!(f, "invalid timer handle"),
            TimeError::NoFreeSlot => write!(f, "no free timer slot"),
            TimeError::InvalidPeriod => write!(f, "invalid timer period"),
            TimeError::MissingCallback => write!(f, "single-shot timer without callback"),
            TimeError::ZeroDuration => write!(f, "zero duration"),
        }
    }
}

/// Static configuration of the timer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysTimeConfig {
    /// Width of the hardware counter in bits (1..=32).
    pub counter_width_bits: u32,
    /// CPU clock, used to turn `compare_update_cycles` into counter ticks.
    pub cpu_clock_hz: u32,
    /// Worst-case CPU cycles between reading the counter and writing the
    /// compare register.
    pub compare_update_cycles: u32,
    /// Program the counter's wrap modulus at initialization.
    pub program_period: bool,
}

impl SysTimeConfig {
    pub const DEFAULT: SysTimeConfig = SysTimeConfig {
        counter_width_bits: 32,
        cpu_clock_hz: 200_000_000,
        compare_update_cycles: 900,
        program_period: false,
    };
}

impl Default for SysTimeConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

struct State<C, const N: usize> {
    status: ModuleStatus,
    counter: Option<C>,
    frequency: u32,
    hw: CounterState,
    pool: TimerPool<N>,
    list: TimerList,
}

impl<C: HwCounter, const N: usize> State<C, N> {
    const fn new() -> Self {
        Self {
            status: ModuleStatus::Uninitialized,
            counter: None,
            frequency: 0,
            hw: CounterState::new(32),
            pool: TimerPool::new(),
            list: TimerList::new(),
        }
    }

    fn reset(&mut self) {
        self.status = ModuleStatus::Uninitialized;
        self.counter = None;
        self.frequency = 0;
        self.hw = CounterState::new(32);
        self.pool.reset();
        self.list.clear();
    }

    fn read_counter(&self) -> u32 {
        self.counter.as_ref().map_or(0, |counter| counter.counter_get())
    }

    /// Reprogram the compare register for the current head timer.
    fn compare_update(&mut self) {
        let head = self.list.head_pending(self.pool.slots());
        let now = self.read_counter();
        let compare = self.hw.next_compare(head, now);
        if let Some(counter) = self.counter.as_mut() {
            counter.compare_set(compare);
        }
    }

    /// Bring the list up to date with the hardware counter.
    fn catch_up(&mut self) {
        let current = self.read_counter();
        self.hw.current = current;
        let elapsed = self.hw.since_update(current);
        self.list.advance(self.pool.slots_mut(), elapsed);
        self.hw.previous = current;
        self.hw.counter64_update(elapsed);
    }

    /// Link a slot whose `pending` holds its delay from now.
    ///
    /// Inside the compare interrupt the list is already current and the
    /// handler reprograms the compare register on its way out, so only the
    /// insert is done there.
    fn timer_add(&mut self, index: usize, in_isr: bool) {
        if in_isr {
            self.list.insert(self.pool.slots_mut(), index);
            return;
        }

        self.catch_up();
        if self.list.insert(self.pool.slots_mut(), index) {
            self.compare_update();
        }
    }

    fn unlink(&mut self, index: usize) -> bool {
        self.list.remove(self.pool.slots_mut(), index)
    }

    fn destroy(&mut self, index: usize) {
        self.unlink(index);
        *self.pool.slot_mut(index) = TimerSlot::EMPTY;
    }

    /// Retire the head timer if it has come due and return its callback.
    ///
    /// Due timers without a callback (delays) are retired along the way.
    /// `None` once the head is not due. Called once per callback so that a
    /// timer stopped or destroyed by an earlier callback is never notified.
    fn take_due(&mut self) -> Option<(TimerCallback, usize)> {
        while let Some(head) = self.list.head() {
            let slot = *self.pool.slot(head);
            if slot.pending != 0 {
                return None;
            }

            match (slot.kind, slot.callback) {
                (TimerKind::Single, Some(_)) => {
                    self.destroy(head);
                }
                (kind, _) => {
                    self.unlink(head);
                    let slot = self.pool.slot_mut(head);
                    slot.elapsed_flag = true;
                    slot.elapsed_transient = true;
                    if kind == TimerKind::Single {
                        // Delay timers stay allocated until polled
                        slot.active = false;
                    }
                }
            }

            if let Some(callback) = slot.callback {
                return Some((callback, slot.context));
            }
        }
        None
    }

    /// Queue every periodic timer that expired in this pass for its next
    /// period.
    fn requeue_expired(&mut self) {
        for index in 0..N {
            let slot = self.pool.slot_mut(index);
            if !slot.elapsed_transient {
                continue;
            }
            slot.elapsed_transient = false;
            if slot.kind == TimerKind::Periodic {
                slot.pending = slot.requested;
                self.list.insert(self.pool.slots_mut(), index);
            }
        }
    }

    /// Ticks of `index`'s period already behind it.
    fn elapsed_of(&self, index: usize) -> u32 {
        let slot = self.pool.slot(index);
        let pending = match self.list.pending_through(self.pool.slots(), index) {
            Some(linked) => {
                let elapsed = self.hw.since_update(self.read_counter());
                linked.saturating_sub(elapsed)
            }
            // Stopped, or a delay that has already run out
            None => slot.pending,
        };
        slot.requested.saturating_sub(pending)
    }
}

/// The timer service. One instance per hardware counter, usually a `static`.
pub struct SysTime<C, const N: usize = DEFAULT_MAX_TIMERS> {
    state: Mutex<State<C, N>>,
}

impl<C: HwCounter, const N: usize> SysTime<C, N> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Take ownership of `counter` and start the service.
    ///
    /// `handler` is registered as the counter's compare callback; it must
    /// call [`on_compare_match`](Self::on_compare_match) on this instance.
    /// Initializing a running service stops its old counter and drops every
    /// timer.
    pub fn initialize(
        &self,
        mut counter: C,
        config: SysTimeConfig,
        handler: CompareCallback,
    ) -> Result<(), TimeError> {
        if config.counter_width_bits == 0 || config.counter_width_bits > 32 {
            return Err(TimeError::InvalidConfig);
        }
        let frequency = counter.frequency_get();
        if frequency == 0 {
            return Err(TimeError::InvalidConfig);
        }

        let mut hw = CounterState::new(config.counter_width_bits);
        hw.margin = compare_margin(
            config.cpu_clock_hz,
            frequency,
            config.compare_update_cycles,
        );

        let margin = hw.margin;
        {
            let mut state = self.state.lock();
            if let Some(mut old) = state.counter.take() {
                old.stop();
            }
            state.reset();

            counter.callback_set(handler, 0);
            if config.program_period {
                counter.period_set(hw.period);
            }
            counter.compare_set(hw.compare);
            counter.start();

            state.counter = Some(counter);
            state.frequency = frequency;
            state.hw = hw;
            state.status = ModuleStatus::Ready;
        }

        println!(
            "[SYS_TIME] Initialized: {} Hz, {}-bit counter, {} timers, margin {} ticks",
            frequency, config.counter_width_bits, N, margin
        );
        Ok(())
    }

    /// Stop the counter, drop every timer and hand the counter back.
    pub fn deinitialize(&self) -> Option<C> {
        let counter = {
            let mut state = self.state.lock();
            let mut counter = state.counter.take();
            if let Some(counter) = counter.as_mut() {
                counter.stop();
            }
            state.reset();
            counter
        };

        if counter.is_some() {
            println!("[SYS_TIME] Deinitialized");
        }
        counter
    }

    pub fn status(&self) -> ModuleStatus {
        self.state.lock().status
    }

    /// Counter frequency in Hz (0 before initialization).
    pub fn frequency(&self) -> u32 {
        self.state.lock().frequency
    }

    // ========================================================================
    // Free-running counter
    // ========================================================================

    /// 64-bit tick count since initialization (or the last `counter_set`).
    pub fn counter64(&self) -> u64 {
        let state = self.state.lock();
        let elapsed = state.hw.since_update(state.read_counter());
        state.hw.counter64_with(elapsed)
    }

    /// Low 32 bits of [`counter64`](Self::counter64).
    pub fn counter(&self) -> u32 {
        self.counter64() as u32
    }

    pub fn counter_set(&self, count: u32) {
        self.state.lock().hw.counter_set(count);
    }

    pub fn count_to_us(&self, count: u32) -> u32 {
        count_to_us(count, self.frequency())
    }

    pub fn count_to_ms(&self, count: u32) -> u32 {
        count_to_ms(count, self.frequency())
    }

    pub fn us_to_count(&self, us: u32) -> u32 {
        us_to_count(us, self.frequency())
    }

    pub fn ms_to_count(&self, ms: u32) -> u32 {
        ms_to_count(ms, self.frequency())
    }

    // ========================================================================
    // Software timers
    // ========================================================================

    /// Allocate a stopped timer.
    ///
    /// `count` ticks of the first period are treated as already elapsed.
    /// Single-shot timers must have a callback; use the delay helpers for a
    /// polled one-off.
    pub fn timer_create(
        &self,
        count: u32,
        period: u32,
        callback: Option<TimerCallback>,
        context: usize,
        kind: TimerKind,
    ) -> Result<TimerHandle, TimeError> {
        if kind == TimerKind::Single && callback.is_none() {
            return Err(TimeError::MissingCallback);
        }
        self.create_object(count, period, callback, context, kind)
    }

    fn create_object(
        &self,
        count: u32,
        period: u32,
        callback: Option<TimerCallback>,
        context: usize,
        kind: TimerKind,
    ) -> Result<TimerHandle, TimeError> {
        let mut state = self.state.lock();
        if !state.status.is_ready() {
            return Err(TimeError::NotReady);
        }
        state.pool.allocate(count, period, callback, context, kind)
    }

    /// Replace a timer's parameters and (re)start it.
    pub fn timer_reload(
        &self,
        handle: TimerHandle,
        count: u32,
        period: u32,
        callback: Option<TimerCallback>,
        context: usize,
        kind: TimerKind,
    ) -> Result<(), TimeError> {
        if kind == TimerKind::Single && callback.is_none() {
            return Err(TimeError::MissingCallback);
        }

        let in_isr = self.state.in_isr();
        let mut state = self.state.lock();
        let index = state.pool.resolve(handle)?;
        if period == 0 || period < count {
            return Err(TimeError::InvalidPeriod);
        }

        state.unlink(index);
        {
            let slot = state.pool.slot_mut(index);
            slot.clear_elapsed();
            slot.kind = kind;
            slot.requested = period;
            slot.pending = period - count;
            slot.callback = callback;
            slot.context = context;
        }
        state.timer_add(index, in_isr);
        state.pool.slot_mut(index).active = true;
        Ok(())
    }

    /// Release a timer, stopping it first if needed.
    pub fn timer_destroy(&self, handle: TimerHandle) -> Result<(), TimeError> {
        let mut state = self.state.lock();
        let index = state.pool.resolve(handle)?;
        state.destroy(index);
        Ok(())
    }

    /// Start a stopped timer. Starting an active timer does nothing.
    pub fn timer_start(&self, handle: TimerHandle) -> Result<(), TimeError> {
        let in_isr = self.state.in_isr();
        let mut state = self.state.lock();
        let index = state.pool.resolve(handle)?;

        if state.pool.slot(index).active {
            return Ok(());
        }

        {
            // A single-shot timer restarted from its own callback has run out
            let slot = state.pool.slot_mut(index);
            if slot.pending == 0 {
                slot.pending = slot.requested;
            }
        }
        state.timer_add(index, in_isr);

        let slot = state.pool.slot_mut(index);
        slot.clear_elapsed();
        slot.active = true;
        Ok(())
    }

    /// Stop a timer. The next start runs a full period. Stopping a stopped
    /// timer does nothing.
    pub fn timer_stop(&self, handle: TimerHandle) -> Result<(), TimeError> {
        let mut state = self.state.lock();
        let index = state.pool.resolve(handle)?;

        if !state.pool.slot(index).active {
            return Ok(());
        }

        state.unlink(index);
        let slot = state.pool.slot_mut(index);
        slot.clear_elapsed();
        slot.active = false;
        slot.pending = slot.requested;
        Ok(())
    }

    /// Ticks of the current period that have elapsed.
    pub fn timer_counter_get(&self, handle: TimerHandle) -> Result<u32, TimeError> {
        let state = self.state.lock();
        let index = state.pool.resolve(handle)?;
        Ok(state.elapsed_of(index))
    }

    /// True once per expiry: reading clears the flag.
    pub fn timer_period_has_expired(&self, handle: TimerHandle) -> bool {
        let mut state = self.state.lock();
        match state.pool.resolve(handle) {
            Ok(index) => {
                let slot = state.pool.slot_mut(index);
                let expired = slot.elapsed_flag;
                slot.elapsed_flag = false;
                expired
            }
            Err(_) => false,
        }
    }

    // ========================================================================
    // Delays and callbacks
    // ========================================================================

    /// Start a polled delay; check it with [`delay_is_complete`](Self::delay_is_complete).
    pub fn delay_us(&self, us: u32) -> Result<TimerHandle, TimeError> {
        if us == 0 {
            return Err(TimeError::ZeroDuration);
        }
        self.delay_counts(self.us_to_count(us))
    }

    pub fn delay_ms(&self, ms: u32) -> Result<TimerHandle, TimeError> {
        if ms == 0 {
            return Err(TimeError::ZeroDuration);
        }
        self.delay_counts(self.ms_to_count(ms))
    }

    fn delay_counts(&self, counts: u32) -> Result<TimerHandle, TimeError> {
        let handle = self.create_object(0, counts, None, 0, TimerKind::Single)?;
        self.timer_start(handle)?;
        Ok(handle)
    }

    /// True once the delay has run out. The delay's timer is released at
    /// that point and the handle becomes invalid.
    pub fn delay_is_complete(&self, handle: TimerHandle) -> bool {
        if !self.timer_period_has_expired(handle) {
            return false;
        }
        // Already resolved above; a concurrent destroy is harmless
        let _ = self.timer_destroy(handle);
        true
    }

    /// Create and start a timer firing `callback` after `us` microseconds
    /// (every `us` for periodic timers).
    pub fn callback_register_us(
        &self,
        callback: Option<TimerCallback>,
        context: usize,
        us: u32,
        kind: TimerKind,
    ) -> Result<TimerHandle, TimeError> {
        self.callback_register(callback, context, us, kind, us_to_count)
    }

    pub fn callback_register_ms(
        &self,
        callback: Option<TimerCallback>,
        context: usize,
        ms: u32,
        kind: TimerKind,
    ) -> Result<TimerHandle, TimeError> {
        self.callback_register(callback, context, ms, kind, ms_to_count)
    }

    fn callback_register(
        &self,
        callback: Option<TimerCallback>,
        context: usize,
        duration: u32,
        kind: TimerKind,
        to_count: fn(u32, u32) -> u32,
    ) -> Result<TimerHandle, TimeError> {
        if kind == TimerKind::Single && callback.is_none() {
            return Err(TimeError::MissingCallback);
        }
        if duration == 0 {
            return Err(TimeError::ZeroDuration);
        }

        let counts = to_count(duration, self.frequency());
        let handle = self.create_object(0, counts, callback, context, kind)?;
        self.timer_start(handle)?;
        Ok(handle)
    }

    // ========================================================================
    // Interrupt entry
    // ========================================================================

    /// Compare-match interrupt handler.
    ///
    /// Advances every timer by the ticks since the last update, runs the
    /// callbacks of those that came due (in deadline order, FIFO among equal
    /// deadlines) and programs the next compare value.
    pub fn on_compare_match(&self) {
        let _isr = self.state.enter_isr();

        {
            let mut state = self.state.lock();
            if !state.status.is_ready() {
                return;
            }

            let current = state.read_counter();
            state.hw.current = current;
            let elapsed = state.hw.since_update(current);
            if !state.list.is_empty() {
                let state = &mut *state;
                state.list.advance(state.pool.slots_mut(), elapsed);
                state.hw.previous = current;
            }
            state.hw.counter64_update(elapsed);
        }

        // The lock is dropped around each callback; the head is re-read
        // after every one
        loop {
            let next = {
                let mut state = self.state.lock();
                if !state.status.is_ready() {
                    return;
                }
                state.take_due()
            };
            let Some((callback, context)) = next else {
                break;
            };
            callback(context);
        }

        let mut state = self.state.lock();
        if state.status.is_ready() {
            state.requeue_expired();
            state.compare_update();
        }
    }
}

impl<C: HwCounter, const N: usize> Default for SysTime<C, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    struct SimInner {
        count: AtomicU32,
        compare: AtomicU32,
        period: AtomicU32,
        running: AtomicBool,
        frequency: u32,
        callback: StdMutex<Option<(CompareCallback, usize)>>,
    }

    /// Counter that only moves when the test says so.
    #[derive(Clone)]
    struct SimCounter(Arc<SimInner>);

    impl SimCounter {
        fn new(frequency: u32) -> Self {
            Self(Arc::new(SimInner {
                count: AtomicU32::new(0),
                compare: AtomicU32::new(0),
                period: AtomicU32::new(0),
                running: AtomicBool::new(false),
                frequency,
                callback: StdMutex::new(None),
            }))
        }

        fn set(&self, count: u32) {
            self.0.count.store(count, Ordering::SeqCst);
        }

        fn compare(&self) -> u32 {
            self.0.compare.load(Ordering::SeqCst)
        }

        fn running(&self) -> bool {
            self.0.running.load(Ordering::SeqCst)
        }

        /// Move to `count` and raise the compare interrupt.
        fn fire_at(&self, count: u32) {
            self.set(count);
            let registered = *self.0.callback.lock().unwrap();
            if let Some((callback, context)) = registered {
                callback(0, context);
            }
        }
    }

    impl HwCounter for SimCounter {
        fn counter_get(&self) -> u32 {
            self.0.count.load(Ordering::SeqCst)
        }

        fn compare_set(&mut self, value: u32) {
            self.0.compare.store(value, Ordering::SeqCst);
        }

        fn period_set(&mut self, value: u32) {
            self.0.period.store(value, Ordering::SeqCst);
        }

        fn frequency_get(&self) -> u32 {
            self.0.frequency
        }

        fn start(&mut self) {
            self.0.running.store(true, Ordering::SeqCst);
        }

        fn stop(&mut self) {
            self.0.running.store(false, Ordering::SeqCst);
        }

        fn callback_set(&mut self, callback: CompareCallback, context: usize) {
            *self.0.callback.lock().unwrap() = Some((callback, context));
        }
    }

    fn no_isr(_status: u32, _context: usize) {}

    fn service(frequency: u32) -> (SysTime<SimCounter, 4>, SimCounter) {
        let sim = SimCounter::new(frequency);
        let sys = SysTime::new();
        sys.initialize(sim.clone(), SysTimeConfig::default(), no_isr)
            .unwrap();
        (sys, sim)
    }

    fn tick(sys: &SysTime<SimCounter, 4>, sim: &SimCounter, count: u32) {
        sim.set(count);
        sys.on_compare_match();
    }

    /// Callback context: a leaked counter.
    fn hits() -> (&'static AtomicUsize, usize) {
        let hits: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));
        (hits, hits as *const AtomicUsize as usize)
    }

    fn bump(context: usize) {
        // SAFETY: context is always a leaked AtomicUsize from hits()
        let hits = unsafe { &*(context as *const AtomicUsize) };
        hits.fetch_add(1, Ordering::SeqCst);
    }

    fn noop(_: usize) {}

    #[test]
    fn initialize_programs_counter() {
        let sim = SimCounter::new(1_000_000);
        let sys: SysTime<SimCounter> = SysTime::new();
        let config = SysTimeConfig {
            counter_width_bits: 16,
            program_period: true,
            ..SysTimeConfig::default()
        };
        sys.initialize(sim.clone(), config, no_isr).unwrap();

        assert_eq!(sys.status(), ModuleStatus::Ready);
        assert_eq!(sys.frequency(), 1_000_000);
        assert!(sim.running());
        assert_eq!(sim.0.period.load(Ordering::SeqCst), 0xFFFF);
        assert_eq!(sim.compare(), 0x7FFF);
        assert!(sim.0.callback.lock().unwrap().is_some());
        assert_eq!(sys.state.lock().hw.margin, 6);
    }

    #[test]
    fn initialize_rejects_bad_config() {
        let sys: SysTime<SimCounter> = SysTime::new();
        let bad_width = SysTimeConfig {
            counter_width_bits: 0,
            ..SysTimeConfig::default()
        };
        assert_eq!(
            sys.initialize(SimCounter::new(1_000), bad_width, no_isr),
            Err(TimeError::InvalidConfig)
        );
        assert_eq!(
            sys.initialize(SimCounter::new(0), SysTimeConfig::default(), no_isr),
            Err(TimeError::InvalidConfig)
        );
        assert_eq!(sys.status(), ModuleStatus::Uninitialized);
    }

    #[test]
    fn operations_before_initialize_fail() {
        let sys: SysTime<SimCounter> = SysTime::new();
        assert_eq!(
            sys.timer_create(0, 10, None, 0, TimerKind::Periodic),
            Err(TimeError::NotReady)
        );
        assert_eq!(sys.delay_ms(5), Err(TimeError::NotReady));
        assert_eq!(
            sys.timer_start(TimerHandle::from_raw(0x0001_0000)),
            Err(TimeError::InvalidHandle)
        );
        assert_eq!(sys.counter64(), 0);
    }

    #[test]
    fn deinitialize_returns_stopped_counter() {
        let (sys, sim) = service(1_000_000);
        let handle = sys.timer_create(0, 10, None, 0, TimerKind::Periodic).unwrap();

        let counter = sys.deinitialize();
        assert!(counter.is_some());
        assert!(!sim.running());
        assert_eq!(sys.status(), ModuleStatus::Uninitialized);
        assert_eq!(sys.timer_start(handle), Err(TimeError::InvalidHandle));
        assert!(sys.deinitialize().is_none());
    }

    #[test]
    fn reinitialize_drops_timers() {
        let (sys, sim) = service(1_000_000);
        let handle = sys.timer_create(0, 10, None, 0, TimerKind::Periodic).unwrap();
        sys.timer_start(handle).unwrap();

        let fresh = SimCounter::new(32_768);
        sys.initialize(fresh.clone(), SysTimeConfig::default(), no_isr)
            .unwrap();

        assert!(!sim.running());
        assert!(fresh.running());
        assert_eq!(sys.frequency(), 32_768);
        assert_eq!(sys.timer_stop(handle), Err(TimeError::InvalidHandle));
        assert!(sys.state.lock().list.is_empty());
    }

    #[test]
    fn periodic_timer_drops_overshoot_on_reload() {
        let (sys, sim) = service(1_000_000);
        let (hits, ctx) = hits();
        let handle = sys
            .timer_create(0, 100, Some(bump), ctx, TimerKind::Periodic)
            .unwrap();
        sys.timer_start(handle).unwrap();
        assert_eq!(sim.compare(), 100);

        tick(&sys, &sim, 40);
        tick(&sys, &sim, 80);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!sys.timer_period_has_expired(handle));

        tick(&sys, &sim, 120);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(sys.timer_period_has_expired(handle));
        assert!(!sys.timer_period_has_expired(handle));

        // Reloaded to a full period from the notifying update
        {
            let state = sys.state.lock();
            let index = state.pool.resolve(handle).unwrap();
            assert_eq!(state.list.pending_through(state.pool.slots(), index), Some(100));
        }
        assert_eq!(sim.compare(), 220);
        assert_eq!(sys.timer_counter_get(handle), Ok(0));

        tick(&sys, &sim, 200);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tick(&sys, &sim, 220);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn periodic_timer_fires_every_period_when_ticks_land_on_deadline() {
        let (sys, sim) = service(1_000_000);
        let (hits, ctx) = hits();
        let handle = sys
            .timer_create(0, 100, Some(bump), ctx, TimerKind::Periodic)
            .unwrap();
        sys.timer_start(handle).unwrap();

        tick(&sys, &sim, 40);
        tick(&sys, &sim, 80);
        tick(&sys, &sim, 100);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sim.compare(), 200);

        tick(&sys, &sim, 160);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tick(&sys, &sim, 200);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(sys.counter64(), 200);
    }

    #[test]
    fn initial_count_shortens_first_period() {
        let (sys, sim) = service(1_000_000);
        let (hits, ctx) = hits();
        let handle = sys
            .timer_create(30, 100, Some(bump), ctx, TimerKind::Periodic)
            .unwrap();
        sys.timer_start(handle).unwrap();

        tick(&sys, &sim, 70);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tick(&sys, &sim, 170);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn single_shot_with_callback_is_released_after_firing() {
        let (sys, sim) = service(1_000_000);
        let (hits, ctx) = hits();
        let handle = sys
            .timer_create(0, 50, Some(bump), ctx, TimerKind::Single)
            .unwrap();
        sys.timer_start(handle).unwrap();

        tick(&sys, &sim, 50);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sys.timer_start(handle), Err(TimeError::InvalidHandle));
        assert_eq!(sys.state.lock().pool.in_use(), 0);

        tick(&sys, &sim, 150);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_shot_requires_callback() {
        let (sys, _sim) = service(1_000_000);
        assert_eq!(
            sys.timer_create(0, 10, None, 0, TimerKind::Single),
            Err(TimeError::MissingCallback)
        );
        let handle = sys.timer_create(0, 10, None, 0, TimerKind::Periodic).unwrap();
        assert_eq!(
            sys.timer_reload(handle, 0, 10, None, 0, TimerKind::Single),
            Err(TimeError::MissingCallback)
        );
        assert_eq!(
            sys.callback_register_ms(None, 0, 10, TimerKind::Single),
            Err(TimeError::MissingCallback)
        );
    }

    #[test]
    fn create_validates_period_and_pool() {
        let (sys, _sim) = service(1_000_000);
        assert_eq!(
            sys.timer_create(0, 0, Some(noop), 0, TimerKind::Periodic),
            Err(TimeError::InvalidPeriod)
        );
        assert_eq!(
            sys.timer_create(20, 10, Some(noop), 0, TimerKind::Periodic),
            Err(TimeError::InvalidPeriod)
        );
        for _ in 0..4 {
            sys.timer_create(0, 10, Some(noop), 0, TimerKind::Periodic)
                .unwrap();
        }
        assert_eq!(
            sys.timer_create(0, 10, Some(noop), 0, TimerKind::Periodic),
            Err(TimeError::NoFreeSlot)
        );
    }

    #[test]
    fn stale_handle_rejected_after_slot_reuse() {
        let (sys, _sim) = service(1_000_000);
        let old = sys.timer_create(0, 10, None, 0, TimerKind::Periodic).unwrap();
        sys.timer_destroy(old).unwrap();
        let new = sys.timer_create(0, 10, None, 0, TimerKind::Periodic).unwrap();

        assert_eq!(old.index(), new.index());
        assert_eq!(sys.timer_start(old), Err(TimeError::InvalidHandle));
        assert_eq!(sys.timer_destroy(old), Err(TimeError::InvalidHandle));
        assert!(sys.timer_start(new).is_ok());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (sys, sim) = service(1_000_000);
        let handle = sys.timer_create(0, 100, None, 0, TimerKind::Periodic).unwrap();

        sys.timer_stop(handle).unwrap();
        assert!(sys.state.lock().list.is_empty());

        sys.timer_start(handle).unwrap();
        sim.set(10);
        let before = sys.state.lock().list;
        sys.timer_start(handle).unwrap();
        assert_eq!(sys.state.lock().list, before);
        assert_eq!(sys.timer_counter_get(handle), Ok(10));

        sys.timer_stop(handle).unwrap();
        sys.timer_stop(handle).unwrap();
        assert!(sys.state.lock().list.is_empty());
    }

    #[test]
    fn stop_resets_to_full_period() {
        let (sys, sim) = service(1_000_000);
        let (hits, ctx) = hits();
        let handle = sys
            .timer_create(0, 100, Some(bump), ctx, TimerKind::Periodic)
            .unwrap();
        sys.timer_start(handle).unwrap();

        tick(&sys, &sim, 30);
        assert_eq!(sys.timer_counter_get(handle), Ok(30));
        sys.timer_stop(handle).unwrap();
        assert_eq!(sys.timer_counter_get(handle), Ok(0));

        sys.timer_start(handle).unwrap();
        assert_eq!(sim.compare(), 130);
        tick(&sys, &sim, 100);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tick(&sys, &sim, 130);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reload_replaces_period() {
        let (sys, sim) = service(1_000_000);
        let (hits, ctx) = hits();
        let handle = sys
            .timer_create(0, 100, Some(bump), ctx, TimerKind::Periodic)
            .unwrap();
        sys.timer_start(handle).unwrap();

        tick(&sys, &sim, 60);
        sys.timer_reload(handle, 0, 25, Some(bump), ctx, TimerKind::Periodic)
            .unwrap();
        assert_eq!(sim.compare(), 85);
        assert_eq!(
            sys.timer_reload(handle, 30, 25, Some(bump), ctx, TimerKind::Periodic),
            Err(TimeError::InvalidPeriod)
        );

        tick(&sys, &sim, 85);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn due_callbacks_run_in_deadline_order() {
        static ORDER: StdMutex<Vec<usize>> = StdMutex::new(Vec::new());
        fn record(context: usize) {
            ORDER.lock().unwrap().push(context);
        }

        let (sys, sim) = service(1_000_000);
        for (context, period) in [(1, 100), (2, 60), (3, 100)] {
            let handle = sys
                .timer_create(0, period, Some(record), context, TimerKind::Periodic)
                .unwrap();
            sys.timer_start(handle).unwrap();
        }

        tick(&sys, &sim, 100);
        assert_eq!(*ORDER.lock().unwrap(), vec![2, 1, 3]);
    }

    #[test]
    fn timer_counter_get_tracks_hardware_between_interrupts() {
        let (sys, sim) = service(1_000_000);
        let handle = sys.timer_create(0, 100, None, 0, TimerKind::Periodic).unwrap();
        sys.timer_start(handle).unwrap();

        sim.set(30);
        assert_eq!(sys.timer_counter_get(handle), Ok(30));
        tick(&sys, &sim, 45);
        sim.set(50);
        assert_eq!(sys.timer_counter_get(handle), Ok(50));
    }

    #[test]
    fn delay_completes_once_and_releases_slot() {
        let (sys, sim) = service(1_000_000);
        assert_eq!(sys.delay_us(0), Err(TimeError::ZeroDuration));

        let delay = sys.delay_us(100).unwrap();
        assert!(!sys.delay_is_complete(delay));

        tick(&sys, &sim, 99);
        assert!(!sys.delay_is_complete(delay));
        tick(&sys, &sim, 100);

        // Expired delays stay allocated but leave the list
        assert!(sys.state.lock().list.is_empty());
        assert_eq!(sys.timer_counter_get(delay), Ok(100));

        assert!(sys.delay_is_complete(delay));
        assert!(!sys.delay_is_complete(delay));
        assert_eq!(sys.state.lock().pool.in_use(), 0);
    }

    #[test]
    fn delay_ms_converts_with_counter_frequency() {
        let (sys, sim) = service(32_768);
        let delay = sys.delay_ms(10).unwrap();
        assert_eq!(sim.compare(), 327);
        tick(&sys, &sim, 327);
        assert!(sys.delay_is_complete(delay));
    }

    #[test]
    fn callback_register_starts_timer() {
        let (sys, sim) = service(1_000_000);
        let (hits, ctx) = hits();
        assert_eq!(
            sys.callback_register_us(Some(bump), ctx, 0, TimerKind::Periodic),
            Err(TimeError::ZeroDuration)
        );

        sys.callback_register_ms(Some(bump), ctx, 2, TimerKind::Periodic)
            .unwrap();
        tick(&sys, &sim, 2_000);
        tick(&sys, &sim, 4_000);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn counter64_accumulates_across_counter_wrap() {
        let sim = SimCounter::new(1_000_000);
        let sys: SysTime<SimCounter, 4> = SysTime::new();
        let config = SysTimeConfig {
            counter_width_bits: 16,
            ..SysTimeConfig::default()
        };
        sys.initialize(sim.clone(), config, no_isr).unwrap();

        tick(&sys, &sim, 0x8000);
        tick(&sys, &sim, 0xFFF0);
        tick(&sys, &sim, 0x0010);
        assert_eq!(sys.counter64(), 0x1_0010);

        sys.counter_set(5);
        assert_eq!(sys.counter(), 5);
    }

    #[test]
    fn timer_fires_across_counter_wrap() {
        let sim = SimCounter::new(1_000_000);
        let sys: SysTime<SimCounter, 4> = SysTime::new();
        let config = SysTimeConfig {
            counter_width_bits: 16,
            ..SysTimeConfig::default()
        };
        sys.initialize(sim.clone(), config, no_isr).unwrap();
        tick(&sys, &sim, 0xFFF0);

        let (hits, ctx) = hits();
        let handle = sys
            .timer_create(0, 0x40, Some(bump), ctx, TimerKind::Periodic)
            .unwrap();
        sys.timer_start(handle).unwrap();
        assert_eq!(sim.compare(), 0x30);

        tick(&sys, &sim, 0x30);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn conversions_use_counter_frequency() {
        let (sys, _sim) = service(32_768);
        assert_eq!(sys.count_to_ms(32_768), 1_000);
        assert_eq!(sys.count_to_us(1), 30);
        assert_eq!(sys.us_to_count(1_000_000), 32_768);
        assert_eq!(sys.ms_to_count(1), 32);
    }

    // Callbacks below run inside the compare interrupt and call back into
    // the service, so they need a service they can name.

    static REENTRANT: SysTime<SimCounter, 4> = SysTime::new();
    static PERIODIC: AtomicU32 = AtomicU32::new(u32::MAX);
    static FOLLOW_UPS: AtomicUsize = AtomicUsize::new(0);

    fn reentrant_isr(_status: u32, _context: usize) {
        REENTRANT.on_compare_match();
    }

    fn follow_up(_: usize) {
        FOLLOW_UPS.fetch_add(1, Ordering::SeqCst);
    }

    fn hand_off(_: usize) {
        let periodic = TimerHandle::from_raw(PERIODIC.load(Ordering::SeqCst));
        REENTRANT.timer_stop(periodic).unwrap();
        let next = REENTRANT
            .timer_create(0, 10, Some(follow_up), 0, TimerKind::Single)
            .unwrap();
        REENTRANT.timer_start(next).unwrap();
    }

    #[test]
    fn callbacks_may_reenter_the_service() {
        let sim = SimCounter::new(1_000_000);
        REENTRANT
            .initialize(sim.clone(), SysTimeConfig::default(), reentrant_isr)
            .unwrap();

        let periodic = REENTRANT
            .timer_create(0, 100, Some(hand_off), 0, TimerKind::Periodic)
            .unwrap();
        PERIODIC.store(periodic.raw(), Ordering::SeqCst);
        REENTRANT.timer_start(periodic).unwrap();

        sim.fire_at(100);
        assert_eq!(sim.compare(), 110);
        assert!(!REENTRANT.timer_period_has_expired(periodic));

        sim.fire_at(110);
        assert_eq!(FOLLOW_UPS.load(Ordering::SeqCst), 1);

        // Stopped from its own callback: not re-queued
        sim.fire_at(200);
        sim.fire_at(300);
        assert_eq!(FOLLOW_UPS.load(Ordering::SeqCst), 1);
        assert_eq!(REENTRANT.state.lock().pool.in_use(), 1);
        assert!(REENTRANT.state.lock().list.is_empty());
    }

    static SWEEPER: SysTime<SimCounter, 4> = SysTime::new();
    static DOOMED: AtomicU32 = AtomicU32::new(u32::MAX);
    static PAUSED: AtomicU32 = AtomicU32::new(u32::MAX);
    static SWEEPS: AtomicUsize = AtomicUsize::new(0);
    static DOOMED_HITS: AtomicUsize = AtomicUsize::new(0);
    static PAUSED_HITS: AtomicUsize = AtomicUsize::new(0);

    fn sweeper_isr(_status: u32, _context: usize) {
        SWEEPER.on_compare_match();
    }

    fn sweep(_: usize) {
        SWEEPS.fetch_add(1, Ordering::SeqCst);
        let _ = SWEEPER.timer_destroy(TimerHandle::from_raw(DOOMED.load(Ordering::SeqCst)));
        let _ = SWEEPER.timer_stop(TimerHandle::from_raw(PAUSED.load(Ordering::SeqCst)));
    }

    fn doomed(_: usize) {
        DOOMED_HITS.fetch_add(1, Ordering::SeqCst);
    }

    fn paused(_: usize) {
        PAUSED_HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn timers_removed_by_an_earlier_callback_do_not_fire() {
        let sim = SimCounter::new(1_000_000);
        SWEEPER
            .initialize(sim.clone(), SysTimeConfig::default(), sweeper_isr)
            .unwrap();

        // Equal deadlines run in creation order, so `sweep` goes first
        let first = SWEEPER
            .timer_create(0, 100, Some(sweep), 0, TimerKind::Periodic)
            .unwrap();
        let victim = SWEEPER
            .timer_create(0, 100, Some(doomed), 0, TimerKind::Periodic)
            .unwrap();
        let held = SWEEPER
            .timer_create(0, 100, Some(paused), 0, TimerKind::Periodic)
            .unwrap();
        DOOMED.store(victim.raw(), Ordering::SeqCst);
        PAUSED.store(held.raw(), Ordering::SeqCst);
        for handle in [first, victim, held] {
            SWEEPER.timer_start(handle).unwrap();
        }

        sim.fire_at(100);
        assert_eq!(SWEEPS.load(Ordering::SeqCst), 1);
        assert_eq!(DOOMED_HITS.load(Ordering::SeqCst), 0);
        assert_eq!(PAUSED_HITS.load(Ordering::SeqCst), 0);
        assert_eq!(SWEEPER.timer_start(victim), Err(TimeError::InvalidHandle));
        assert!(!SWEEPER.timer_period_has_expired(held));

        // Only the sweeper is re-queued
        assert_eq!(sim.compare(), 200);
        sim.fire_at(200);
        assert_eq!(SWEEPS.load(Ordering::SeqCst), 2);
        assert_eq!(PAUSED_HITS.load(Ordering::SeqCst), 0);
        assert_eq!(SWEEPER.state.lock().pool.in_use(), 2);
    }
}
