//! Timer service and GMAC Ethernet driver for Harmony-class microcontroller boards.
//!
//! Two subsystems live here:
//!
//! - [`time`]: a tickless software timer service multiplexed onto one
//!   free-running hardware counter with a compare interrupt.
//! - [`drivers::net::gmac`]: the GMAC MAC driver, built around per-queue DMA
//!   descriptor rings shared with the Ethernet DMA engine.
//!
//! Everything else on the board (pin muxing, clocks, the PHY state machine,
//! the console UART) is consumed through small traits.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod drivers;
pub mod status;
pub mod sync;
pub mod time;

use core::fmt::{self, Write};
use lazy_static::lazy_static;
use spin::Mutex;

/// Console output function supplied by the board (usually a UART writer).
pub type ConsoleFn = fn(&str);

/// Console writer backing [`print!`] and [`println!`].
///
/// Discards output until a sink is registered with [`set_console`].
pub struct Console {
    sink: Option<ConsoleFn>,
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = self.sink {
            sink(s);
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref CONSOLE: Mutex<Console> = Mutex::new(Console { sink: None });
}

/// Route console output to `sink`.
pub fn set_console(sink: ConsoleFn) {
    CONSOLE.lock().sink = Some(sink);
}

/// Print implementation that acquires the console lock
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // Logging must never fail the caller
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Print macro for console output
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::_print(format_args!($($arg)*)));
}

/// Println macro for console output
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
