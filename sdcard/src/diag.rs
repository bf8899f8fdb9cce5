//! Human-readable diagnostics for the error types this crate returns,
//! written against `core::fmt::Write` rather than `std::io::Write` since
//! this crate has no `std` to reach for.

use core::fmt::{self, Write};

use crate::command::R1;
use crate::error::{BlockError, InitError};

/// Writes a one-line description of an R1 response byte.
///
/// # Errors
///
/// Propagates whatever error `out` itself returns.
pub fn print_r1<W: Write>(out: &mut W, r1: R1) -> fmt::Result {
    writeln!(out, "{r1}")
}

/// Writes a one-line description of a bring-up failure.
///
/// # Errors
///
/// Propagates whatever error `out` itself returns.
pub fn print_init_error<W: Write, E: fmt::Debug>(out: &mut W, err: &InitError<E>) -> fmt::Result {
    writeln!(out, "sdcard init failed: {err}")
}

/// Writes a one-line description of a read failure.
///
/// # Errors
///
/// Propagates whatever error `out` itself returns.
pub fn print_read_error<W: Write, E: fmt::Debug>(out: &mut W, err: &BlockError<E>) -> fmt::Result {
    writeln!(out, "sdcard read failed: {err}")
}

/// Writes a one-line description of a write failure.
///
/// # Errors
///
/// Propagates whatever error `out` itself returns.
pub fn print_write_error<W: Write, E: fmt::Debug>(out: &mut W, err: &BlockError<E>) -> fmt::Result {
    writeln!(out, "sdcard write failed: {err}")
}

/// Writes a one-line description of an erase failure.
///
/// # Errors
///
/// Propagates whatever error `out` itself returns.
pub fn print_erase_error<W: Write, E: fmt::Debug>(out: &mut W, err: &BlockError<E>) -> fmt::Result {
    writeln!(out, "sdcard erase failed: {err}")
}
