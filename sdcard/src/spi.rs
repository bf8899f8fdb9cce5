//! The SPI transport shim: everything the rest of this crate needs from the
//! bus is "send some bytes, get some bytes back, drive chip-select."
//!
//! Generic over `embedded-hal`'s own blocking SPI and digital-output
//! traits rather than a bespoke trait of our own — the bus is already a
//! `Transfer<u8> + Write<u8>`, and CS is already an `OutputPin`.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

/// The value shifted out (and discarded) while only clocking the bus, or
/// while waiting for a card response.
const IDLE_BYTE: u8 = 0xFF;

/// An SPI bus plus the GPIO pin wired to the card's chip-select, owned
/// together by value.
///
/// There is no global bus anywhere in this crate: a caller acquires a
/// `SpiBus` once at startup and threads it (or the [`crate::SdCard`] that
/// wraps it) through every subsequent call.
pub struct SpiBus<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS, E> SpiBus<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    /// Takes ownership of an already-configured SPI peripheral and a CS
    /// output pin. Clock rate, mode, and frame format are the caller's
    /// responsibility — this shim only ever transfers bytes.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs }
    }

    /// Releases the underlying peripheral and pin.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    /// Drives CS low (selects the card).
    pub fn select(&mut self) {
        let _ = self.cs.set_low();
    }

    /// Drives CS high (deselects the card) and clocks one idle byte, matching
    /// the card's own end-of-transaction convention.
    pub fn deselect(&mut self) {
        let _ = self.cs.set_high();
        let mut buf = [IDLE_BYTE];
        let _ = self.spi.transfer(&mut buf);
    }

    /// Writes `data`, discarding whatever comes back on MISO.
    ///
    /// # Errors
    ///
    /// Propagates whatever error the underlying SPI peripheral returns.
    pub fn write(&mut self, data: &[u8]) -> Result<(), E> {
        self.spi.write(data)
    }

    /// Clocks `buf.len()` idle bytes out while capturing what comes back.
    ///
    /// # Errors
    ///
    /// Propagates whatever error the underlying SPI peripheral returns.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), E> {
        buf.fill(IDLE_BYTE);
        self.spi.transfer(buf)?;
        Ok(())
    }

    /// Clocks a single idle byte and returns what came back.
    ///
    /// # Errors
    ///
    /// Propagates whatever error the underlying SPI peripheral returns.
    pub fn read_byte(&mut self) -> Result<u8, E> {
        let mut buf = [IDLE_BYTE];
        self.spi.transfer(&mut buf)?;
        Ok(buf[0])
    }
}
