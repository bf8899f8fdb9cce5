//! Command framing: the six-byte sequence every SD command sends over SPI,
//! and the R1 response bits every command (except a data-response token)
//! comes back with.

use core::fmt;

use crate::crc::crc7;

/// The commands this driver issues. Application-specific commands (the
/// `ACMD*` family) are sent as their numeric index preceded by `CMD55`,
/// exactly as the card protocol requires.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    /// Software reset; the first command sent during bring-up.
    Cmd0 = 0,
    /// Check interface condition / voltage range (SD v2 and later).
    Cmd8 = 8,
    /// Read the CSD register.
    Cmd9 = 9,
    /// Read the CID register.
    Cmd10 = 10,
    /// Stop a multi-block read.
    Cmd12 = 12,
    /// Set the block length (unused once a card is confirmed SDHC/SDXC).
    Cmd16 = 16,
    /// Read a single block.
    Cmd17 = 17,
    /// Read multiple blocks.
    Cmd18 = 18,
    /// Set the pre-erase block count before a multi-block write.
    Acmd23 = 23,
    /// Write a single block.
    Cmd24 = 24,
    /// Write multiple blocks.
    Cmd25 = 25,
    /// Set the address of the first block to erase.
    Cmd32 = 32,
    /// Set the address of the last block to erase.
    Cmd33 = 33,
    /// Erase the previously addressed block range.
    Cmd38 = 38,
    /// Start the SD-native initialization process.
    Acmd41 = 41,
    /// Escape prefix for the next command being an application command.
    Cmd55 = 55,
    /// Read the OCR register.
    Cmd58 = 58,
    /// Turn CRC checking on (argument `1`) or off (argument `0`).
    Cmd59 = 59,
    /// Report how many blocks of the most recent multi-block write actually
    /// landed before an error cut it short.
    Acmd22 = 22,
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CMD{}", *self as u8)
    }
}

/// Builds the six-byte command frame for `cmd` with argument `arg`,
/// including a correctly computed CRC7 — not just for `CMD0`/`CMD8`, whose
/// CRC the card always checks, but for every command, since computing it
/// honestly costs nothing and the card's CRC-check state is not something
/// this driver tracks.
#[must_use]
pub fn frame(cmd: Cmd, arg: u32) -> [u8; 6] {
    let mut buf = [
        (cmd as u8) | 0x40,
        (arg >> 24) as u8,
        (arg >> 16) as u8,
        (arg >> 8) as u8,
        arg as u8,
        0,
    ];
    buf[5] = crc7(&buf[0..5]);
    buf
}

bitflags::bitflags! {
    /// The R1 response byte every command returns.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct R1: u8 {
        /// Card is in the idle state (only ever expected right after `CMD0`).
        const IN_IDLE_STATE = 0x01;
        /// An erase sequence was reset.
        const ERASE_RESET = 0x02;
        /// The card did not recognize the command.
        const ILLEGAL_COMMAND = 0x04;
        /// The command's CRC did not match.
        const COM_CRC_ERROR = 0x08;
        /// An erase sequence command was out of sequence.
        const ERASE_SEQUENCE_ERROR = 0x10;
        /// The command's address argument was misaligned.
        const ADDRESS_ERROR = 0x20;
        /// The command's argument was out of the card's allowed range.
        const PARAMETER_ERROR = 0x40;
        /// Synthesized by this driver, not the card: no byte with its high
        /// bit clear arrived within the response poll budget.
        const TIMEOUT = 0x80;
    }
}

impl fmt::Display for R1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R1({:#04x})", self.bits())
    }
}

impl From<R1> for u8 {
    fn from(r1: R1) -> Self {
        r1.bits()
    }
}

/// A command succeeded (R1 carries only, at most, the idle-state bit).
#[must_use]
pub fn r1_is_ok(r1: R1) -> bool {
    (r1 - R1::IN_IDLE_STATE).is_empty()
}
