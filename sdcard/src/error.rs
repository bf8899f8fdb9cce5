//! Typed outcomes for bring-up and block I/O, generic over the bus's own
//! transfer error so a wiring fault still reports meaningfully.

use core::fmt;

use crate::command::{Cmd, R1};

/// Everything that can go wrong bringing a card up into a known, addressable
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError<E> {
    /// The bus itself failed to transfer a byte.
    Bus(E),
    /// `cmd` never returned a response byte within the poll budget.
    NoResponse(Cmd),
    /// `cmd` returned `r1`, which carries a bit beyond the ones this bring-up
    /// sequence is prepared to see at that point.
    UnexpectedResponse(Cmd, R1),
    /// `CMD8`'s echoed voltage/check pattern did not match what was sent;
    /// the card is not a version this driver supports.
    VoltageCheckFailed,
    /// `ACMD41` never left the idle state within the poll budget.
    Acmd41Timeout,
    /// `CMD58` never returned within the poll budget.
    OcrTimeout,
    /// The CSD register could not be parsed into a sane capacity.
    BadCsd,
    /// `CMD59` (CRC on/off) was rejected instead of returning to idle.
    FailedCrcOnOff,
    /// `CMD58`'s OCR reported bit 31 clear: the card has not finished its
    /// internal power-up sequence yet.
    PowerUpNotComplete,
}

impl<E: fmt::Debug> fmt::Display for InitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "spi bus error: {e:?}"),
            Self::NoResponse(cmd) => write!(f, "{cmd}: no response"),
            Self::UnexpectedResponse(cmd, r1) => write!(f, "{cmd}: unexpected {r1}"),
            Self::VoltageCheckFailed => f.write_str("CMD8 voltage check failed"),
            Self::Acmd41Timeout => f.write_str("ACMD41: card never left idle state"),
            Self::OcrTimeout => f.write_str("CMD58: no response"),
            Self::BadCsd => f.write_str("CSD register failed sanity checks"),
            Self::FailedCrcOnOff => f.write_str("CMD59: rejected"),
            Self::PowerUpNotComplete => f.write_str("CMD58: card has not finished powering up"),
        }
    }
}

#[cfg(any(test, feature = "std"))]
impl<E: fmt::Debug> std::error::Error for InitError<E> {}

/// Everything that can go wrong reading or writing a block once the card is
/// up and addressable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError<E> {
    /// The bus itself failed to transfer a byte.
    Bus(E),
    /// The read/write command itself was rejected; carries its R1.
    CommandRejected(Cmd, R1),
    /// The data start token never arrived within the poll budget.
    DataTimeout,
    /// The card rejected the written data with a CRC error.
    CrcError,
    /// The card rejected the written data with a write error.
    WriteError,
    /// The card rejected a multi-block write for an unrecognized reason.
    Rejected,
    /// A buffer passed to a block operation was not a positive multiple of
    /// 512 bytes.
    BadBufferLength,
    /// The data-response token never arrived within its poll budget.
    DataResponseTimeout,
    /// The card's busy line never cleared within its poll budget.
    CardBusyTimeout,
    /// `CMD32` (set erase start address) was rejected; carries its R1.
    SetStartAddrError(Cmd, R1),
    /// `CMD33` (set erase end address) was rejected; carries its R1.
    SetEndAddrError(Cmd, R1),
    /// `CMD38` (erase) was rejected; carries its R1.
    EraseError(Cmd, R1),
    /// The erase busy line never cleared within its poll budget.
    EraseBusyTimeout,
}

impl<E: fmt::Debug> fmt::Display for BlockError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "spi bus error: {e:?}"),
            Self::CommandRejected(cmd, r1) => write!(f, "{cmd}: rejected, {r1}"),
            Self::DataTimeout => f.write_str("data start token never arrived"),
            Self::CrcError => f.write_str("data rejected: CRC error"),
            Self::WriteError => f.write_str("data rejected: write error"),
            Self::Rejected => f.write_str("data rejected"),
            Self::BadBufferLength => f.write_str("buffer length is not a positive multiple of 512"),
            Self::DataResponseTimeout => f.write_str("data-response token never arrived"),
            Self::CardBusyTimeout => f.write_str("card busy line never cleared"),
            Self::SetStartAddrError(cmd, r1) => write!(f, "{cmd}: rejected, {r1}"),
            Self::SetEndAddrError(cmd, r1) => write!(f, "{cmd}: rejected, {r1}"),
            Self::EraseError(cmd, r1) => write!(f, "{cmd}: rejected, {r1}"),
            Self::EraseBusyTimeout => f.write_str("erase busy line never cleared"),
        }
    }
}

#[cfg(any(test, feature = "std"))]
impl<E: fmt::Debug> std::error::Error for BlockError<E> {}
