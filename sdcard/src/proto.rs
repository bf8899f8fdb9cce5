//! The handful of byte-level exchanges every higher-level operation is built
//! from: send a command, poll for a response, poll for a data token.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use crate::command::{frame, Cmd, R1};
use crate::spi::SpiBus;

/// Data token: start of a single-block (or one block of a multi-block) read.
pub(crate) const TOKEN_START_BLOCK: u8 = 0xFE;
/// Data token: start of a multi-block write.
pub(crate) const TOKEN_START_MULTI_WRITE: u8 = 0xFC;
/// Data token: stop of a multi-block write.
pub(crate) const TOKEN_STOP_MULTI_WRITE: u8 = 0xFD;

/// R1 poll budget: the number of idle-byte reads `get_response` will spend
/// looking for a byte with its high bit clear before giving up and
/// synthesizing [`R1::TIMEOUT`].
pub(crate) const R1_POLL_BUDGET: u32 = 254;
/// Data-token poll budget: wider than the R1 budget since a card may need
/// longer to ready a data block than to answer a bare command.
pub(crate) const TOKEN_POLL_BUDGET: u32 = 0x0FFF;
/// Data-response-token poll budget, spent immediately after a data block is
/// written, before the card's busy period begins.
pub(crate) const DATA_RESPONSE_POLL_BUDGET: u32 = 254;
/// Busy-line poll budget after a single-block write's data-response token —
/// comfortably more than twice [`R1_POLL_BUDGET`], since a write's busy
/// period can run longer than a bare command's response latency.
pub(crate) const WRITE_BUSY_POLL_BUDGET: u32 = 508;
/// Busy-line poll budget after an erase command — erasing a range of blocks
/// can take orders of magnitude longer than writing one.
pub(crate) const ERASE_BUSY_POLL_BUDGET: u32 = 65534;
/// Number of dummy clocks driven after a write's busy period clears, before
/// the card is deselected — gives the card room to finish any internal
/// housekeeping the busy line doesn't cover.
pub(crate) const GUARD_CLOCKS: usize = 254;
/// Poll budget for state-machine retries that themselves send a command
/// each iteration (`ACMD41`, `CMD58`).
pub(crate) const COMMAND_RETRY_BUDGET: u32 = 255;

/// Sends `cmd` with `arg`, selecting the card first.
pub(crate) fn send_cmd<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    cmd: Cmd,
    arg: u32,
) -> Result<(), E>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    log::debug!("issuing {cmd} arg={arg:#010x}");
    bus.select();
    bus.write(&frame(cmd, arg))
}

/// Ends a command: deselects the card and clocks one trailing idle byte.
pub(crate) fn end_cmd<SPI, CS, E>(bus: &mut SpiBus<SPI, CS>)
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    bus.deselect();
}

/// Clocks [`GUARD_CLOCKS`] dummy bytes before deselecting — used after a
/// write or erase's busy period clears, on top of `end_cmd`'s single idle
/// byte.
pub(crate) fn guard_window<SPI, CS, E>(bus: &mut SpiBus<SPI, CS>) -> Result<(), E>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    let mut dummy = [0xFFu8; GUARD_CLOCKS];
    bus.read(&mut dummy)
}

/// Polls for the R1 response byte: the first byte read back with its high
/// bit clear. Returns [`R1::TIMEOUT`] (possibly combined with nothing else)
/// if the poll budget is exhausted before one arrives.
pub(crate) fn get_response<SPI, CS, E>(bus: &mut SpiBus<SPI, CS>) -> Result<R1, E>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    for _ in 0..R1_POLL_BUDGET {
        let byte = bus.read_byte()?;
        if byte != 0xFF {
            return Ok(R1::from_bits_truncate(byte));
        }
    }
    Ok(R1::TIMEOUT)
}

/// Polls for a data start token, returning it (or `None` on timeout).
/// Any non-`0xFF` byte that isn't the expected token is still returned so
/// the caller can decide whether it's an error token.
pub(crate) fn get_data_token<SPI, CS, E>(bus: &mut SpiBus<SPI, CS>) -> Result<Option<u8>, E>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    for _ in 0..TOKEN_POLL_BUDGET {
        let byte = bus.read_byte()?;
        if byte != 0xFF {
            return Ok(Some(byte));
        }
    }
    Ok(None)
}

/// Waits for the data start token, then reads `buf.len()` data bytes
/// followed by the two trailing CRC16 bytes (discarded; CRC is not checked
/// in SPI mode by this driver). Returns `false` on a poll timeout or an
/// error token in place of the start token.
pub(crate) fn read_data_block<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    buf: &mut [u8],
) -> Result<bool, E>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    match get_data_token(bus)? {
        Some(TOKEN_START_BLOCK) => {
            bus.read(buf)?;
            let mut crc = [0u8; 2];
            bus.read(&mut crc)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Outcome of waiting for a write's data-response token and the busy period
/// that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataResponse {
    /// The card accepted the block and is no longer busy.
    Accepted,
    /// The card rejected the block with a CRC error.
    CrcError,
    /// The card rejected the block with a write error.
    WriteError,
    /// The masked token carried a value this driver doesn't recognize.
    Rejected,
    /// The data-response token itself never arrived.
    ResponseTimeout,
    /// The token arrived but the busy line never cleared.
    BusyTimeout,
}

/// Polls for the data-response token after a write, then waits out the
/// card's busy period that follows an accepted block.
///
/// Both waits are bounded: [`DATA_RESPONSE_POLL_BUDGET`] attempts for the
/// token, [`WRITE_BUSY_POLL_BUDGET`] attempts for the busy line to clear.
pub(crate) fn get_data_response<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
) -> Result<DataResponse, E>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    let mut token = None;
    for _ in 0..DATA_RESPONSE_POLL_BUDGET {
        let byte = bus.read_byte()?;
        if byte != 0xFF {
            token = Some(byte & 0x1F);
            break;
        }
    }
    let Some(token) = token else {
        return Ok(DataResponse::ResponseTimeout);
    };
    if token != 0x05 {
        return Ok(match token {
            0x0B => DataResponse::CrcError,
            0x0D => DataResponse::WriteError,
            _ => DataResponse::Rejected,
        });
    }
    for _ in 0..WRITE_BUSY_POLL_BUDGET {
        if bus.read_byte()? != 0x00 {
            return Ok(DataResponse::Accepted);
        }
    }
    Ok(DataResponse::BusyTimeout)
}

/// Waits out a busy line using an explicit budget, for callers (erase) whose
/// busy period can run far longer than a write's.
pub(crate) fn wait_busy<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    budget: u32,
) -> Result<bool, E>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    for _ in 0..budget {
        if bus.read_byte()? != 0x00 {
            return Ok(true);
        }
    }
    Ok(false)
}
