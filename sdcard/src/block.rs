//! Block read/write/erase and the [`fat32::BlockDevice`] adapter that lets a
//! card stand in directly for the block device `fat32` expects.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use fat32::{BlockDevice, BLOCK_SIZE};

use crate::bringup::{CardInfo, CardKind};
use crate::command::{r1_is_ok, Cmd};
use crate::error::BlockError;
use crate::proto::{
    end_cmd, get_data_response, get_data_token, get_response, guard_window, read_data_block,
    send_cmd, wait_busy, DataResponse, ERASE_BUSY_POLL_BUDGET, TOKEN_START_BLOCK,
    TOKEN_START_MULTI_WRITE, TOKEN_STOP_MULTI_WRITE,
};
use crate::spi::SpiBus;

/// Translates a block index into the argument a command expects, which
/// depends on the card's capacity class: High-Capacity cards already
/// address in blocks, Standard-Capacity cards address in bytes.
fn block_arg(kind: CardKind, block: u32) -> u32 {
    match kind {
        CardKind::HighCapacity => block,
        CardKind::StandardCapacity => block.saturating_mul(BLOCK_SIZE as u32),
    }
}

fn send_acmd<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    arg: u32,
) -> Result<crate::command::R1, BlockError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    send_cmd(bus, Cmd::Cmd55, 0).map_err(BlockError::Bus)?;
    let r1 = get_response(bus).map_err(BlockError::Bus)?;
    end_cmd::<SPI, CS, E>(bus);
    if r1.contains(crate::command::R1::TIMEOUT) {
        return Err(BlockError::CommandRejected(Cmd::Cmd55, r1));
    }
    send_cmd(bus, Cmd::Acmd22, arg).map_err(BlockError::Bus)?;
    let r1 = get_response(bus).map_err(BlockError::Bus)?;
    if r1.contains(crate::command::R1::TIMEOUT) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::CommandRejected(Cmd::Acmd22, r1));
    }
    Ok(r1)
}

/// Reads a single 512-byte block at `block` into `buf`.
///
/// # Errors
///
/// Returns [`BlockError`] if the command was rejected, the data token never
/// arrived, or the bus itself failed.
pub fn read_block<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    card: CardInfo,
    block: u32,
    buf: &mut [u8; BLOCK_SIZE],
) -> Result<(), BlockError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    let arg = block_arg(card.kind(), block);
    send_cmd(bus, Cmd::Cmd17, arg).map_err(BlockError::Bus)?;
    let r1 = get_response(bus).map_err(BlockError::Bus)?;
    if r1.contains(crate::command::R1::TIMEOUT) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::DataTimeout);
    }
    if !r1_is_ok(r1) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::CommandRejected(Cmd::Cmd17, r1));
    }
    let got = read_data_block(bus, buf).map_err(BlockError::Bus)?;
    end_cmd::<SPI, CS, E>(bus);
    if !got {
        return Err(BlockError::DataTimeout);
    }
    Ok(())
}

/// Writes a single 512-byte block at `block` from `buf`.
///
/// # Errors
///
/// Returns [`BlockError`] if the command was rejected, the card rejected the
/// written data, the busy line never cleared, or the bus itself failed.
pub fn write_block<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    card: CardInfo,
    block: u32,
    buf: &[u8; BLOCK_SIZE],
) -> Result<(), BlockError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    let arg = block_arg(card.kind(), block);
    send_cmd(bus, Cmd::Cmd24, arg).map_err(BlockError::Bus)?;
    let r1 = get_response(bus).map_err(BlockError::Bus)?;
    if r1.contains(crate::command::R1::TIMEOUT) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::DataTimeout);
    }
    if !r1_is_ok(r1) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::CommandRejected(Cmd::Cmd24, r1));
    }

    bus.write(&[TOKEN_START_BLOCK]).map_err(BlockError::Bus)?;
    bus.write(buf).map_err(BlockError::Bus)?;
    let response = get_data_response(bus).map_err(BlockError::Bus)?;
    let result = data_response_result(response);
    if result.is_ok() {
        guard_window(bus).map_err(BlockError::Bus)?;
    }
    end_cmd::<SPI, CS, E>(bus);
    result
}

fn data_response_result<E>(response: DataResponse) -> Result<(), BlockError<E>> {
    match response {
        DataResponse::Accepted => Ok(()),
        DataResponse::CrcError => Err(BlockError::CrcError),
        DataResponse::WriteError => Err(BlockError::WriteError),
        DataResponse::Rejected => Err(BlockError::Rejected),
        DataResponse::ResponseTimeout => Err(BlockError::DataResponseTimeout),
        DataResponse::BusyTimeout => Err(BlockError::CardBusyTimeout),
    }
}

/// Erases every block from `start` to `end` (inclusive).
///
/// # Errors
///
/// Returns [`BlockError`] if `CMD32`/`CMD33`/`CMD38` is rejected, the erase
/// busy line never clears, or the bus itself failed.
pub fn erase_range<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    card: CardInfo,
    start: u32,
    end: u32,
) -> Result<(), BlockError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    let start_arg = block_arg(card.kind(), start);
    send_cmd(bus, Cmd::Cmd32, start_arg).map_err(BlockError::Bus)?;
    let r1 = get_response(bus).map_err(BlockError::Bus)?;
    end_cmd::<SPI, CS, E>(bus);
    if !r1_is_ok(r1) {
        return Err(BlockError::SetStartAddrError(Cmd::Cmd32, r1));
    }

    let end_arg = block_arg(card.kind(), end);
    send_cmd(bus, Cmd::Cmd33, end_arg).map_err(BlockError::Bus)?;
    let r1 = get_response(bus).map_err(BlockError::Bus)?;
    end_cmd::<SPI, CS, E>(bus);
    if !r1_is_ok(r1) {
        return Err(BlockError::SetEndAddrError(Cmd::Cmd33, r1));
    }

    send_cmd(bus, Cmd::Cmd38, 0).map_err(BlockError::Bus)?;
    let r1 = get_response(bus).map_err(BlockError::Bus)?;
    if !r1_is_ok(r1) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::EraseError(Cmd::Cmd38, r1));
    }
    let cleared = wait_busy(bus, ERASE_BUSY_POLL_BUDGET).map_err(BlockError::Bus)?;
    if cleared {
        guard_window(bus).map_err(BlockError::Bus)?;
    }
    end_cmd::<SPI, CS, E>(bus);
    if !cleared {
        return Err(BlockError::EraseBusyTimeout);
    }
    Ok(())
}

/// Reads `bufs.len()` consecutive 512-byte blocks starting at `start` using
/// a single multi-block read stream (`CMD18`), closed with `CMD12`.
///
/// # Errors
///
/// Returns [`BlockError`] if the command was rejected, a data token never
/// arrived, or the bus itself failed.
pub fn read_multi<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    card: CardInfo,
    start: u32,
    bufs: &mut [[u8; BLOCK_SIZE]],
) -> Result<(), BlockError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    let arg = block_arg(card.kind(), start);
    send_cmd(bus, Cmd::Cmd18, arg).map_err(BlockError::Bus)?;
    let r1 = get_response(bus).map_err(BlockError::Bus)?;
    if !r1_is_ok(r1) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::CommandRejected(Cmd::Cmd18, r1));
    }

    let mut outcome = Ok(());
    for buf in bufs.iter_mut() {
        match read_data_block(bus, buf) {
            Ok(true) => {}
            Ok(false) => {
                outcome = Err(BlockError::DataTimeout);
                break;
            }
            Err(e) => {
                outcome = Err(BlockError::Bus(e));
                break;
            }
        }
    }

    send_cmd(bus, Cmd::Cmd12, 0).map_err(BlockError::Bus)?;
    // CMD12's R1b carries a stuff byte before the genuine response; this
    // driver has nothing useful to do with either, having already collected
    // every block it asked for (or the error that stopped it early).
    let _ = get_response(bus).map_err(BlockError::Bus)?;
    end_cmd::<SPI, CS, E>(bus);
    outcome
}

/// Writes `bufs.len()` consecutive 512-byte blocks starting at `start` using
/// a single multi-block write stream (`CMD25`), always closed with the
/// multi-write stop token regardless of whether every block was accepted.
///
/// # Errors
///
/// Returns [`BlockError`] if the command was rejected or any block's
/// data-response token reported an error; the stream is still closed and
/// the busy line still waited out before the error is returned. Call
/// [`num_well_written`] afterward to learn how many blocks actually landed.
pub fn write_multi<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    card: CardInfo,
    start: u32,
    bufs: &[[u8; BLOCK_SIZE]],
) -> Result<(), BlockError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    let arg = block_arg(card.kind(), start);
    send_cmd(bus, Cmd::Cmd25, arg).map_err(BlockError::Bus)?;
    let r1 = get_response(bus).map_err(BlockError::Bus)?;
    if !r1_is_ok(r1) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::CommandRejected(Cmd::Cmd25, r1));
    }

    let mut outcome = Ok(());
    for buf in bufs {
        if let Err(e) = bus.write(&[TOKEN_START_MULTI_WRITE]).map_err(BlockError::Bus) {
            outcome = Err(e);
            break;
        }
        if let Err(e) = bus.write(buf).map_err(BlockError::Bus) {
            outcome = Err(e);
            break;
        }
        let response = match get_data_response(bus) {
            Ok(response) => response,
            Err(e) => {
                outcome = Err(BlockError::Bus(e));
                break;
            }
        };
        if let Err(e) = data_response_result(response) {
            outcome = Err(e);
            break;
        }
    }

    // The stop token and its busy wait are unconditional: a card mid-stream
    // needs to see the stop token to leave multi-write mode cleanly, whether
    // or not every block it was sent landed.
    let stop_result = bus.write(&[TOKEN_STOP_MULTI_WRITE]).map_err(BlockError::Bus);
    let cleared = match stop_result {
        Ok(()) => wait_busy(bus, crate::proto::WRITE_BUSY_POLL_BUDGET).map_err(BlockError::Bus),
        Err(e) => Err(e),
    };
    let cleared = match cleared {
        Ok(true) => guard_window(bus).map_err(BlockError::Bus).map(|()| true),
        other => other,
    };
    end_cmd::<SPI, CS, E>(bus);

    outcome?;
    match cleared {
        Ok(true) => Ok(()),
        Ok(false) => Err(BlockError::CardBusyTimeout),
        Err(e) => Err(e),
    }
}

/// Reports how many blocks of the most recent multi-block write actually
/// landed before an error token (or the end of the stream) cut it short,
/// via `ACMD22`.
///
/// # Errors
///
/// Returns [`BlockError`] if `ACMD22` was rejected, its data token never
/// arrived, or the bus itself failed.
pub fn num_well_written<SPI, CS, E>(bus: &mut SpiBus<SPI, CS>) -> Result<u32, BlockError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    let r1 = send_acmd(bus, 0)?;
    if !r1_is_ok(r1) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::CommandRejected(Cmd::Acmd22, r1));
    }
    let token = get_data_token(bus).map_err(BlockError::Bus)?;
    if token != Some(TOKEN_START_BLOCK) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(BlockError::DataTimeout);
    }
    let mut count = [0u8; 4];
    bus.read(&mut count).map_err(BlockError::Bus)?;
    let mut crc = [0u8; 2];
    bus.read(&mut crc).map_err(BlockError::Bus)?;
    end_cmd::<SPI, CS, E>(bus);
    Ok(u32::from_be_bytes(count))
}

/// A card bound to the SPI bus it was brought up on, ready to serve as a
/// [`fat32::BlockDevice`].
///
/// Owned by value like everything else in this crate: there is no static
/// registry of cards, and nothing here is `Clone` — a caller holds exactly
/// one handle to a given card at a time.
pub struct SdCard<SPI, CS> {
    bus: SpiBus<SPI, CS>,
    info: CardInfo,
}

impl<SPI, CS, E> SdCard<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    /// Wraps an already-brought-up bus and the [`CardInfo`] its bring-up
    /// sequence returned.
    #[must_use]
    pub fn new(bus: SpiBus<SPI, CS>, info: CardInfo) -> Self {
        Self { bus, info }
    }

    /// What bring-up learned about this card.
    #[must_use]
    pub const fn info(&self) -> CardInfo {
        self.info
    }

    /// Releases the underlying bus.
    pub fn release(self) -> SpiBus<SPI, CS> {
        self.bus
    }
}

impl<SPI, CS, E> BlockDevice for SdCard<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
    E: core::fmt::Debug,
{
    type Error = BlockError<E>;

    fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        read_block(&mut self.bus, self.info, block, buf)
    }
}
