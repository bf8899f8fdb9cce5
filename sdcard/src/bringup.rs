//! The bring-up sequence: drives a freshly powered card from its native SD
//! mode into SPI mode, identifies its capacity class, and raises the clock.
//!
//! Grounded in the same `CMD0` -> `CMD8` -> `ACMD41` -> `CMD58` sequence used
//! by production SPI-mode drivers, but this one does not stop at
//! High-Capacity cards: a card that reports Standard-Capacity in its OCR is
//! accepted too, since the two capacity classes only differ in how a block
//! address is encoded, not in whether the card works.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use crate::command::{r1_is_ok, Cmd, R1};
use crate::csd::{Csd, CSD_LEN};
use crate::error::InitError;
use crate::proto::{
    end_cmd, get_response, read_data_block, send_cmd, COMMAND_RETRY_BUDGET,
};
use crate::spi::SpiBus;

/// `CMD8`'s check pattern; echoed back verbatim by any card that understands
/// the command.
const CMD8_CHECK_PATTERN: u8 = 0xAA;
/// `CMD8`'s voltage-supplied field (bits 11:8 of its argument): 2.7-3.6V,
/// the only range this driver wires cards for.
const CMD8_VOLTAGE_RANGE: u32 = 0x1;
/// `CMD59`'s argument to turn CRC checking on.
const CMD59_CRC_ON: u32 = 1;
/// `ACMD41`'s HCS bit: tells the card this host supports High-Capacity
/// addressing, so it's free to come up as either class.
const ACMD41_HCS: u32 = 0x4000_0000;
/// `CMD58`'s OCR response is 4 bytes; the card-capacity-status bit lives in
/// the first one.
const OCR_CCS_BIT: u8 = 0x40;
/// `CMD58`'s OCR response's "card power up status" bit: set once the card
/// has finished its internal power-up sequence.
const OCR_POWER_UP_BIT: u8 = 0x80;
/// `CMD58`'s OCR response is 4 bytes, preceded by the R1 byte already
/// consumed by `get_response`.
const OCR_LEN: usize = 4;

/// Which addressing scheme a card uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    /// Block addresses are byte offsets divided by 512; the driver must
    /// multiply.
    StandardCapacity,
    /// Block addresses are already block indices.
    HighCapacity,
}

/// What bring-up learned about the card: its capacity class and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    kind: CardKind,
    capacity_bytes: u64,
}

impl CardInfo {
    #[cfg(test)]
    pub(crate) fn for_test(kind: CardKind, capacity_bytes: u64) -> Self {
        Self {
            kind,
            capacity_bytes,
        }
    }

    /// The card's capacity class.
    #[must_use]
    pub const fn kind(&self) -> CardKind {
        self.kind
    }

    /// Total addressable capacity, in bytes.
    #[must_use]
    pub const fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

fn expect_response<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    cmd: Cmd,
    arg: u32,
) -> Result<R1, InitError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    send_cmd(bus, cmd, arg).map_err(InitError::Bus)?;
    let r1 = get_response(bus).map_err(InitError::Bus)?;
    end_cmd::<SPI, CS, E>(bus);
    if r1.contains(R1::TIMEOUT) {
        log::error!("{cmd}: no response");
        return Err(InitError::NoResponse(cmd));
    }
    Ok(r1)
}

fn send_acmd<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    arg: u32,
) -> Result<R1, InitError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    expect_response(bus, Cmd::Cmd55, 0)?;
    expect_response(bus, Cmd::Acmd41, arg)
}

/// Runs the full bring-up sequence over an already-selected-speed-for-init
/// SPI bus (typically no faster than 400 kHz, per the SD specification's
/// own requirement during identification).
///
/// `host_supports_hc` governs whether `ACMD41` advertises the HCS bit,
/// telling the card this host is willing to address it in blocks rather
/// than bytes; pass `false` to force the card to come up Standard-Capacity.
///
/// A card that answers `CMD8` with `ILLEGAL_COMMAND` is a legacy, pre-2.0
/// card: the interface/voltage check is skipped rather than treated as a
/// failure, and `ACMD41` proceeds without the HCS bit.
///
/// # Errors
///
/// Returns [`InitError`] at whichever step the card failed to respond as
/// expected. The card is left deselected either way.
pub fn bring_up<SPI, CS, E>(
    bus: &mut SpiBus<SPI, CS>,
    host_supports_hc: bool,
) -> Result<CardInfo, InitError<E>>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    bus.deselect();
    let mut dummy = [0xFFu8; 10];
    bus.read(&mut dummy).map_err(InitError::Bus)?;

    let r1 = expect_response(bus, Cmd::Cmd0, 0)?;
    if r1 != R1::IN_IDLE_STATE {
        log::error!("CMD0: unexpected {r1}");
        return Err(InitError::UnexpectedResponse(Cmd::Cmd0, r1));
    }

    send_cmd(bus, Cmd::Cmd8, (CMD8_VOLTAGE_RANGE << 8) | u32::from(CMD8_CHECK_PATTERN))
        .map_err(InitError::Bus)?;
    let r1 = get_response(bus).map_err(InitError::Bus)?;
    if r1.contains(R1::TIMEOUT) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(InitError::NoResponse(Cmd::Cmd8));
    }
    let mut echo = [0u8; 4];
    bus.read(&mut echo).map_err(InitError::Bus)?;
    end_cmd::<SPI, CS, E>(bus);
    // A card that doesn't recognize CMD8 is a legacy (pre-2.0, Standard-
    // Capacity-only) card, not a failure: the host just skips the interface
    // check and lets ACMD41/CMD58 settle its capacity class.
    let legacy_card = r1.contains(R1::ILLEGAL_COMMAND);
    if !legacy_card {
        if r1 != R1::IN_IDLE_STATE {
            log::error!("CMD8: unexpected {r1}");
            return Err(InitError::UnexpectedResponse(Cmd::Cmd8, r1));
        }
        if echo[2] != CMD8_VOLTAGE_RANGE as u8 || echo[3] != CMD8_CHECK_PATTERN {
            log::error!("CMD8: voltage/check-pattern echo mismatch");
            return Err(InitError::VoltageCheckFailed);
        }
    }

    let r1 = expect_response(bus, Cmd::Cmd59, CMD59_CRC_ON)?;
    if r1 != R1::IN_IDLE_STATE {
        log::error!("CMD59: unexpected {r1}");
        return Err(InitError::FailedCrcOnOff);
    }

    let acmd41_arg = if !legacy_card && host_supports_hc {
        ACMD41_HCS
    } else {
        0
    };
    let mut left = true;
    for _ in 0..COMMAND_RETRY_BUDGET {
        let r1 = send_acmd(bus, acmd41_arg)?;
        if r1 == R1::empty() {
            left = false;
            break;
        }
        if !r1_is_ok(r1) {
            log::error!("ACMD41: unexpected {r1}");
            return Err(InitError::UnexpectedResponse(Cmd::Acmd41, r1));
        }
    }
    if left {
        log::warn!("ACMD41: retry budget exhausted, card never left idle state");
        return Err(InitError::Acmd41Timeout);
    }

    let mut ocr = [0u8; OCR_LEN];
    let mut found = false;
    for _ in 0..COMMAND_RETRY_BUDGET {
        send_cmd(bus, Cmd::Cmd58, 0).map_err(InitError::Bus)?;
        let r1 = get_response(bus).map_err(InitError::Bus)?;
        if r1.contains(R1::TIMEOUT) {
            end_cmd::<SPI, CS, E>(bus);
            continue;
        }
        bus.read(&mut ocr).map_err(InitError::Bus)?;
        end_cmd::<SPI, CS, E>(bus);
        if !r1_is_ok(r1) {
            log::error!("CMD58: unexpected {r1}");
            return Err(InitError::UnexpectedResponse(Cmd::Cmd58, r1));
        }
        found = true;
        break;
    }
    if !found {
        log::warn!("CMD58: retry budget exhausted, no response");
        return Err(InitError::OcrTimeout);
    }
    if ocr[0] & OCR_POWER_UP_BIT == 0 {
        log::error!("CMD58: card has not finished powering up");
        return Err(InitError::PowerUpNotComplete);
    }
    let kind = if ocr[0] & OCR_CCS_BIT != 0 {
        CardKind::HighCapacity
    } else {
        CardKind::StandardCapacity
    };

    send_cmd(bus, Cmd::Cmd9, 0).map_err(InitError::Bus)?;
    let r1 = get_response(bus).map_err(InitError::Bus)?;
    if r1.contains(R1::TIMEOUT) {
        end_cmd::<SPI, CS, E>(bus);
        return Err(InitError::NoResponse(Cmd::Cmd9));
    }
    if !r1_is_ok(r1) {
        end_cmd::<SPI, CS, E>(bus);
        log::error!("CMD9: unexpected {r1}");
        return Err(InitError::UnexpectedResponse(Cmd::Cmd9, r1));
    }
    let mut csd_raw = [0u8; CSD_LEN];
    let got = read_data_block(bus, &mut csd_raw).map_err(InitError::Bus)?;
    end_cmd::<SPI, CS, E>(bus);
    if !got {
        log::error!("CMD9: CSD data token never arrived");
        return Err(InitError::BadCsd);
    }
    let csd = Csd::parse(&csd_raw).map_err(|()| {
        log::error!("CMD9: CSD register failed sanity checks");
        InitError::BadCsd
    })?;

    Ok(CardInfo {
        kind,
        capacity_bytes: csd.capacity_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::CardKind;

    #[test]
    fn card_kind_is_copy_and_comparable() {
        assert_eq!(CardKind::HighCapacity, CardKind::HighCapacity);
        assert_ne!(CardKind::HighCapacity, CardKind::StandardCapacity);
    }
}
