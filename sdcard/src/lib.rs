//! A bare-metal SD-card driver speaking SPI mode, generic over
//! `embedded-hal`'s blocking SPI and digital-output traits.
//!
//! Bring a card up with [`bring_up`], wrap the resulting bus and
//! [`CardInfo`] in an [`SdCard`], and hand that `SdCard` to anything that
//! wants a `fat32::BlockDevice` — it is one.
//!
//! There is no global bus, no lazily initialized card registry, anywhere in
//! this crate: a caller owns the bus and the card by value from the moment
//! it's constructed.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]

mod block;
mod bringup;
mod command;
mod crc;
mod csd;
mod diag;
mod error;
mod proto;
mod spi;

pub use block::{erase_range, num_well_written, read_block, read_multi, write_block, write_multi, SdCard};
pub use bringup::{bring_up, CardInfo, CardKind};
pub use command::{r1_is_ok, Cmd, R1};
pub use csd::{Csd, CsdVersion};
pub use diag::{print_erase_error, print_init_error, print_r1, print_read_error, print_write_error};
pub use error::{BlockError, InitError};
pub use spi::SpiBus;

#[cfg(test)]
mod tests {
    use embedded_hal::blocking::spi::{Transfer, Write as SpiWrite};
    use embedded_hal::digital::v2::OutputPin;

    use super::*;
    use crate::proto::TOKEN_START_BLOCK;
    use crate::{block, command};
    use fat32::BlockDevice;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MockError;

    /// A fake SPI peripheral backed by a scripted queue of response bytes,
    /// with every write simply discarded.
    pub struct MockSpi {
        rx: std::collections::VecDeque<u8>,
    }

    impl MockSpi {
        fn new(rx: std::vec::Vec<u8>) -> Self {
            Self {
                rx: rx.into(),
            }
        }
    }

    impl Transfer<u8> for MockSpi {
        type Error = MockError;
        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], MockError> {
            for w in words.iter_mut() {
                *w = self.rx.pop_front().unwrap_or(0xFF);
            }
            Ok(words)
        }
    }

    impl SpiWrite<u8> for MockSpi {
        type Error = MockError;
        fn write(&mut self, _words: &[u8]) -> Result<(), MockError> {
            Ok(())
        }
    }

    pub struct MockCs;

    impl OutputPin for MockCs {
        type Error = MockError;
        fn set_low(&mut self) -> Result<(), MockError> {
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), MockError> {
            Ok(())
        }
    }

    #[test]
    fn frame_round_trips_through_crc() {
        let frame = command::frame(Cmd::Cmd0, 0);
        assert_eq!(frame, [0x40, 0x00, 0x00, 0x00, 0x00, 0x95]);
    }

    #[test]
    fn r1_is_ok_accepts_only_idle_bit() {
        assert!(r1_is_ok(R1::empty()));
        assert!(r1_is_ok(R1::IN_IDLE_STATE));
        assert!(!r1_is_ok(R1::ILLEGAL_COMMAND));
        assert!(!r1_is_ok(R1::IN_IDLE_STATE | R1::ILLEGAL_COMMAND));
    }

    #[test]
    fn bring_up_fails_cleanly_when_card_never_responds() {
        let spi = MockSpi::new(std::vec![]);
        let mut bus = SpiBus::new(spi, MockCs);
        let err = bring_up::<MockSpi, MockCs, MockError>(&mut bus, true).unwrap_err();
        assert!(matches!(err, InitError::NoResponse(Cmd::Cmd0)));
    }

    #[test]
    fn bring_up_rejects_cmd0_without_idle_bit() {
        let mut rx = std::vec![0x00u8];
        rx.resize(32, 0xFF);
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let err = bring_up::<MockSpi, MockCs, MockError>(&mut bus, true).unwrap_err();
        assert!(matches!(
            err,
            InitError::UnexpectedResponse(Cmd::Cmd0, r1) if r1 == R1::empty()
        ));
    }

    fn scripted(steps: &[&[u8]]) -> std::vec::Vec<u8> {
        steps.iter().flat_map(|s| s.iter().copied()).collect()
    }

    #[test]
    fn bring_up_v2_high_capacity_card() {
        let rx = scripted(&[
            &[0xFF],                      // initial deselect idle clock
            &[0xFF; 10],                  // dummy clocks before CMD0
            &[0x01],                      // CMD0 R1: idle
            &[0xFF],                      // CMD0 end_cmd idle clock
            &[0x01],                      // CMD8 R1: idle
            &[0x00, 0x00, 0x01, 0xAA],    // CMD8 echo: voltage=0x01, pattern=0xAA
            &[0xFF],                      // CMD8 end_cmd
            &[0x01],                      // CMD59 R1: idle
            &[0xFF],                      // CMD59 end_cmd
            &[0x01],                      // CMD55 R1: idle
            &[0xFF],                      // CMD55 end_cmd
            &[0x00],                      // ACMD41 R1: done
            &[0xFF],                      // ACMD41 end_cmd
            &[0x00],                      // CMD58 R1: ok
            &[0xC0, 0xFF, 0x80, 0x00],    // OCR: power-up done, CCS bit set -> HC
            &[0xFF],                      // CMD58 end_cmd
            &[0x00],                      // CMD9 R1: ok
            &[0xFE],                      // CSD data start token
            &[0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0, 0, 0x10, 0x00, 0, 0, 0, 0, 0, 0], // CSD v2, c_size=0x1000
            &[0x00, 0x00],                // CSD trailing CRC16
            &[0xFF],                      // CMD9 end_cmd
        ]);
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let info = bring_up::<MockSpi, MockCs, MockError>(&mut bus, true).unwrap();
        assert_eq!(info.kind(), CardKind::HighCapacity);
        assert_eq!(info.capacity_bytes(), (0x1000u64 + 1) * 512 * 1024);
    }

    #[test]
    fn bring_up_legacy_v1_standard_capacity_card() {
        let rx = scripted(&[
            &[0xFF],
            &[0xFF; 10],
            &[0x01],                   // CMD0 R1: idle
            &[0xFF],
            &[0x05],                   // CMD8 R1: idle | illegal command -> legacy card
            &[0xFF, 0xFF, 0xFF, 0xFF], // echo bytes, unused on the legacy path
            &[0xFF],
            &[0x01],                   // CMD59 R1: idle
            &[0xFF],
            &[0x01],                   // CMD55 R1: idle
            &[0xFF],
            &[0x00],                   // ACMD41 R1: done
            &[0xFF],
            &[0x00],                   // CMD58 R1: ok
            &[0x80, 0xFF, 0x80, 0x00], // OCR: power-up done, CCS bit clear -> SC
            &[0xFF],
            &[0x00],                   // CMD9 R1: ok
            &[0xFE],
            &[0, 0, 0, 0, 0, 9, 3, 0xC0, 0, 3, 0x80, 0, 0, 0, 0, 0], // CSD v1, C_SIZE=0x0F00, MULT=7
            &[0x00, 0x00],
            &[0xFF],
        ]);
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let info = bring_up::<MockSpi, MockCs, MockError>(&mut bus, true).unwrap();
        assert_eq!(info.kind(), CardKind::StandardCapacity);
        assert_eq!(info.capacity_bytes(), (0x0F00u64 + 1) * 512 * 512);
    }

    #[test]
    fn read_block_reports_command_rejection() {
        let mut rx = std::vec![R1::ILLEGAL_COMMAND.bits()];
        rx.resize(16, 0xFF);
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let card = test_card_info();
        let mut buf = [0u8; fat32::BLOCK_SIZE];
        let err = block::read_block::<MockSpi, MockCs, MockError>(&mut bus, card, 0, &mut buf)
            .unwrap_err();
        assert!(matches!(
            err,
            BlockError::CommandRejected(Cmd::Cmd17, r1) if r1 == R1::ILLEGAL_COMMAND
        ));
    }

    #[test]
    fn read_block_fills_buffer_from_data_token() {
        let mut rx = std::vec![0x00u8, TOKEN_START_BLOCK];
        rx.extend(std::vec![0xAB; 512]);
        rx.extend(std::vec![0x00, 0x00]);
        rx.resize(rx.len() + 4, 0xFF);
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let card = test_card_info();
        let mut buf = [0u8; fat32::BLOCK_SIZE];
        block::read_block::<MockSpi, MockCs, MockError>(&mut bus, card, 0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn sd_card_implements_block_device() {
        let mut rx = std::vec![0x00u8, TOKEN_START_BLOCK];
        rx.extend(std::vec![0x11; 512]);
        rx.extend(std::vec![0x00, 0x00]);
        rx.resize(rx.len() + 4, 0xFF);
        let spi = MockSpi::new(rx);
        let bus = SpiBus::new(spi, MockCs);
        let mut card = SdCard::new(bus, test_card_info());
        let mut buf = [0u8; fat32::BLOCK_SIZE];
        BlockDevice::read_block(&mut card, 0, &mut buf).unwrap();
        assert_eq!(buf[0], 0x11);
    }

    #[test]
    fn write_block_clears_guard_window_before_deselect() {
        let mut rx = std::vec![0x00u8]; // CMD24 R1
        rx.push(0x05); // data-response token: accepted
        rx.push(0x01); // busy line clears immediately
        rx.resize(rx.len() + 300, 0xFF); // guard window + deselect idle byte
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let card = test_card_info();
        let buf = [0xCDu8; fat32::BLOCK_SIZE];
        block::write_block::<MockSpi, MockCs, MockError>(&mut bus, card, 0, &buf).unwrap();
    }

    #[test]
    fn write_block_reports_busy_timeout() {
        let mut rx = std::vec![0x00u8, 0x05]; // CMD24 R1, accepted token
        rx.resize(rx.len() + 600, 0x00); // busy line never clears
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let card = test_card_info();
        let buf = [0xCDu8; fat32::BLOCK_SIZE];
        let err = block::write_block::<MockSpi, MockCs, MockError>(&mut bus, card, 0, &buf)
            .unwrap_err();
        assert!(matches!(err, BlockError::CardBusyTimeout));
    }

    #[test]
    fn erase_range_clears_after_busy_wait() {
        let rx = scripted(&[
            &[0x00], // CMD32 R1
            &[0xFF], // CMD32 end_cmd idle byte
            &[0x00], // CMD33 R1
            &[0xFF], // CMD33 end_cmd idle byte
            &[0x00], // CMD38 R1
            &[0x01], // erase busy clears immediately
            &[0xFF; 260], // guard window + end_cmd idle byte
        ]);
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let card = test_card_info();
        block::erase_range::<MockSpi, MockCs, MockError>(&mut bus, card, 0, 1).unwrap();
    }

    #[test]
    fn read_multi_fills_every_block() {
        let mut rx = std::vec![0x00u8]; // CMD18 R1
        for fill in [0x11u8, 0x22u8] {
            rx.push(TOKEN_START_BLOCK);
            rx.extend(std::vec![fill; 512]);
            rx.extend(std::vec![0x00, 0x00]);
        }
        rx.push(0x00); // CMD12 R1
        rx.resize(rx.len() + 4, 0xFF);
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let card = test_card_info();
        let mut bufs = [[0u8; fat32::BLOCK_SIZE]; 2];
        block::read_multi::<MockSpi, MockCs, MockError>(&mut bus, card, 0, &mut bufs).unwrap();
        assert!(bufs[0].iter().all(|&b| b == 0x11));
        assert!(bufs[1].iter().all(|&b| b == 0x22));
    }

    #[test]
    fn write_multi_closes_stream_on_mid_stream_error() {
        let rx = scripted(&[
            &[0x00],             // CMD25 R1
            &[0x0D],             // first block: write error
            &[0x01],             // stop-token busy clears immediately
            &[0xFF; 260],        // guard window + end_cmd idle byte
        ]);
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let card = test_card_info();
        let bufs = [[0xABu8; fat32::BLOCK_SIZE]; 2];
        let err = block::write_multi::<MockSpi, MockCs, MockError>(&mut bus, card, 0, &bufs)
            .unwrap_err();
        assert!(matches!(err, BlockError::WriteError));
    }

    #[test]
    fn num_well_written_decodes_big_endian_count() {
        let rx = scripted(&[
            &[0x01],             // CMD55 R1: idle
            &[0xFF],             // CMD55 end_cmd idle byte
            &[0x00],             // ACMD22 R1
            &[TOKEN_START_BLOCK],
            &[0x00, 0x00, 0x00, 0x07],
            &[0x00, 0x00],
            &[0xFF],
        ]);
        let spi = MockSpi::new(rx);
        let mut bus = SpiBus::new(spi, MockCs);
        let count = block::num_well_written::<MockSpi, MockCs, MockError>(&mut bus).unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn get_response_synthesizes_timeout_after_budget_exhausted() {
        let spi = MockSpi::new(std::vec![]);
        let mut bus = SpiBus::new(spi, MockCs);
        let r1 = crate::proto::get_response::<MockSpi, MockCs, MockError>(&mut bus).unwrap();
        assert!(r1.contains(R1::TIMEOUT));
    }

    #[test]
    fn command_framing_always_carries_a_valid_crc7() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5D_CAFE);
        let all_cmds = [
            Cmd::Cmd0, Cmd::Cmd8, Cmd::Cmd9, Cmd::Cmd10, Cmd::Cmd12, Cmd::Cmd16, Cmd::Cmd17,
            Cmd::Cmd18, Cmd::Acmd22, Cmd::Acmd23, Cmd::Cmd24, Cmd::Cmd25, Cmd::Cmd32, Cmd::Cmd33,
            Cmd::Cmd38, Cmd::Acmd41, Cmd::Cmd55, Cmd::Cmd58, Cmd::Cmd59,
        ];
        for _ in 0..256 {
            let cmd = all_cmds[rng.gen_range(0..all_cmds.len())];
            let arg: u32 = rng.gen();
            let frame = command::frame(cmd, arg);
            assert_eq!(frame[0] & 0xC0, 0x40, "every frame starts with the 01 marker bits");
            assert_eq!(frame[5] & 0x01, 0x01, "CRC byte's stop bit is always set");
            assert_eq!(frame[5], crate::crc::crc7(&frame[0..5]));
        }
    }

    fn test_card_info() -> CardInfo {
        CardInfo::for_test(CardKind::HighCapacity, 2 * 1024 * 1024)
    }
}
