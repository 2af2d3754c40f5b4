//! AVR serial-programming driver.
//!
//! Every operation is built from 4-byte SPI transactions against a target
//! held in reset. The only protocol-level acknowledgement on this wire is
//! the 0x53 echo during programming enable; everything else is fire-and-wait
//! with datasheet settle times.

use embedded_hal::delay::DelayNs;

use crate::devices::Signature;
use crate::link::IspLink;

// Serial-programming instruction bytes.
const OP_PROG_ENABLE: [u8; 4] = [0xAC, 0x53, 0x00, 0x00];
const OP_CHIP_ERASE: [u8; 4] = [0xAC, 0x80, 0x00, 0x00];
const OP_READ_SIGNATURE: u8 = 0x30;
const OP_LOAD_PAGE_LOW: u8 = 0x40;
const OP_LOAD_PAGE_HIGH: u8 = 0x48;
const OP_WRITE_PAGE: u8 = 0x4C;
const OP_READ_FLASH_LOW: u8 = 0x20;
const OP_READ_FLASH_HIGH: u8 = 0x28;

/// The target repeats this byte in the third response position once the
/// programming-enable handshake has synchronised.
const PROG_ENABLE_ECHO: u8 = 0x53;

const PROG_ENABLE_ATTEMPTS: u32 = 8;
const PROG_ENABLE_BACKOFF_MS: u32 = 10;

/// Settle after toggling RESET.
const RESET_SETTLE_MS: u32 = 2;

// Worst-case flash timing, rounded up.
const CHIP_ERASE_MS: u32 = 9;
const PAGE_WRITE_MS: u32 = 5;

const RESET_PULSE_MS: u32 = 20;

/// Chip erases allowed per power-on. Flash endurance is ~10k cycles; past
/// this ceiling the driver refuses to erase at all.
pub const ERASE_CEILING: u32 = 200;

/// Driver-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IspError {
    /// Programming-enable handshake never echoed 0x53.
    EnterFailed,
    /// The erase ceiling was reached; no SPI traffic was issued.
    EraseLimit,
}

/// AVR ISP command engine over an [`IspLink`].
pub struct AvrIsp<L, D> {
    link: L,
    delay: D,
    erase_count: u32,
}

impl<L: IspLink, D: DelayNs> AvrIsp<L, D> {
    pub fn new(link: L, delay: D) -> Self {
        Self {
            link,
            delay,
            erase_count: 0,
        }
    }

    /// Chip erases performed since power-on.
    pub fn erase_count(&self) -> u32 {
        self.erase_count
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Raw 4-byte passthrough; returns the fourth response byte. The host
    /// tool uses this escape to read fuses and lock bits.
    pub fn universal(&mut self, cmd: [u8; 4]) -> u8 {
        self.link.transfer(cmd)[3]
    }

    /// Full reset pulse: 20 ms asserted, 20 ms released.
    pub fn reset_pulse(&mut self) {
        self.link.reset_assert();
        self.delay.delay_ms(RESET_PULSE_MS);
        self.link.reset_release();
        self.delay.delay_ms(RESET_PULSE_MS);
    }

    /// Toggle RESET and run the programming-enable handshake, re-toggling
    /// and backing off between attempts. On failure the target is released
    /// to run.
    pub fn enter_programming_mode(&mut self) -> Result<(), IspError> {
        self.link.reset_release();
        self.delay.delay_ms(RESET_SETTLE_MS);
        self.link.reset_assert();

        for attempt in 0..PROG_ENABLE_ATTEMPTS {
            if attempt > 0 {
                self.delay.delay_ms(PROG_ENABLE_BACKOFF_MS);
                self.link.reset_release();
                self.delay.delay_ms(RESET_SETTLE_MS);
                self.link.reset_assert();
            }

            let rx = self.link.transfer(OP_PROG_ENABLE);
            if rx[2] == PROG_ENABLE_ECHO {
                return Ok(());
            }
        }

        self.link.reset_release();
        self.delay.delay_ms(RESET_SETTLE_MS);
        Err(IspError::EnterFailed)
    }

    /// Release RESET so the target runs its program.
    pub fn leave_programming_mode(&mut self) {
        self.link.reset_release();
        self.delay.delay_ms(RESET_SETTLE_MS);
    }

    /// Read the 3-byte device signature.
    pub fn read_signature(&mut self) -> Signature {
        let mut sig = [0u8; 3];
        for (i, byte) in sig.iter_mut().enumerate() {
            let rx = self
                .link
                .transfer([OP_READ_SIGNATURE, 0x00, i as u8, 0x00]);
            *byte = rx[3];
        }
        Signature(sig)
    }

    /// Erase flash and EEPROM. Refused without SPI traffic once the erase
    /// ceiling is reached.
    pub fn chip_erase(&mut self) -> Result<(), IspError> {
        if self.erase_count >= ERASE_CEILING {
            return Err(IspError::EraseLimit);
        }
        self.link.transfer(OP_CHIP_ERASE);
        self.delay.delay_ms(CHIP_ERASE_MS);
        self.erase_count += 1;
        Ok(())
    }

    /// Load one byte of a word into the on-target page buffer. `word_index`
    /// is the offset in words from the start of the page.
    pub fn load_page_buffer_byte(&mut self, word_index: u16, high: bool, byte: u8) {
        let op = if high {
            OP_LOAD_PAGE_HIGH
        } else {
            OP_LOAD_PAGE_LOW
        };
        self.link
            .transfer([op, (word_index >> 8) as u8, word_index as u8, byte]);
    }

    /// Load a full word into the page buffer, low byte first as the buffer
    /// requires.
    pub fn load_page_buffer_word(&mut self, word_index: u16, word: u16) {
        self.load_page_buffer_byte(word_index, false, word as u8);
        self.load_page_buffer_byte(word_index, true, (word >> 8) as u8);
    }

    /// Load a slice of words starting at word 0 of the page buffer.
    pub fn load_page_buffer(&mut self, words: &[u16]) {
        for (i, &word) in words.iter().enumerate() {
            self.load_page_buffer_word(i as u16, word);
        }
    }

    /// Commit the page buffer to flash. `word_address` may be any word
    /// address within the target page.
    pub fn commit_page(&mut self, word_address: u16) {
        self.link.transfer([
            OP_WRITE_PAGE,
            (word_address >> 8) as u8,
            word_address as u8,
            0x00,
        ]);
        self.delay.delay_ms(PAGE_WRITE_MS);
    }

    /// Read one byte of a program word.
    pub fn read_program_byte(&mut self, word_address: u16, high: bool) -> u8 {
        let op = if high {
            OP_READ_FLASH_HIGH
        } else {
            OP_READ_FLASH_LOW
        };
        self.link.transfer([
            op,
            (word_address >> 8) as u8,
            word_address as u8,
            0x00,
        ])[3]
    }

    /// Read a complete 16-bit program word.
    pub fn read_program_word(&mut self, word_address: u16) -> u16 {
        let low = self.read_program_byte(word_address, false) as u16;
        let high = self.read_program_byte(word_address, true) as u16;
        (high << 8) | low
    }

    /// Word-by-word readback against `expected`; false on the first
    /// mismatch.
    pub fn verify_range(&mut self, start_word: u16, expected: &[u16]) -> bool {
        for (i, &want) in expected.iter().enumerate() {
            if self.read_program_word(start_word + i as u16) != want {
                return false;
            }
        }
        true
    }
}
