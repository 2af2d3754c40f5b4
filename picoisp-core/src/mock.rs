//! Test doubles: a scripted AVR target behind [`IspLink`] and an in-memory
//! host channel.

use embedded_hal::delay::DelayNs;
use heapless::Vec;

use crate::host::HostIo;
use crate::link::IspLink;

pub const MOCK_FLASH_WORDS: usize = 1024;
const MOCK_BUFFER_WORDS: usize = 128;

/// Behavioural stand-in for an AVR target on the far end of the link.
///
/// Models exactly what the driver relies on: the echo rule of the serial
/// programming wire (each response byte repeats the previously transmitted
/// byte, the fourth carries read data), the programming-enable handshake,
/// the temporary page buffer, commits and word reads. A commit lands the
/// buffered words at the commit address, since the bridge always fills the
/// buffer from word 0.
pub struct MockLink {
    pub sig: [u8; 3],
    pub reset_asserted: bool,
    pub prog_enabled: bool,
    /// Enable attempts to swallow before echoing 0x53.
    pub enable_failures: u32,
    pub flash: [u16; MOCK_FLASH_WORDS],
    pub commits: Vec<u16, 64>,
    /// Total 4-byte transactions seen.
    pub transfers: usize,
    pub fuse_low: u8,
    buffer: [u16; MOCK_BUFFER_WORDS],
    loaded_words: usize,
    half_period_us: u32,
}

impl MockLink {
    pub fn atmega328p() -> Self {
        Self {
            sig: [0x1E, 0x95, 0x0F],
            reset_asserted: false,
            prog_enabled: false,
            enable_failures: 0,
            flash: [0xFFFF; MOCK_FLASH_WORDS],
            commits: Vec::new(),
            transfers: 0,
            fuse_low: 0xE2,
            buffer: [0xFFFF; MOCK_BUFFER_WORDS],
            loaded_words: 0,
            half_period_us: 10,
        }
    }

    pub fn attiny85() -> Self {
        Self {
            sig: [0x1E, 0x93, 0x0B],
            ..Self::atmega328p()
        }
    }

    fn word_address(tx: &[u8; 4]) -> usize {
        (((tx[1] as usize) << 8) | tx[2] as usize) % MOCK_FLASH_WORDS
    }
}

impl IspLink for MockLink {
    fn transfer(&mut self, tx: [u8; 4]) -> [u8; 4] {
        self.transfers += 1;
        let mut rx = [0x00, tx[0], tx[1], tx[2]];

        match (tx[0], tx[1]) {
            (0xAC, 0x53) => {
                if self.enable_failures > 0 {
                    self.enable_failures -= 1;
                    rx[2] = 0x00;
                } else if self.reset_asserted {
                    self.prog_enabled = true;
                } else {
                    rx[2] = 0x00;
                }
            }
            (0xAC, 0x80) => {
                self.flash = [0xFFFF; MOCK_FLASH_WORDS];
            }
            (0x30, _) => {
                rx[3] = self.sig[(tx[2] as usize) % 3];
            }
            (0x40, _) => {
                let idx = Self::word_address(&tx) % MOCK_BUFFER_WORDS;
                self.buffer[idx] = (self.buffer[idx] & 0xFF00) | tx[3] as u16;
                self.loaded_words = self.loaded_words.max(idx + 1);
            }
            (0x48, _) => {
                let idx = Self::word_address(&tx) % MOCK_BUFFER_WORDS;
                self.buffer[idx] = (self.buffer[idx] & 0x00FF) | ((tx[3] as u16) << 8);
                self.loaded_words = self.loaded_words.max(idx + 1);
            }
            (0x4C, _) => {
                let addr = Self::word_address(&tx);
                self.commits.push(addr as u16).ok();
                for i in 0..self.loaded_words {
                    self.flash[(addr + i) % MOCK_FLASH_WORDS] = self.buffer[i];
                }
                self.buffer = [0xFFFF; MOCK_BUFFER_WORDS];
                self.loaded_words = 0;
            }
            (0x20, _) => {
                rx[3] = self.flash[Self::word_address(&tx)] as u8;
            }
            (0x28, _) => {
                rx[3] = (self.flash[Self::word_address(&tx)] >> 8) as u8;
            }
            (0x50, 0x00) => {
                rx[3] = self.fuse_low;
            }
            _ => {}
        }

        rx
    }

    fn reset_assert(&mut self) {
        self.reset_asserted = true;
    }

    fn reset_release(&mut self) {
        self.reset_asserted = false;
        self.prog_enabled = false;
    }

    fn set_speed(&mut self, half_period_us: u32) {
        self.half_period_us = half_period_us.max(1);
    }

    fn get_speed(&self) -> u32 {
        self.half_period_us
    }
}

/// Delay that does not wait; settle times are irrelevant off-target.
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// In-memory host channel: tests queue host→device bytes with `push` and
/// inspect the accumulated response stream in `tx`.
pub struct MockHost {
    rx: Vec<u8, 2048>,
    pub tx: Vec<u8, 4096>,
    pub flushes: usize,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            rx: Vec::new(),
            tx: Vec::new(),
            flushes: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.rx.extend_from_slice(bytes).unwrap();
    }

    pub fn take_tx(&mut self) -> Vec<u8, 4096> {
        core::mem::take(&mut self.tx)
    }
}

impl HostIo for MockHost {
    fn poll(&mut self) -> usize {
        self.rx.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.rx.len());
        buf[..n].copy_from_slice(&self.rx[..n]);
        self.rx.copy_within(n.., 0);
        let rest = self.rx.len() - n;
        self.rx.truncate(rest);
        n
    }

    fn write(&mut self, bytes: &[u8]) {
        self.tx.extend_from_slice(bytes).unwrap();
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}
