//! STK500v1 command execution against the target.
//!
//! [`Programmer`] owns the frame parser, the ISP driver and the session
//! state. Responses are framed `INSYNC … OK` on success and `INSYNC FAILED`
//! on failure; a bare `NOSYNC` answers framing errors. Responses never carry
//! the 0x20 sentinel; only host→device frames use it.

use embedded_hal::delay::DelayNs;

use crate::devices;
use crate::host::HostIo;
use crate::isp::AvrIsp;
use crate::link::IspLink;
use crate::stk500::{self, Frame, ParseEvent, Parser};

/// Page size assumed until a signature lookup succeeds.
const DEFAULT_PAGE_BYTES: u16 = 128;

// GET_PARAMETER codes. Host tools gate feature assumptions on the returned
// values, so they must stay stable.
const PARAM_HW_VERSION: u8 = 0x80;
const PARAM_SW_MAJOR: u8 = 0x81;
const PARAM_SW_MINOR: u8 = 0x82;

/// Unrecoverable conditions. The caller must stop servicing the session;
/// every recoverable error is already answered on the wire instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// The chip-erase ceiling was hit. Halting protects the target's flash
    /// endurance.
    EraseLimitExceeded,
}

/// The bridge between STK500v1 frames and AVR serial programming.
pub struct Programmer<L, D> {
    isp: AvrIsp<L, D>,
    parser: Parser,
    /// AVR word address cursor; LOAD_ADDRESS sets it, page ops advance it.
    word_address: u32,
    in_programming_mode: bool,
    page_bytes: u16,
}

impl<L: IspLink, D: DelayNs> Programmer<L, D> {
    pub fn new(link: L, delay: D) -> Self {
        Self {
            isp: AvrIsp::new(link, delay),
            parser: Parser::new(),
            word_address: 0,
            in_programming_mode: false,
            page_bytes: DEFAULT_PAGE_BYTES,
        }
    }

    pub fn in_programming_mode(&self) -> bool {
        self.in_programming_mode
    }

    pub fn erase_count(&self) -> u32 {
        self.isp.erase_count()
    }

    pub fn link_mut(&mut self) -> &mut L {
        self.isp.link_mut()
    }

    /// Restore power-on session state. The erase counter survives: it
    /// guards flash wear per power-on, not per host connection.
    pub fn reset_session(&mut self) {
        self.word_address = 0;
        self.in_programming_mode = false;
        self.page_bytes = DEFAULT_PAGE_BYTES;
        self.parser.clear();
    }

    /// Drain pending host bytes and execute every complete frame. Each
    /// frame's full response is flushed before the next frame is decoded.
    pub fn service<H: HostIo>(&mut self, host: &mut H) -> Result<(), Fault> {
        let mut chunk = [0u8; 64];
        loop {
            let n = host.read(&mut chunk);
            if n == 0 {
                break;
            }
            self.parser.feed(&chunk[..n]);
        }

        while let Some(event) = self.parser.next_event() {
            match event {
                ParseEvent::Desync => {
                    host.write_byte(stk500::RESP_NOSYNC);
                    host.flush();
                }
                ParseEvent::Frame(frame) => self.execute(&frame, host)?,
            }
        }
        Ok(())
    }

    fn execute<H: HostIo>(&mut self, frame: &Frame, host: &mut H) -> Result<(), Fault> {
        let payload = frame.payload.as_slice();

        match frame.cmd {
            stk500::CMD_GET_SYNC => Self::reply_ok(host),

            stk500::CMD_GET_SIGN_ON => Self::reply_data(host, stk500::SIGN_ON_ID),

            stk500::CMD_GET_PARAMETER => {
                if payload.len() != 1 {
                    Self::reply_failed(host);
                } else {
                    Self::reply_data(host, &[Self::parameter_value(payload[0])]);
                }
            }

            // Accepted and ignored; avrdude insists on sending them.
            stk500::CMD_SET_PARAMETER | stk500::CMD_SET_DEVICE | stk500::CMD_SET_DEVICE_EXT => {
                Self::reply_ok(host)
            }

            stk500::CMD_ENTER_PROGMODE => self.enter_progmode(host),

            stk500::CMD_LEAVE_PROGMODE => {
                self.in_programming_mode = false;
                self.isp.leave_programming_mode();
                Self::reply_ok(host);
            }

            stk500::CMD_CHIP_ERASE => return self.chip_erase(host),

            stk500::CMD_CHECK_AUTOINC => Self::reply_data(host, &[0x01]),

            stk500::CMD_LOAD_ADDRESS => {
                if payload.len() != 2 {
                    Self::reply_failed(host);
                } else {
                    // (lo, hi) of the word address.
                    self.word_address = ((payload[1] as u32) << 8) | payload[0] as u32;
                    Self::reply_ok(host);
                }
            }

            stk500::CMD_READ_SIGN => {
                let sig = self.isp.read_signature();
                Self::reply_data(host, &sig.0);
            }

            stk500::CMD_UNIVERSAL => {
                if payload.len() != 4 {
                    Self::reply_failed(host);
                } else {
                    let out = self
                        .isp
                        .universal([payload[0], payload[1], payload[2], payload[3]]);
                    Self::reply_data(host, &[out]);
                }
            }

            stk500::CMD_PROG_PAGE => self.prog_page(payload, host),

            stk500::CMD_READ_PAGE => self.read_page(payload, host),

            _ => Self::reply_failed(host),
        }

        Ok(())
    }

    fn enter_progmode<H: HostIo>(&mut self, host: &mut H) {
        match self.isp.enter_programming_mode() {
            Ok(()) => {
                let sig = self.isp.read_signature();
                self.page_bytes = devices::lookup(sig)
                    .map(|d| d.page_bytes)
                    .unwrap_or(DEFAULT_PAGE_BYTES);
                self.in_programming_mode = true;
                Self::reply_ok(host);
            }
            Err(_) => Self::reply_failed(host),
        }
    }

    fn chip_erase<H: HostIo>(&mut self, host: &mut H) -> Result<(), Fault> {
        if !self.in_programming_mode {
            Self::reply_failed(host);
            return Ok(());
        }
        if self.isp.chip_erase().is_err() {
            // Deliberate halt; no reply, the host's timeout reports it.
            return Err(Fault::EraseLimitExceeded);
        }
        Self::reply_ok(host);
        Ok(())
    }

    fn prog_page<H: HostIo>(&mut self, payload: &[u8], host: &mut H) {
        if payload.len() < 3 {
            Self::reply_failed(host);
            return;
        }
        let size = ((payload[0] as usize) << 8) | payload[1] as usize;
        let memtype = payload[2];
        let data = &payload[3..];

        let is_flash = memtype == b'F' || memtype == b'f';
        if !is_flash
            || size != data.len()
            || size > self.page_bytes as usize
            || size > stk500::MAX_PAGE_BYTES
        {
            Self::reply_failed(host);
            return;
        }
        if !self.in_programming_mode {
            Self::reply_failed(host);
            return;
        }

        // Program as little-endian words; avrdude uses even sizes for flash.
        let words = size / 2;
        for j in 0..words {
            let word = ((data[2 * j + 1] as u16) << 8) | data[2 * j] as u16;
            self.isp.load_page_buffer_word(j as u16, word);
        }
        self.isp.commit_page(self.word_address as u16);
        self.word_address += words as u32;
        Self::reply_ok(host);
    }

    fn read_page<H: HostIo>(&mut self, payload: &[u8], host: &mut H) {
        if payload.len() != 3 {
            Self::reply_failed(host);
            return;
        }
        let size = ((payload[0] as usize) << 8) | payload[1] as usize;
        let memtype = payload[2];

        if !(memtype == b'F' || memtype == b'f') || size == 0 || size > stk500::MAX_PAGE_BYTES {
            Self::reply_failed(host);
            return;
        }

        host.write_byte(stk500::RESP_INSYNC);
        for off in 0..size {
            let word = self
                .isp
                .read_program_word((self.word_address + (off / 2) as u32) as u16);
            let byte = if off % 2 == 0 {
                word as u8
            } else {
                (word >> 8) as u8
            };
            host.write_byte(byte);
        }
        host.write_byte(stk500::RESP_OK);
        host.flush();
        // An odd size still consumed its trailing half-word.
        self.word_address += ((size + 1) / 2) as u32;
    }

    fn parameter_value(param: u8) -> u8 {
        match param {
            PARAM_HW_VERSION => 0x02,
            PARAM_SW_MAJOR => 0x01,
            PARAM_SW_MINOR => 0x12,
            _ => 0x00,
        }
    }

    fn reply_ok<H: HostIo>(host: &mut H) {
        host.write(&[stk500::RESP_INSYNC, stk500::RESP_OK]);
        host.flush();
    }

    fn reply_failed<H: HostIo>(host: &mut H) {
        host.write(&[stk500::RESP_INSYNC, stk500::RESP_FAILED]);
        host.flush();
    }

    fn reply_data<H: HostIo>(host: &mut H, payload: &[u8]) {
        host.write_byte(stk500::RESP_INSYNC);
        host.write(payload);
        host.write_byte(stk500::RESP_OK);
        host.flush();
    }
}
