//! STK500v1 framing: command constants and the byte-stream parser.
//!
//! Host→device frames are `CMD | payload | 0x20`; the 0x20 sentinel
//! ("Sync_CRC_EOP") terminates every frame. PROG_PAGE carries a
//! length-prefixed body, everything else is fixed-size. Responses never
//! include the sentinel.

use heapless::Vec;

// Command bytes, the subset avrdude's arduino programmer type uses.
pub const CMD_GET_SYNC: u8 = 0x30;
pub const CMD_GET_SIGN_ON: u8 = 0x31;
pub const CMD_SET_PARAMETER: u8 = 0x40;
pub const CMD_GET_PARAMETER: u8 = 0x41;
pub const CMD_SET_DEVICE: u8 = 0x42;
pub const CMD_SET_DEVICE_EXT: u8 = 0x45;
pub const CMD_ENTER_PROGMODE: u8 = 0x50;
pub const CMD_LEAVE_PROGMODE: u8 = 0x51;
pub const CMD_CHIP_ERASE: u8 = 0x52;
pub const CMD_CHECK_AUTOINC: u8 = 0x53;
pub const CMD_LOAD_ADDRESS: u8 = 0x55;
pub const CMD_UNIVERSAL: u8 = 0x56;
pub const CMD_PROG_PAGE: u8 = 0x64;
pub const CMD_READ_PAGE: u8 = 0x74;
pub const CMD_READ_SIGN: u8 = 0x75;

/// End-of-packet sentinel on host→device frames.
pub const SYNC_CRC_EOP: u8 = 0x20;

// Response bytes.
pub const RESP_INSYNC: u8 = 0x14;
pub const RESP_OK: u8 = 0x10;
pub const RESP_FAILED: u8 = 0x11;
pub const RESP_NOSYNC: u8 = 0x15;

/// Sign-on identification payload.
pub const SIGN_ON_ID: &[u8] = b"AVR ISP";

/// Upper bound on a single page operation, independent of device profile.
pub const MAX_PAGE_BYTES: usize = 256;

/// Largest frame payload: PROG_PAGE's 3-byte header plus a full page body.
pub const MAX_PAYLOAD: usize = 3 + MAX_PAGE_BYTES;

/// Accumulator capacity; bytes past it are dropped at the tail.
pub const RX_CAPACITY: usize = 1024;

/// One complete host→device frame, command split out and sentinel stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: u8,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

/// Outcome of one step of the decode loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// A structurally valid frame, already consumed from the accumulator.
    Frame(Frame),
    /// A sized frame arrived without its sentinel; the stream was resynced
    /// past the next 0x20 and the host must be told with [`RESP_NOSYNC`].
    Desync,
}

/// Pull-based frame recogniser over a bounded accumulator.
///
/// [`feed`](Parser::feed) appends raw host bytes;
/// [`next_event`](Parser::next_event) drops noise, resyncs and extracts one
/// frame at a time. There is no per-command state: each step restarts from
/// the head of the buffer with a length looked up from the command byte.
#[derive(Debug, Default)]
pub struct Parser {
    rx: Vec<u8, RX_CAPACITY>,
}

impl Parser {
    pub fn new() -> Self {
        Self { rx: Vec::new() }
    }

    /// Append host bytes. Bytes past the accumulator capacity are dropped;
    /// the host's own timeout recovers such a session.
    pub fn feed(&mut self, data: &[u8]) {
        let room = RX_CAPACITY - self.rx.len();
        let take = data.len().min(room);
        self.rx.extend_from_slice(&data[..take]).ok();
    }

    /// Buffered byte count.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.rx.clear();
    }

    fn drop_front(&mut self, n: usize) {
        let n = n.min(self.rx.len());
        self.rx.copy_within(n.., 0);
        let rest = self.rx.len() - n;
        self.rx.truncate(rest);
    }

    /// Expected total frame length for `cmd`, sentinel included. `None` for
    /// unknown commands; PROG_PAGE is sized separately from its header.
    fn fixed_len(cmd: u8) -> Option<usize> {
        match cmd {
            CMD_GET_SYNC | CMD_GET_SIGN_ON | CMD_ENTER_PROGMODE | CMD_LEAVE_PROGMODE
            | CMD_CHIP_ERASE | CMD_CHECK_AUTOINC | CMD_READ_SIGN => Some(2),
            CMD_GET_PARAMETER => Some(3),
            CMD_SET_PARAMETER | CMD_LOAD_ADDRESS => Some(4),
            CMD_READ_PAGE => Some(5),
            CMD_UNIVERSAL => Some(6),
            CMD_SET_DEVICE_EXT => Some(7),
            CMD_SET_DEVICE => Some(22),
            _ => None,
        }
    }

    /// Advance the decode loop: drop noise, resync, or extract one frame.
    /// `None` means the head of the stream is an incomplete frame and more
    /// bytes are needed.
    pub fn next_event(&mut self) -> Option<ParseEvent> {
        loop {
            if self.rx.is_empty() {
                return None;
            }

            // Stray sentinel left over from an earlier desync.
            if self.rx[0] == SYNC_CRC_EOP {
                self.drop_front(1);
                continue;
            }

            let cmd = self.rx[0];
            let needed = if cmd == CMD_PROG_PAGE {
                // Total length hides behind the size header.
                if self.rx.len() < 4 {
                    return None;
                }
                let size = ((self.rx[1] as usize) << 8) | self.rx[2] as usize;
                if size > MAX_PAGE_BYTES {
                    self.drop_front(1);
                    continue;
                }
                1 + 3 + size + 1
            } else {
                match Self::fixed_len(cmd) {
                    Some(n) => n,
                    None => {
                        // Unknown byte: line noise, dropped without a reply.
                        self.drop_front(1);
                        continue;
                    }
                }
            };

            if self.rx.len() < needed {
                return None;
            }

            if self.rx[needed - 1] != SYNC_CRC_EOP {
                // Sized frame without its sentinel: resync past the next
                // one, or a single byte if none is buffered.
                match self.rx.iter().position(|&b| b == SYNC_CRC_EOP) {
                    Some(idx) => self.drop_front(idx + 1),
                    None => self.drop_front(1),
                }
                return Some(ParseEvent::Desync);
            }

            let mut payload = Vec::new();
            payload.extend_from_slice(&self.rx[1..needed - 1]).ok();
            let frame = Frame { cmd, payload };
            self.drop_front(needed);
            return Some(ParseEvent::Frame(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(parser: &mut Parser) -> Frame {
        match parser.next_event() {
            Some(ParseEvent::Frame(f)) => f,
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn parses_bare_command() {
        let mut p = Parser::new();
        p.feed(&[CMD_GET_SYNC, SYNC_CRC_EOP]);
        let f = frame(&mut p);
        assert_eq!(f.cmd, CMD_GET_SYNC);
        assert!(f.payload.is_empty());
        assert_eq!(p.next_event(), None);
    }

    #[test]
    fn waits_for_complete_frame() {
        let mut p = Parser::new();
        p.feed(&[CMD_LOAD_ADDRESS, 0x10]);
        assert_eq!(p.next_event(), None);
        assert_eq!(p.pending(), 2);

        p.feed(&[0x00, SYNC_CRC_EOP]);
        let f = frame(&mut p);
        assert_eq!(f.cmd, CMD_LOAD_ADDRESS);
        assert_eq!(f.payload.as_slice(), &[0x10, 0x00]);
    }

    #[test]
    fn drops_stray_sentinels() {
        let mut p = Parser::new();
        p.feed(&[SYNC_CRC_EOP, SYNC_CRC_EOP, CMD_GET_SYNC, SYNC_CRC_EOP]);
        assert_eq!(frame(&mut p).cmd, CMD_GET_SYNC);
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn unknown_bytes_dropped_silently() {
        let mut p = Parser::new();
        p.feed(&[0xFF, 0xAA, 0xBB, CMD_GET_SYNC, SYNC_CRC_EOP]);
        // Noise produces no event at all, only the valid frame.
        assert_eq!(frame(&mut p).cmd, CMD_GET_SYNC);
        assert_eq!(p.next_event(), None);
    }

    #[test]
    fn missing_sentinel_desyncs_past_next_eop() {
        let mut p = Parser::new();
        // LOAD_ADDRESS whose fourth byte is not the sentinel.
        p.feed(&[CMD_LOAD_ADDRESS, 0x10, 0x00, 0xFF]);
        p.feed(&[CMD_GET_SYNC, SYNC_CRC_EOP]);

        assert_eq!(p.next_event(), Some(ParseEvent::Desync));
        // Resync consumed up to and including the next 0x20, taking the
        // trailing GET_SYNC frame with it.
        assert_eq!(p.next_event(), None);
        assert_eq!(p.pending(), 0);

        // A fresh frame afterwards parses cleanly.
        p.feed(&[CMD_GET_SYNC, SYNC_CRC_EOP]);
        assert_eq!(frame(&mut p).cmd, CMD_GET_SYNC);
    }

    #[test]
    fn desync_without_sentinel_drops_one_byte() {
        let mut p = Parser::new();
        p.feed(&[CMD_LOAD_ADDRESS, 0x10, 0x00, 0xFF]);
        assert_eq!(p.next_event(), Some(ParseEvent::Desync));
        // Only the head byte went; the rest re-parses as noise.
        assert_eq!(p.pending(), 3);
    }

    #[test]
    fn prog_page_waits_for_size_header() {
        let mut p = Parser::new();
        p.feed(&[CMD_PROG_PAGE, 0x00]);
        assert_eq!(p.next_event(), None);

        p.feed(&[0x04, b'F']);
        assert_eq!(p.next_event(), None);

        p.feed(&[0xDE, 0xAD, 0xBE, 0xEF, SYNC_CRC_EOP]);
        let f = frame(&mut p);
        assert_eq!(f.cmd, CMD_PROG_PAGE);
        assert_eq!(f.payload.as_slice(), &[0x00, 0x04, b'F', 0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn prog_page_oversize_header_is_noise() {
        let mut p = Parser::new();
        // size = 0x0200 > 256: treated as desynced noise, one byte dropped.
        p.feed(&[CMD_PROG_PAGE, 0x02, 0x00, b'F']);
        p.feed(&[CMD_GET_SYNC, SYNC_CRC_EOP]);
        assert_eq!(frame(&mut p).cmd, CMD_GET_SYNC);
    }

    #[test]
    fn frames_parse_in_arrival_order() {
        let mut p = Parser::new();
        p.feed(&[CMD_GET_SYNC, SYNC_CRC_EOP, CMD_GET_SIGN_ON, SYNC_CRC_EOP]);
        assert_eq!(frame(&mut p).cmd, CMD_GET_SYNC);
        assert_eq!(frame(&mut p).cmd, CMD_GET_SIGN_ON);
        assert_eq!(p.next_event(), None);
    }

    #[test]
    fn overflow_drops_tail_bytes() {
        let mut p = Parser::new();
        let junk = [0u8; RX_CAPACITY + 100];
        p.feed(&junk);
        assert_eq!(p.pending(), RX_CAPACITY);
        // Still functional once drained.
        while p.next_event().is_some() {}
        p.feed(&[CMD_GET_SYNC, SYNC_CRC_EOP]);
        assert_eq!(frame(&mut p).cmd, CMD_GET_SYNC);
    }

    #[test]
    fn set_device_length() {
        let mut p = Parser::new();
        let mut buf = [0u8; 22];
        buf[0] = CMD_SET_DEVICE;
        buf[21] = SYNC_CRC_EOP;
        p.feed(&buf);
        let f = frame(&mut p);
        assert_eq!(f.cmd, CMD_SET_DEVICE);
        assert_eq!(f.payload.len(), 20);
    }
}
