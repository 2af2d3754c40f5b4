//! Protocol-translation core of an STK500v1 → AVR ISP bridge.
//!
//! A host flashing tool (avrdude with `-c arduino`) speaks the STK500v1
//! framed protocol over a virtual serial port; this crate translates each
//! frame into AVR serial-programming SPI transactions against a target held
//! in reset, and produces the response bytes.
//!
//! Hardware sits behind two small traits: [`IspLink`] (the SPI wire plus the
//! RESET line) and [`HostIo`] (the byte channel to the host). Everything
//! above them is portable and tested on the host: framing, dispatch, the
//! programming state machine and the device table.

#![no_std]
#![deny(unsafe_code)]

pub mod devices;
pub mod host;
pub mod isp;
pub mod link;
pub mod programmer;
pub mod stk500;

#[cfg(test)]
pub(crate) mod mock;

pub use devices::{lookup, DeviceProfile, Signature};
pub use host::HostIo;
pub use isp::{AvrIsp, IspError};
pub use link::IspLink;
pub use programmer::{Fault, Programmer};
