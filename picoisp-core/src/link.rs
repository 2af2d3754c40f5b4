//! SPI link capability for the AVR serial-programming wire.

/// Four-wire link to the target: MOSI/MISO/SCK plus the RESET line.
///
/// Transactions are SPI mode 0 (clock idles low, sample on the rising edge),
/// MSB first, in the 50–200 kHz range AVR serial programming expects. The
/// hardware-peripheral and bit-banged back-ends are interchangeable behind
/// this trait; nothing above it observes which is in use.
pub trait IspLink {
    /// Full-duplex 4-byte exchange. The returned bytes are what the target
    /// clocked out during the same transaction.
    fn transfer(&mut self, tx: [u8; 4]) -> [u8; 4];

    /// Drive RESET low, holding the target in reset.
    fn reset_assert(&mut self);

    /// Drive RESET high, letting the target run.
    fn reset_release(&mut self);

    /// Adjust the bit clock. `half_period_us` is half the SCK period in
    /// microseconds; back-ends clamp to what they can achieve.
    fn set_speed(&mut self, half_period_us: u32);

    /// Current SCK half-period in microseconds.
    fn get_speed(&self) -> u32;
}
