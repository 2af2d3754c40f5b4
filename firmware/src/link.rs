//! ISP link back-ends: hardware SPI0 and GPIO bit-bang.
//!
//! Both produce identical wire behaviour for 4-byte mode-0 MSB-first
//! transactions; the `bitbang-spi` cargo feature picks which one `main`
//! constructs.

#[cfg(not(feature = "bitbang-spi"))]
pub use hw::HwSpiLink;

#[cfg(not(feature = "bitbang-spi"))]
mod hw {
    use embassy_rp::gpio::Output;
    use embassy_rp::peripherals::SPI0;
    use embassy_rp::spi::{Blocking, Spi};
    use embedded_hal::spi::SpiBus;

    use picoisp_core::IspLink;

    // Speed is expressed as the SCK half-period in microseconds on the link
    // trait; the peripheral wants Hz.
    fn half_period_to_hz(half_period_us: u32) -> u32 {
        500_000 / half_period_us.max(1)
    }

    fn hz_to_half_period(freq_hz: u32) -> u32 {
        (500_000 / freq_hz.max(1)).max(1)
    }

    /// SPI0-backed link. The peripheral clocks the four wires; this struct
    /// adds the RESET line and runtime prescaler control.
    pub struct HwSpiLink<'d> {
        spi: Spi<'d, SPI0, Blocking>,
        reset: Output<'d>,
        half_period_us: u32,
    }

    impl<'d> HwSpiLink<'d> {
        pub fn new(spi: Spi<'d, SPI0, Blocking>, reset: Output<'d>, freq_hz: u32) -> Self {
            Self {
                spi,
                reset,
                half_period_us: hz_to_half_period(freq_hz),
            }
        }

        /// Change the SPI bus frequency by writing the PL022 prescaler
        /// registers directly.  `freq_hz` is the desired clock; the actual
        /// clock will be the closest achievable value that does not exceed
        /// it.
        fn set_frequency(&mut self, freq_hz: u32) {
            // RP2040 peripheral clock — 125 MHz at default clocks.
            let peri_clk: u32 = 125_000_000;

            // PL022 baud = peri_clk / (CPSDVSR * (1 + SCR))
            //   CPSDVSR: even, 2..=254
            //   SCR:     0..=255
            let (cpsdvsr, scr) = Self::calc_prescalers(peri_clk, freq_hz);

            let spi0 = embassy_rp::pac::SPI0;
            spi0.cpsr().write(|w| w.set_cpsdvsr(cpsdvsr));
            spi0.cr0().modify(|w| w.set_scr(scr));
        }

        fn calc_prescalers(peri_clk: u32, target: u32) -> (u8, u8) {
            // Walk even prescaler values, pick the combination whose actual
            // frequency is the highest that doesn't exceed `target`.
            let mut best_cpsdvsr: u8 = 254;
            let mut best_scr: u8 = 255;

            let mut cpsdvsr: u32 = 2;
            while cpsdvsr <= 254 {
                let divisor = cpsdvsr * target;
                if divisor == 0 {
                    cpsdvsr += 2;
                    continue;
                }
                let scr = peri_clk.div_ceil(divisor);
                let scr = if scr == 0 { 0 } else { scr - 1 };
                if scr <= 255 {
                    best_cpsdvsr = cpsdvsr as u8;
                    best_scr = scr as u8;
                    break; // first valid pair is the fastest ≤ target
                }
                cpsdvsr += 2;
            }

            (best_cpsdvsr, best_scr)
        }
    }

    impl IspLink for HwSpiLink<'_> {
        fn transfer(&mut self, tx: [u8; 4]) -> [u8; 4] {
            let mut rx = [0u8; 4];
            SpiBus::transfer(&mut self.spi, &mut rx, &tx).ok();
            rx
        }

        fn reset_assert(&mut self) {
            self.reset.set_low();
        }

        fn reset_release(&mut self) {
            self.reset.set_high();
        }

        fn set_speed(&mut self, half_period_us: u32) {
            self.half_period_us = half_period_us.max(1);
            self.set_frequency(half_period_to_hz(self.half_period_us));
        }

        fn get_speed(&self) -> u32 {
            self.half_period_us
        }
    }
}

#[cfg(feature = "bitbang-spi")]
pub use bitbang::BitbangLink;

#[cfg(feature = "bitbang-spi")]
mod bitbang {
    use embassy_rp::gpio::{Input, Output};
    use embassy_time::{block_for, Duration};

    use picoisp_core::IspLink;

    /// Software-timed link on arbitrary GPIOs. Mode 0: SCK idles low, the
    /// target samples MOSI on the rising edge, we sample MISO on the same
    /// edge.
    pub struct BitbangLink<'d> {
        mosi: Output<'d>,
        sck: Output<'d>,
        miso: Input<'d>,
        reset: Output<'d>,
        half_period_us: u32,
    }

    impl<'d> BitbangLink<'d> {
        pub fn new(
            mosi: Output<'d>,
            sck: Output<'d>,
            miso: Input<'d>,
            reset: Output<'d>,
            half_period_us: u32,
        ) -> Self {
            Self {
                mosi,
                sck,
                miso,
                reset,
                half_period_us: half_period_us.max(1),
            }
        }

        fn half_delay(&self) {
            block_for(Duration::from_micros(self.half_period_us as u64));
        }

        fn transfer_byte(&mut self, tx: u8) -> u8 {
            let mut rx = 0u8;
            for bit in (0..8).rev() {
                if tx & (1 << bit) != 0 {
                    self.mosi.set_high();
                } else {
                    self.mosi.set_low();
                }
                self.half_delay();

                self.sck.set_high();
                if self.miso.is_high() {
                    rx |= 1 << bit;
                }
                self.half_delay();

                self.sck.set_low();
            }
            rx
        }
    }

    impl IspLink for BitbangLink<'_> {
        fn transfer(&mut self, tx: [u8; 4]) -> [u8; 4] {
            let mut rx = [0u8; 4];
            for (r, &t) in rx.iter_mut().zip(tx.iter()) {
                *r = self.transfer_byte(t);
            }
            rx
        }

        fn reset_assert(&mut self) {
            self.reset.set_low();
        }

        fn reset_release(&mut self) {
            self.reset.set_high();
        }

        fn set_speed(&mut self, half_period_us: u32) {
            self.half_period_us = half_period_us.max(1);
        }

        fn get_speed(&self) -> u32 {
            self.half_period_us
        }
    }
}
