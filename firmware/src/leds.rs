/// Onboard status LED: lit while the target is held in programming mode,
/// blinking after a fatal fault.
use embassy_rp::gpio::Output;

pub struct StatusLed<'d> {
    led: Output<'d>,
}

impl<'d> StatusLed<'d> {
    pub fn new(led: Output<'d>) -> Self {
        Self { led }
    }

    pub fn set(&mut self, on: bool) {
        if on {
            self.led.set_high();
        } else {
            self.led.set_low();
        }
    }

    pub fn toggle(&mut self) {
        self.led.toggle();
    }
}
