#![no_std]
#![no_main]

mod config;
mod leds;
mod link;
mod usb_io;

use defmt::*;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::{Driver, InterruptHandler};
use embassy_time::{Delay, Timer};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::Builder;
use panic_probe as _;
use static_cell::StaticCell;

use picoisp_core::{Fault, Programmer};

use crate::config::*;
use crate::leds::StatusLed;
use crate::usb_io::CdcHost;

#[cfg(not(feature = "bitbang-spi"))]
use embassy_rp::spi::{self, Spi};

#[cfg(feature = "bitbang-spi")]
use embassy_rp::gpio::{Input, Pull};

// =============================================================================
// Interrupt bindings
// =============================================================================

bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => InterruptHandler<USB>;
});

// =============================================================================
// USB device / link type aliases
// =============================================================================

type UsbDriver = Driver<'static, USB>;

#[cfg(not(feature = "bitbang-spi"))]
type SelectedLink = link::HwSpiLink<'static>;
#[cfg(feature = "bitbang-spi")]
type SelectedLink = link::BitbangLink<'static>;

// =============================================================================
// Entry point
// =============================================================================

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());

    info!("picoisp starting up");

    // ---- ISP link ----
    //
    // Wiring (either back-end): SCK=GP18, MOSI=GP19, MISO=GP16, RESET=GP20.
    // RESET starts released (high): the target runs until ENTER_PROGMODE.
    #[cfg(not(feature = "bitbang-spi"))]
    let isp_link = {
        let mut spi_config = spi::Config::default();
        spi_config.frequency = DEFAULT_SPI_FREQ_HZ;
        spi_config.phase = spi::Phase::CaptureOnFirstTransition;
        spi_config.polarity = spi::Polarity::IdleLow;

        let spi = Spi::new_blocking(p.SPI0, p.PIN_18, p.PIN_19, p.PIN_16, spi_config);
        let reset = Output::new(p.PIN_20, Level::High);
        link::HwSpiLink::new(spi, reset, DEFAULT_SPI_FREQ_HZ)
    };

    #[cfg(feature = "bitbang-spi")]
    let isp_link = {
        let sck = Output::new(p.PIN_18, Level::Low); // mode 0: clock idles low
        let mosi = Output::new(p.PIN_19, Level::Low);
        let miso = Input::new(p.PIN_16, Pull::Up);
        let reset = Output::new(p.PIN_20, Level::High);
        link::BitbangLink::new(mosi, sck, miso, reset, DEFAULT_BIT_HALF_PERIOD_US)
    };

    let programmer = Programmer::new(isp_link, Delay);

    // ---- Status LED ----
    let led = StatusLed::new(Output::new(p.PIN_25, Level::Low));

    // ---- USB driver ----
    let driver = Driver::new(p.USB, Irqs);

    let mut usb_config = embassy_usb::Config::new(USB_VID, USB_PID);
    usb_config.manufacturer = Some(USB_MANUFACTURER);
    usb_config.product = Some(USB_PRODUCT);
    usb_config.serial_number = Some(USB_SERIAL);
    usb_config.max_power = 100;
    usb_config.max_packet_size_0 = 64;

    // Descriptor buffers (must be 'static)
    static CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
    static MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        usb_config,
        CONFIG_DESC.init([0; 256]),
        BOS_DESC.init([0; 256]),
        MSOS_DESC.init([0; 256]),
        CONTROL_BUF.init([0; 64]),
    );

    // ---- CDC-ACM function: the virtual serial port avrdude opens ----
    static CDC_STATE: StaticCell<State> = StaticCell::new();
    let class = CdcAcmClass::new(&mut builder, CDC_STATE.init(State::new()), USB_MAX_PACKET_SIZE);

    // ---- Build and launch ----
    let usb = builder.build();

    spawner.must_spawn(usb_device_task(usb));
    spawner.must_spawn(bridge_task(class, programmer, led));

    info!("picoisp ready — VID:PID = {:04x}:{:04x}", USB_VID, USB_PID);

    // Main task has nothing else to do; park forever.
    loop {
        Timer::after_secs(3600).await;
    }
}

// =============================================================================
// USB device task — runs the USB stack
// =============================================================================

#[embassy_executor::task]
async fn usb_device_task(mut usb: embassy_usb::UsbDevice<'static, UsbDriver>) {
    usb.run().await;
}

// =============================================================================
// Bridge task — STK500v1 frames in, AVR ISP transactions out
// =============================================================================

#[embassy_executor::task]
async fn bridge_task(
    mut class: CdcAcmClass<'static, UsbDriver>,
    mut programmer: Programmer<SelectedLink, Delay>,
    mut led: StatusLed<'static>,
) {
    loop {
        class.wait_connection().await;
        info!("host connected");
        programmer.reset_session();
        led.set(false);

        match run_session(&mut class, &mut programmer, &mut led).await {
            Ok(()) => info!("host disconnected"),
            Err(Fault::EraseLimitExceeded) => {
                error!("chip-erase ceiling reached; halting to protect the target");
                loop {
                    led.toggle();
                    Timer::after_millis(250).await;
                }
            }
        }
    }
}

/// One host session: runs until the port closes or a fatal fault.
async fn run_session(
    class: &mut CdcAcmClass<'static, UsbDriver>,
    programmer: &mut Programmer<SelectedLink, Delay>,
    led: &mut StatusLed<'static>,
) -> Result<(), Fault> {
    let mut host = CdcHost::new();
    let mut packet = [0u8; USB_MAX_PACKET_SIZE as usize];

    loop {
        let n = match class.read_packet(&mut packet).await {
            Ok(n) => n,
            Err(EndpointError::Disabled) => return Ok(()),
            Err(EndpointError::BufferOverflow) => {
                warn!("oversized CDC packet dropped");
                continue;
            }
        };
        trace!("rx {} bytes", n);

        let was_programming = programmer.in_programming_mode();
        host.push(&packet[..n]);
        let result = programmer.service(&mut host);

        let programming = programmer.in_programming_mode();
        if programming != was_programming {
            if programming {
                info!("target in programming mode");
            } else {
                info!("target released");
            }
        }
        led.set(programming);

        // Ship the buffered responses before acting on any fault.
        loop {
            let pending = host.pending_tx().len();
            if pending == 0 {
                break;
            }
            let take = pending.min(USB_MAX_PACKET_SIZE as usize);
            let mut out = [0u8; USB_MAX_PACKET_SIZE as usize];
            out[..take].copy_from_slice(&host.pending_tx()[..take]);
            if class.write_packet(&out[..take]).await.is_err() {
                return Ok(());
            }
            host.consume_tx(take);
        }

        result?;
    }
}
