// Device identity and hardware constants.

// =============================================================================
// USB identity
// =============================================================================

pub const USB_VID: u16 = 0x2E8A;
pub const USB_PID: u16 = 0x000A;

pub const USB_MANUFACTURER: &str = "picoisp";
pub const USB_PRODUCT: &str = "Pico AVR ISP";
pub const USB_SERIAL: &str = "PI000001";

/// USB max packet size for Full Speed bulk endpoints.
pub const USB_MAX_PACKET_SIZE: u16 = 64;

// =============================================================================
// ISP timing
// =============================================================================

/// Hardware SPI clock at power-on (Hz). Must stay below a quarter of the
/// target's core clock; 100 kHz clears a factory-fused 1 MHz part.
pub const DEFAULT_SPI_FREQ_HZ: u32 = 100_000;

/// Bit-bang SCK half-period at power-on (µs); 10 µs is roughly 50 kHz.
pub const DEFAULT_BIT_HALF_PERIOD_US: u32 = 10;

// =============================================================================
// Host I/O staging
// =============================================================================

/// Host→device staging between CDC packets and the parser.
pub const HOST_RX_STAGE: usize = 512;

/// Device→host staging; large enough for every response a full parser
/// accumulator can produce before the bridge task ships them.
pub const HOST_TX_STAGE: usize = 2048;
