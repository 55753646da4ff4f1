/// Request size and addressing limits
pub mod limits {
    /// Maximum count in a read holding/input registers request
    pub const MAX_READ_REGISTERS_COUNT: u16 = 125;
    /// Maximum count in a write multiple registers request
    pub const MAX_WRITE_REGISTERS_COUNT: u16 = 123;
    /// Maximum count in a read coils/discrete inputs request
    pub const MAX_READ_COILS_COUNT: u16 = 2000;
    /// Maximum count in a write multiple coils request
    pub const MAX_WRITE_COILS_COUNT: u16 = 1968;
    /// Highest valid RTU server address. Address 0 is the broadcast address
    /// and is not a valid device address.
    pub const MAX_SERVER_ADDRESS: u8 = 247;
    /// Largest response payload retained per transaction or queued packet
    pub const MAX_RESPONSE_DATA: usize = 252;
    /// Capacity of the fixed per-device error statistics table
    pub const MAX_TRACKED_DEVICES: usize = 8;
}

/// Timeouts applied by the library
pub mod timeouts {
    use std::time::Duration;

    /// Bus mutex acquisition timeout for a full transaction
    pub const BUS_MUTEX: Duration = Duration::from_millis(2000);
    /// Bus mutex acquisition timeout for the legacy fire-and-forget path
    pub const LEGACY_BUS_MUTEX: Duration = Duration::from_millis(1000);
    /// Default per-device response timeout
    pub const RESPONSE_DEFAULT: Duration = Duration::from_millis(1000);
    /// Response timeout suited to fast local polls
    pub const RESPONSE_SHORT: Duration = Duration::from_millis(200);
    /// Bounded wait for registry lookups on the dispatch path
    pub const REGISTRY_LOOKUP: Duration = Duration::from_millis(10);
}

/// Serial timing parameters of the RS-485 link below the transport
pub mod serial {
    use std::time::Duration;

    /// Baud rate the timing defaults assume
    pub const DEFAULT_BAUD_RATE: u32 = 9600;

    /// Minimum idle time between RTU frames: 3.5 character times of 11 bits
    /// each, rounded up by a 1 ms margin
    pub const fn inter_frame_delay(baud_rate: u32) -> Duration {
        Duration::from_millis((38500 / baud_rate as u64) + 1)
    }

    /// Inter-frame delay at the default baud rate
    pub const INTER_FRAME_DELAY: Duration = inter_frame_delay(DEFAULT_BAUD_RATE);
}
