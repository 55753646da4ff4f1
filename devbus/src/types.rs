/// Transmit queue priority attached to every request submitted to the transport
///
/// Priorities order requests inside the transport's transmit queue only; this
/// library submits and waits the same way regardless of the value.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Safety-critical commands, served first
    Emergency,
    /// Periodic sensor polls
    Sensor,
    /// Relay and actuator commands
    #[default]
    Relay,
    /// Background status reads, served last
    Status,
}

/// Initialization phase of a device
///
/// The phase gates response dispatch (responses observed while `Configuring`
/// are logged, not queued) and the data-validity queries of the sensor layer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum InitPhase {
    /// Construction finished, initialization not started
    #[default]
    Idle = 0,
    /// Initialization in progress
    Configuring = 1,
    /// Initialization complete, device operational
    Ready = 2,
    /// Initialization failed
    Error = 3,
}

impl InitPhase {
    pub(crate) fn from_u8(value: u8) -> InitPhase {
        match value {
            1 => InitPhase::Configuring,
            2 => InitPhase::Ready,
            3 => InitPhase::Error,
            _ => InitPhase::Idle,
        }
    }
}

impl std::fmt::Display for InitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        match self {
            InitPhase::Idle => f.write_str("IDLE"),
            InitPhase::Configuring => f.write_str("CONFIGURING"),
            InitPhase::Ready => f.write_str("READY"),
            InitPhase::Error => f.write_str("ERROR"),
        }
    }
}

/// Snapshot of per-device request statistics
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Requests submitted to the transport, successful or not
    pub total_requests: u32,
    /// Transactions that completed with a response
    pub successful_requests: u32,
    /// Derived: total minus successful
    pub failed_requests: u32,
    /// Transactions that expired without a response
    pub timeouts: u32,
    /// CRC failures reported by the transport for this device
    pub crc_errors: u32,
}

impl Statistics {
    pub(crate) fn new(total: u32, successful: u32, timeouts: u32, crc_errors: u32) -> Statistics {
        Statistics {
            total_requests: total,
            successful_requests: successful,
            failed_requests: total.saturating_sub(successful),
            timeouts,
            crc_errors,
        }
    }
}
