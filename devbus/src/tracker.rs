use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use tracing::warn;

use crate::constants::limits;
use crate::error::ModbusError;
use crate::util::now_millis;

/// Category a recorded error is counted under
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Frame checksum mismatches
    Crc,
    /// Response deadline expiries
    Timeout,
    /// Malformed or out-of-contract data
    InvalidData,
    /// Errors reported by the device itself
    DeviceError,
    /// Everything else
    Other,
}

impl From<ModbusError> for ErrorCategory {
    fn from(error: ModbusError) -> ErrorCategory {
        match error {
            ModbusError::CrcError => ErrorCategory::Crc,
            ModbusError::Timeout => ErrorCategory::Timeout,
            ModbusError::InvalidResponse
            | ModbusError::InvalidDataLength
            | ModbusError::InvalidParameter => ErrorCategory::InvalidData,
            ModbusError::IllegalFunction
            | ModbusError::IllegalDataAddress
            | ModbusError::IllegalDataValue
            | ModbusError::SlaveDeviceFailure => ErrorCategory::DeviceError,
            _ => ErrorCategory::Other,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorCategory::Crc => f.write_str("CRC_ERROR"),
            ErrorCategory::Timeout => f.write_str("TIMEOUT"),
            ErrorCategory::InvalidData => f.write_str("INVALID_DATA"),
            ErrorCategory::DeviceError => f.write_str("DEVICE_ERROR"),
            ErrorCategory::Other => f.write_str("OTHER"),
        }
    }
}

struct DeviceSlot {
    address: AtomicU8,
    initialized: AtomicBool,
    crc_errors: AtomicU32,
    timeouts: AtomicU32,
    invalid_data: AtomicU32,
    device_errors: AtomicU32,
    other_errors: AtomicU32,
    successes: AtomicU32,
    last_error_millis: AtomicU64,
}

impl DeviceSlot {
    const fn new() -> DeviceSlot {
        DeviceSlot {
            address: AtomicU8::new(0),
            initialized: AtomicBool::new(false),
            crc_errors: AtomicU32::new(0),
            timeouts: AtomicU32::new(0),
            invalid_data: AtomicU32::new(0),
            device_errors: AtomicU32::new(0),
            other_errors: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            last_error_millis: AtomicU64::new(0),
        }
    }

    fn counter(&self, category: ErrorCategory) -> &AtomicU32 {
        match category {
            ErrorCategory::Crc => &self.crc_errors,
            ErrorCategory::Timeout => &self.timeouts,
            ErrorCategory::InvalidData => &self.invalid_data,
            ErrorCategory::DeviceError => &self.device_errors,
            ErrorCategory::Other => &self.other_errors,
        }
    }

    fn total_errors(&self) -> u32 {
        self.crc_errors
            .load(Ordering::Relaxed)
            .saturating_add(self.timeouts.load(Ordering::Relaxed))
            .saturating_add(self.invalid_data.load(Ordering::Relaxed))
            .saturating_add(self.device_errors.load(Ordering::Relaxed))
            .saturating_add(self.other_errors.load(Ordering::Relaxed))
    }

    fn clear(&self) {
        self.crc_errors.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.invalid_data.store(0, Ordering::Relaxed);
        self.device_errors.store(0, Ordering::Relaxed);
        self.other_errors.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.last_error_millis.store(0, Ordering::Relaxed);
    }
}

/// Categorized error and success counters per server address
///
/// A fixed table of [`limits::MAX_TRACKED_DEVICES`] slots, claimed on first
/// record with an atomic length bump and never released. All counter access
/// is lock-free, so recording is safe from any context including the
/// dispatch path.
pub struct ErrorTracker {
    slots: [DeviceSlot; limits::MAX_TRACKED_DEVICES],
    len: AtomicUsize,
}

static GLOBAL: ErrorTracker = ErrorTracker::new();

/// The process-wide tracker instance
pub fn global() -> &'static ErrorTracker {
    &GLOBAL
}

impl ErrorTracker {
    /// Create an empty tracker
    pub const fn new() -> ErrorTracker {
        const EMPTY: DeviceSlot = DeviceSlot::new();
        ErrorTracker {
            slots: [EMPTY; limits::MAX_TRACKED_DEVICES],
            len: AtomicUsize::new(0),
        }
    }

    /// Count an error against a device, claiming a slot on first use
    pub fn record_error(&self, address: u8, error: ModbusError) {
        if let Some(slot) = self.slot_or_claim(address) {
            slot.counter(ErrorCategory::from(error))
                .fetch_add(1, Ordering::Relaxed);
            // clamp to 1 so "never errored" stays distinguishable
            slot.last_error_millis
                .store(now_millis().max(1), Ordering::Relaxed);
        }
    }

    /// Count a success against a device, claiming a slot on first use
    pub fn record_success(&self, address: u8) {
        if let Some(slot) = self.slot_or_claim(address) {
            slot.successes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Zero the counters of a device, claiming a slot when missing
    pub fn reset_device(&self, address: u8) {
        if let Some(slot) = self.slot_or_claim(address) {
            slot.clear();
        }
    }

    /// Zero the counters of every tracked device
    pub fn reset_all(&self) {
        for slot in self.tracked() {
            slot.clear();
        }
    }

    /// Errors counted in one category for a device
    pub fn category_count(&self, address: u8, category: ErrorCategory) -> u32 {
        self.slot(address)
            .map_or(0, |slot| slot.counter(category).load(Ordering::Relaxed))
    }

    /// CRC errors recorded for a device
    pub fn crc_errors(&self, address: u8) -> u32 {
        self.category_count(address, ErrorCategory::Crc)
    }

    /// Timeouts recorded for a device
    pub fn timeouts(&self, address: u8) -> u32 {
        self.category_count(address, ErrorCategory::Timeout)
    }

    /// Invalid-data errors recorded for a device
    pub fn invalid_data_errors(&self, address: u8) -> u32 {
        self.category_count(address, ErrorCategory::InvalidData)
    }

    /// Device-reported errors recorded for a device
    pub fn device_errors(&self, address: u8) -> u32 {
        self.category_count(address, ErrorCategory::DeviceError)
    }

    /// Uncategorized errors recorded for a device
    pub fn other_errors(&self, address: u8) -> u32 {
        self.category_count(address, ErrorCategory::Other)
    }

    /// Errors recorded for a device across all categories
    pub fn total_errors(&self, address: u8) -> u32 {
        self.slot(address).map_or(0, DeviceSlot::total_errors)
    }

    /// Successes recorded for a device
    pub fn success_count(&self, address: u8) -> u32 {
        self.slot(address)
            .map_or(0, |slot| slot.successes.load(Ordering::Relaxed))
    }

    /// Monotonic millisecond timestamp of the last recorded error, 0 when
    /// the device never errored
    pub fn last_error_millis(&self, address: u8) -> u64 {
        self.slot(address)
            .map_or(0, |slot| slot.last_error_millis.load(Ordering::Relaxed))
    }

    /// Share of failed exchanges in percent, 0.0 with no recorded activity
    pub fn error_rate(&self, address: u8) -> f32 {
        let Some(slot) = self.slot(address) else {
            return 0.0;
        };
        let errors = slot.total_errors();
        let total = errors.saturating_add(slot.successes.load(Ordering::Relaxed));
        if total == 0 {
            return 0.0;
        }
        errors as f32 * 100.0 / total as f32
    }

    /// True when the device has a claimed slot
    pub fn is_tracked(&self, address: u8) -> bool {
        self.slot(address).is_some()
    }

    /// Number of devices with claimed slots
    pub fn tracked_device_count(&self) -> usize {
        self.tracked().count()
    }

    fn tracked(&self) -> impl Iterator<Item = &DeviceSlot> {
        let len = self.len.load(Ordering::Acquire).min(self.slots.len());
        self.slots[..len]
            .iter()
            .filter(|slot| slot.initialized.load(Ordering::Acquire))
    }

    fn slot(&self, address: u8) -> Option<&DeviceSlot> {
        self.tracked()
            .find(|slot| slot.address.load(Ordering::Relaxed) == address)
    }

    fn slot_or_claim(&self, address: u8) -> Option<&DeviceSlot> {
        loop {
            if let Some(slot) = self.slot(address) {
                return Some(slot);
            }
            let len = self.len.load(Ordering::Acquire);
            if len >= self.slots.len() {
                warn!("error tracker full, dropping statistics for device {address}");
                return None;
            }
            // claims racing on the same address may briefly occupy two
            // slots; reads prefer the first
            if self
                .len
                .compare_exchange(len, len + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let slot = &self.slots[len];
                slot.address.store(address, Ordering::Relaxed);
                slot.initialized.store(true, Ordering::Release);
                return Some(slot);
            }
        }
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        ErrorTracker::new()
    }
}
