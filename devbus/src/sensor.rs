use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::device::DeviceHandler;
use crate::error::ModbusError;
use crate::types::InitPhase;
use crate::util::now_millis;

struct Channel {
    name: String,
    units: String,
    address: u16,
    min: f32,
    max: f32,
}

struct ChannelData {
    channels: Vec<Channel>,
    values: Vec<i32>,
}

/// Named measurement channels of a sensor device and their latest raw values
///
/// Channels are appended during configuration; after initialization the value
/// storage is sized to match. All access goes through shared references, so a
/// channel set can live inside an `Arc`-shared device.
pub struct ChannelSet {
    state: Mutex<ChannelData>,
    last_update_millis: AtomicU64,
}

impl ChannelSet {
    /// Create an empty channel set
    pub fn new() -> ChannelSet {
        ChannelSet {
            state: Mutex::new(ChannelData {
                channels: Vec::new(),
                values: Vec::new(),
            }),
            last_update_millis: AtomicU64::new(0),
        }
    }

    /// Append a channel with an unbounded value range
    pub fn add_channel(&self, name: &str, units: &str, address: u16) {
        self.lock().channels.push(Channel {
            name: name.to_string(),
            units: units.to_string(),
            address,
            min: f32::MIN,
            max: f32::MAX,
        });
    }

    /// Narrow the plausible value range of a channel. Out-of-bounds indexes
    /// are ignored.
    pub fn set_channel_range(&self, index: usize, min: f32, max: f32) {
        if let Some(channel) = self.lock().channels.get_mut(index) {
            channel.min = min;
            channel.max = max;
        }
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.lock().channels.len()
    }

    /// True when no channels were added
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Channel name, or an empty string out of bounds
    pub fn name(&self, index: usize) -> String {
        self.lock()
            .channels
            .get(index)
            .map_or_else(String::new, |c| c.name.clone())
    }

    /// Channel units, or an empty string out of bounds
    pub fn units(&self, index: usize) -> String {
        self.lock()
            .channels
            .get(index)
            .map_or_else(String::new, |c| c.units.clone())
    }

    /// Register address the channel is read from
    pub fn address(&self, index: usize) -> Option<u16> {
        self.lock().channels.get(index).map(|c| c.address)
    }

    /// The narrowed range of a channel, `None` when the channel does not
    /// exist or its range was never narrowed
    pub fn range(&self, index: usize) -> Option<(f32, f32)> {
        let state = self.lock();
        let channel = state.channels.get(index)?;
        if channel.min > f32::MIN || channel.max < f32::MAX {
            Some((channel.min, channel.max))
        } else {
            None
        }
    }

    /// Store a raw value. Out-of-bounds indexes are ignored.
    pub fn set_value(&self, index: usize, value: i32) {
        if let Some(slot) = self.lock().values.get_mut(index) {
            *slot = value;
        }
    }

    /// Latest raw value of a channel
    pub fn value(&self, index: usize) -> Option<i32> {
        self.lock().values.get(index).copied()
    }

    /// Record that fresh values were stored
    pub fn mark_updated(&self) {
        // clamp to 1 so "never updated" stays distinguishable
        self.last_update_millis
            .store(now_millis().max(1), Ordering::SeqCst);
    }

    /// Timestamp of the last update in monotonic milliseconds, 0 when never
    /// updated
    pub fn last_update_millis(&self) -> u64 {
        self.last_update_millis.load(Ordering::SeqCst)
    }

    /// Time since the last update, `None` when never updated
    pub fn age(&self) -> Option<Duration> {
        match self.last_update_millis() {
            0 => None,
            last => Some(Duration::from_millis(now_millis().saturating_sub(last))),
        }
    }

    pub(crate) fn resize_values(&self) {
        let mut state = self.lock();
        let count = state.channels.len();
        state.values.resize(count, 0);
    }

    fn lock(&self) -> MutexGuard<'_, ChannelData> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        ChannelSet::new()
    }
}

/// Multi-channel polled sensor on top of a [`ModbusDevice`] core
///
/// Implementations provide the channel set and a `configure` step that probes
/// the device and declares its channels; everything else has a working
/// default. The provided [`initialize`] drives the full lifecycle:
/// `Configuring`, registration, `configure`, value sizing, `Ready`.
///
/// ```no_run
/// use std::sync::Arc;
/// use devbus::{ChannelSet, DeviceHandler, ModbusDevice, ModbusError, SensorDevice};
///
/// struct TemperatureSensor {
///     core: ModbusDevice,
///     channels: ChannelSet,
/// }
///
/// impl DeviceHandler for TemperatureSensor {
///     fn device(&self) -> &ModbusDevice {
///         &self.core
///     }
/// }
///
/// impl SensorDevice for TemperatureSensor {
///     fn channels(&self) -> &ChannelSet {
///         &self.channels
///     }
///
///     async fn configure(&self) -> Result<(), ModbusError> {
///         // probe the device, then declare what it measures
///         let id = self.core.read_holding_registers(0x0000, 1).await?;
///         tracing::info!("sensor model {:#06X}", id[0]);
///         self.channels.add_channel("Temperature", "degC", 0x0001);
///         self.channels.set_channel_range(0, -40.0, 125.0);
///         Ok(())
///     }
///
///     fn scale_factor(&self, _channel: usize) -> f32 {
///         0.1
///     }
/// }
///
/// # async fn run() -> Result<(), ModbusError> {
/// let sensor = Arc::new(TemperatureSensor {
///     core: ModbusDevice::new(5),
///     channels: ChannelSet::new(),
/// });
/// sensor.clone().initialize().await?;
/// sensor.update().await?;
/// let degrees = sensor.float_value(0)?;
/// # let _ = degrees;
/// # Ok(())
/// # }
/// ```
///
/// [`ModbusDevice`]: crate::ModbusDevice
/// [`initialize`]: SensorDevice::initialize
#[allow(async_fn_in_trait)]
pub trait SensorDevice: DeviceHandler {
    /// The channel set backing this sensor
    fn channels(&self) -> &ChannelSet;

    /// Probe the device and declare its channels
    async fn configure(&self) -> Result<(), ModbusError>;

    /// Multiplier applied to raw values by [`float_value`], 1.0 by default
    ///
    /// [`float_value`]: SensorDevice::float_value
    fn scale_factor(&self, _channel: usize) -> f32 {
        1.0
    }

    /// Bring the sensor online
    ///
    /// Moves through `Configuring`, registers the handler, runs
    /// [`configure`], sizes the value storage, and enters `Ready`. Any
    /// failure leaves the device in the `Error` phase.
    ///
    /// [`configure`]: SensorDevice::configure
    async fn initialize(self: Arc<Self>) -> Result<(), ModbusError>
    where
        Self: Sized + 'static,
    {
        let address = self.device().server_address();
        info!("initializing sensor device at address {address}");
        self.device().set_init_phase(InitPhase::Configuring);
        if let Err(err) = self.clone().register() {
            error!("device {address}: registration failed: {err}");
            self.device().set_init_phase(InitPhase::Error);
            return Err(err);
        }
        if let Err(err) = self.configure().await {
            error!("device {address}: configuration failed: {err}");
            self.device().set_init_phase(InitPhase::Error);
            return Err(err);
        }
        self.channels().resize_values();
        self.device().set_init_phase(InitPhase::Ready);
        info!(
            "device {address} ready with {} channels",
            self.channels().len()
        );
        Ok(())
    }

    /// Poll every channel and stamp the update time
    ///
    /// Fails with [`ModbusError::NotInitialized`] before the device is
    /// `Ready`; otherwise failures come from [`read_channel_data`].
    ///
    /// [`read_channel_data`]: SensorDevice::read_channel_data
    async fn update(&self) -> Result<(), ModbusError> {
        if self.device().init_phase() != InitPhase::Ready {
            return Err(ModbusError::NotInitialized);
        }
        self.read_channel_data().await?;
        self.channels().mark_updated();
        Ok(())
    }

    /// Read fresh raw values into the channel set
    ///
    /// The default reads one holding register per channel and stops at the
    /// first failure. Override to batch reads or decode packed layouts.
    async fn read_channel_data(&self) -> Result<(), ModbusError> {
        for index in 0..self.channels().len() {
            let Some(address) = self.channels().address(index) else {
                break;
            };
            match self.device().read_holding_registers(address, 1).await {
                Ok(values) => {
                    if let Some(value) = values.first() {
                        self.channels().set_value(index, i32::from(*value));
                    }
                }
                Err(err) => {
                    error!("failed to read channel {index} at address {address:#06X}: {err}");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Latest raw value of a channel
    ///
    /// Fails with [`ModbusError::InvalidParameter`] for an unknown channel
    /// and [`ModbusError::NotInitialized`] before the first successful
    /// update.
    fn raw_value(&self, channel: usize) -> Result<i32, ModbusError> {
        if channel >= self.channels().len() {
            return Err(ModbusError::InvalidParameter);
        }
        if !self.has_valid_data() {
            return Err(ModbusError::NotInitialized);
        }
        self.channels()
            .value(channel)
            .ok_or(ModbusError::InvalidParameter)
    }

    /// Latest value of a channel scaled by [`scale_factor`]
    ///
    /// A value outside a narrowed channel range is logged and still
    /// returned; the range is a plausibility check, not a filter.
    ///
    /// [`scale_factor`]: SensorDevice::scale_factor
    fn float_value(&self, channel: usize) -> Result<f32, ModbusError> {
        let raw = self.raw_value(channel)?;
        let value = raw as f32 * self.scale_factor(channel);
        if let Some((min, max)) = self.channels().range(channel) {
            if value < min || value > max {
                warn!("channel {channel} value {value} outside range [{min}, {max}]");
            }
        }
        Ok(value)
    }

    /// True once the device is `Ready` and at least one update succeeded
    fn has_valid_data(&self) -> bool {
        self.channels().last_update_millis() > 0
            && self.device().init_phase() == InitPhase::Ready
    }

    /// Timestamp of the last successful update, 0 when never updated
    fn last_update_millis(&self) -> u64 {
        self.channels().last_update_millis()
    }

    /// Time since the last successful update, `None` when never updated
    fn data_age(&self) -> Option<Duration> {
        self.channels().age()
    }

    /// Number of channels
    fn channel_count(&self) -> usize {
        self.channels().len()
    }

    /// Channel name, or an empty string out of bounds
    fn channel_name(&self, channel: usize) -> String {
        self.channels().name(channel)
    }

    /// Channel units, or an empty string out of bounds
    fn channel_units(&self, channel: usize) -> String {
        self.channels().units(channel)
    }
}
