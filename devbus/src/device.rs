use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::constants::{limits, timeouts};
use crate::error::ModbusError;
use crate::event::{EventBits, EventGroup};
use crate::function::FunctionCode;
use crate::parse;
use crate::registry::Registry;
use crate::rendezvous::{Rendezvous, WaitOutcome};
use crate::types::{InitPhase, Priority, Statistics};

/// Surface the registry and the dispatch path see of every device
///
/// Implementations embed a [`ModbusDevice`] core and return it from
/// [`device`]. The hooks run after the core has serviced its pending
/// transaction, so overriding them never interferes with the waiting
/// operations.
///
/// [`device`]: DeviceHandler::device
pub trait DeviceHandler: Send + Sync {
    /// The device core driving transactions for this handler
    fn device(&self) -> &ModbusDevice;

    /// Observe every response routed to this device's address
    ///
    /// Runs after the pending transaction (if any) consumed the payload. The
    /// default logs responses that arrive while the device is configuring
    /// and ignores everything else.
    fn handle_response(&self, function: FunctionCode, _starting_address: u16, _data: &[u8]) {
        if self.device().init_phase() == InitPhase::Configuring {
            debug!(
                "device {}: response to {} during configuration",
                self.device().server_address(),
                function
            );
        }
    }

    /// Observe every transport failure routed to this device's address
    ///
    /// The core has already recorded the error and failed the pending
    /// transaction; the default does nothing more.
    fn handle_error(&self, _error: ModbusError) {}

    /// Register this handler with its registry under its current address
    fn register(self: Arc<Self>) -> Result<(), ModbusError>
    where
        Self: Sized + 'static,
    {
        let address = self.device().server_address();
        let registry = self.device().registry();
        let handler: Arc<dyn DeviceHandler> = self;
        if registry.register_device(address, &handler) {
            Ok(())
        } else {
            Err(ModbusError::MutexError)
        }
    }

    /// Remove this handler from its registry
    fn unregister(&self) {
        self.device()
            .registry()
            .unregister_device(self.device().server_address());
    }
}

struct EventBinding {
    group: EventGroup,
    ready_bit: EventBits,
    error_bit: EventBits,
}

/// Core state and transaction engine of one Modbus server device
///
/// Embed one per modeled device and expose it through
/// [`DeviceHandler::device`]. All operations are callable through a shared
/// reference; interior state is atomic or mutex-guarded. Waiting operations
/// serialize on the registry's bus mutex, hold it across the
/// submit-and-wait cycle, and release it before returning.
pub struct ModbusDevice {
    registry: &'static Registry,
    address: AtomicU8,
    phase: AtomicU8,
    last_error: AtomicU8,
    total_requests: AtomicU32,
    successful_requests: AtomicU32,
    timeouts: AtomicU32,
    crc_errors: AtomicU32,
    response_timeout_millis: AtomicU64,
    rendezvous: Rendezvous,
    binding: Mutex<Option<EventBinding>>,
    self_handle: Mutex<Option<Weak<dyn DeviceHandler>>>,
}

impl ModbusDevice {
    /// Create a device core bound to the process-wide registry
    ///
    /// An address outside 1..=247 is clamped to 1 with a warning, matching
    /// the registration rules.
    pub fn new(address: u8) -> ModbusDevice {
        ModbusDevice::with_registry(address, Registry::instance())
    }

    pub(crate) fn with_registry(address: u8, registry: &'static Registry) -> ModbusDevice {
        let address = if address == 0 || address > limits::MAX_SERVER_ADDRESS {
            warn!("invalid server address {address}, using 1");
            1
        } else {
            address
        };
        ModbusDevice {
            registry,
            address: AtomicU8::new(address),
            phase: AtomicU8::new(InitPhase::Idle as u8),
            last_error: AtomicU8::new(0),
            total_requests: AtomicU32::new(0),
            successful_requests: AtomicU32::new(0),
            timeouts: AtomicU32::new(0),
            crc_errors: AtomicU32::new(0),
            response_timeout_millis: AtomicU64::new(timeouts::RESPONSE_DEFAULT.as_millis() as u64),
            rendezvous: Rendezvous::new(),
            binding: Mutex::new(None),
            self_handle: Mutex::new(None),
        }
    }

    pub(crate) fn registry(&self) -> &'static Registry {
        self.registry
    }

    /// Current server address
    pub fn server_address(&self) -> u8 {
        self.address.load(Ordering::SeqCst)
    }

    /// Change the server address
    ///
    /// Rejects addresses outside 1..=247 without touching anything. The old
    /// registration is removed; a device in the `Ready` phase is re-registered
    /// under the new address using the handler captured at registration time.
    pub fn set_server_address(&self, address: u8) -> Result<(), ModbusError> {
        if address == 0 || address > limits::MAX_SERVER_ADDRESS {
            return Err(ModbusError::InvalidAddress);
        }
        let old = self.address.swap(address, Ordering::SeqCst);
        self.registry.unregister_device(old);
        if self.init_phase() == InitPhase::Ready {
            let handle = lock(&self.self_handle).clone();
            match handle.and_then(|weak| weak.upgrade()) {
                Some(handler) => {
                    if !self.registry.register_device(address, &handler) {
                        return Err(ModbusError::MutexError);
                    }
                }
                None => {
                    debug!("device {address}: no registration handle, address updated only");
                }
            }
        }
        Ok(())
    }

    /// Current initialization phase
    pub fn init_phase(&self) -> InitPhase {
        InitPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Move to a new initialization phase
    ///
    /// Entering `Ready` or `Error` raises the corresponding bit of a bound
    /// event group, once per transition; setting the current phase again has
    /// no effect.
    pub fn set_init_phase(&self, phase: InitPhase) {
        let previous = InitPhase::from_u8(self.phase.swap(phase as u8, Ordering::SeqCst));
        if previous != phase {
            self.raise_phase_bits(phase);
        }
    }

    /// Bind an external event group
    ///
    /// `ready_bit` is raised on entering `Ready`, `error_bit` on entering
    /// `Error`; a zero bit disables that signal. Binding after the device
    /// already reached one of those phases raises the bit immediately.
    pub fn set_event_group(&self, group: &EventGroup, ready_bit: EventBits, error_bit: EventBits) {
        {
            let mut guard = lock(&self.binding);
            *guard = Some(EventBinding {
                group: group.clone(),
                ready_bit,
                error_bit,
            });
        }
        self.raise_phase_bits(self.init_phase());
    }

    /// The bound event group, if any
    pub fn event_group(&self) -> Option<EventGroup> {
        lock(&self.binding).as_ref().map(|b| b.group.clone())
    }

    /// Bit raised on entering `Ready`, 0 when unbound
    pub fn ready_bit(&self) -> EventBits {
        lock(&self.binding).as_ref().map_or(0, |b| b.ready_bit)
    }

    /// Bit raised on entering `Error`, 0 when unbound
    pub fn error_bit(&self) -> EventBits {
        lock(&self.binding).as_ref().map_or(0, |b| b.error_bit)
    }

    fn raise_phase_bits(&self, phase: InitPhase) {
        let guard = lock(&self.binding);
        let Some(binding) = guard.as_ref() else {
            return;
        };
        let bits = match phase {
            InitPhase::Ready => binding.ready_bit,
            InitPhase::Error => binding.error_bit,
            _ => 0,
        };
        if bits != 0 {
            binding.group.set(bits);
            debug!(
                "device {}: raised event bits {bits:#X}",
                self.server_address()
            );
        }
    }

    /// Most recent error recorded for this device
    ///
    /// Sticky: successful transactions do not clear it.
    pub fn last_error(&self) -> Option<ModbusError> {
        ModbusError::from_code(self.last_error.load(Ordering::SeqCst))
    }

    /// True when the device reached `Ready` and no error was ever recorded
    pub fn is_connected(&self) -> bool {
        self.last_error().is_none() && self.init_phase() == InitPhase::Ready
    }

    /// Snapshot of the request counters
    pub fn statistics(&self) -> Statistics {
        Statistics::new(
            self.total_requests.load(Ordering::SeqCst),
            self.successful_requests.load(Ordering::SeqCst),
            self.timeouts.load(Ordering::SeqCst),
            self.crc_errors.load(Ordering::SeqCst),
        )
    }

    /// Zero the request counters. The last recorded error is kept.
    pub fn reset_statistics(&self) {
        self.total_requests.store(0, Ordering::SeqCst);
        self.successful_requests.store(0, Ordering::SeqCst);
        self.timeouts.store(0, Ordering::SeqCst);
        self.crc_errors.store(0, Ordering::SeqCst);
    }

    /// How long waiting operations wait for a response
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_millis.load(Ordering::SeqCst))
    }

    /// Change the response timeout for subsequent operations
    pub fn set_response_timeout(&self, timeout: Duration) {
        self.response_timeout_millis
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn bind_self_handle(&self, handle: Weak<dyn DeviceHandler>) {
        *lock(&self.self_handle) = Some(handle);
    }

    pub(crate) fn complete_response(&self, function: FunctionCode, data: &[u8]) {
        self.rendezvous.complete_data(function, data);
    }

    pub(crate) fn record_failure(&self, error: ModbusError) {
        self.rendezvous.complete_error(error);
        if error == ModbusError::CrcError {
            self.crc_errors.fetch_add(1, Ordering::SeqCst);
        }
        self.last_error.store(error.code(), Ordering::SeqCst);
        warn!("device {}: {error}", self.server_address());
    }

    /// Read coils (0x01) at relay priority
    pub async fn read_coils(&self, address: u16, count: u16) -> Result<Vec<bool>, ModbusError> {
        self.read_coils_with_priority(address, count, Priority::Relay)
            .await
    }

    /// Read coils (0x01) at an explicit priority
    pub async fn read_coils_with_priority(
        &self,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<Vec<bool>, ModbusError> {
        if count == 0 || count > limits::MAX_READ_COILS_COUNT {
            return Err(ModbusError::InvalidParameter);
        }
        let data = self
            .transaction(FunctionCode::ReadCoils, address, count, priority, &[])
            .await?;
        Ok(parse::parse_bits(&data, count))
    }

    /// Read discrete inputs (0x02) at relay priority
    pub async fn read_discrete_inputs(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        self.read_discrete_inputs_with_priority(address, count, Priority::Relay)
            .await
    }

    /// Read discrete inputs (0x02) at an explicit priority
    pub async fn read_discrete_inputs_with_priority(
        &self,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<Vec<bool>, ModbusError> {
        if count == 0 || count > limits::MAX_READ_COILS_COUNT {
            return Err(ModbusError::InvalidParameter);
        }
        let data = self
            .transaction(
                FunctionCode::ReadDiscreteInputs,
                address,
                count,
                priority,
                &[],
            )
            .await?;
        Ok(parse::parse_bits(&data, count))
    }

    /// Read holding registers (0x03) at relay priority
    ///
    /// Runs a full transaction: takes the bus, submits, waits up to the
    /// response timeout, and decodes the payload as big-endian registers.
    pub async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.read_holding_registers_with_priority(address, count, Priority::Relay)
            .await
    }

    /// Read holding registers (0x03) at an explicit priority
    pub async fn read_holding_registers_with_priority(
        &self,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<Vec<u16>, ModbusError> {
        if count == 0 || count > limits::MAX_READ_REGISTERS_COUNT {
            return Err(ModbusError::InvalidParameter);
        }
        let data = self
            .transaction(
                FunctionCode::ReadHoldingRegisters,
                address,
                count,
                priority,
                &[],
            )
            .await?;
        parse::parse_registers(&data)
    }

    /// Read input registers (0x04) at relay priority
    pub async fn read_input_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.read_input_registers_with_priority(address, count, Priority::Relay)
            .await
    }

    /// Read input registers (0x04) at an explicit priority
    pub async fn read_input_registers_with_priority(
        &self,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<Vec<u16>, ModbusError> {
        if count == 0 || count > limits::MAX_READ_REGISTERS_COUNT {
            return Err(ModbusError::InvalidParameter);
        }
        let data = self
            .transaction(
                FunctionCode::ReadInputRegisters,
                address,
                count,
                priority,
                &[],
            )
            .await?;
        parse::parse_registers(&data)
    }

    /// Write a single coil (0x05) at relay priority
    pub async fn write_single_coil(&self, address: u16, value: bool) -> Result<(), ModbusError> {
        self.write_single_coil_with_priority(address, value, Priority::Relay)
            .await
    }

    /// Write a single coil (0x05) at an explicit priority
    pub async fn write_single_coil_with_priority(
        &self,
        address: u16,
        value: bool,
        priority: Priority,
    ) -> Result<(), ModbusError> {
        self.transaction(
            FunctionCode::WriteSingleCoil,
            address,
            1,
            priority,
            &[u16::from(value)],
        )
        .await?;
        Ok(())
    }

    /// Write a single holding register (0x06) at relay priority
    pub async fn write_single_register(&self, address: u16, value: u16) -> Result<(), ModbusError> {
        self.write_single_register_with_priority(address, value, Priority::Relay)
            .await
    }

    /// Write a single holding register (0x06) at an explicit priority
    pub async fn write_single_register_with_priority(
        &self,
        address: u16,
        value: u16,
        priority: Priority,
    ) -> Result<(), ModbusError> {
        self.transaction(
            FunctionCode::WriteSingleRegister,
            address,
            1,
            priority,
            &[value],
        )
        .await?;
        Ok(())
    }

    /// Write multiple coils (0x0F) at relay priority, one bool per coil
    pub async fn write_multiple_coils(
        &self,
        address: u16,
        values: &[bool],
    ) -> Result<(), ModbusError> {
        self.write_multiple_coils_with_priority(address, values, Priority::Relay)
            .await
    }

    /// Write multiple coils (0x0F) at an explicit priority
    pub async fn write_multiple_coils_with_priority(
        &self,
        address: u16,
        values: &[bool],
        priority: Priority,
    ) -> Result<(), ModbusError> {
        if values.is_empty() || values.len() > limits::MAX_WRITE_COILS_COUNT as usize {
            return Err(ModbusError::InvalidParameter);
        }
        let words = parse::pack_bits(values);
        self.transaction(
            FunctionCode::WriteMultipleCoils,
            address,
            values.len() as u16,
            priority,
            &words,
        )
        .await?;
        Ok(())
    }

    /// Write multiple holding registers (0x10) at relay priority
    pub async fn write_multiple_registers(
        &self,
        address: u16,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        self.write_multiple_registers_with_priority(address, values, Priority::Relay)
            .await
    }

    /// Write multiple holding registers (0x10) at an explicit priority
    pub async fn write_multiple_registers_with_priority(
        &self,
        address: u16,
        values: &[u16],
        priority: Priority,
    ) -> Result<(), ModbusError> {
        if values.is_empty() || values.len() > limits::MAX_WRITE_REGISTERS_COUNT as usize {
            return Err(ModbusError::InvalidParameter);
        }
        self.transaction(
            FunctionCode::WriteMultipleRegisters,
            address,
            values.len() as u16,
            priority,
            values,
        )
        .await?;
        Ok(())
    }

    /// Submit a raw request at relay priority without waiting for the reply
    ///
    /// Legacy path: takes the bus only for the submission itself, so the
    /// response (if any) reaches the handler hooks but no caller. Prefer the
    /// waiting operations; this exists for fire-and-forget trigger reads.
    pub async fn send_request(
        &self,
        function: FunctionCode,
        address: u16,
        count: u16,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        self.send_request_with_priority(function, address, count, Priority::Relay, values)
            .await
    }

    /// [`send_request`] with an explicit priority
    ///
    /// [`send_request`]: ModbusDevice::send_request
    pub async fn send_request_with_priority(
        &self,
        function: FunctionCode,
        address: u16,
        count: u16,
        priority: Priority,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        let bus = self
            .registry
            .acquire_bus(timeouts::LEGACY_BUS_MUTEX)
            .await?;
        let result = self.submit(function, address, count, priority, values);
        drop(bus);
        result
    }

    /// One full transaction: bus, reset, submit, wait, release
    async fn transaction(
        &self,
        function: FunctionCode,
        address: u16,
        count: u16,
        priority: Priority,
        values: &[u16],
    ) -> Result<Vec<u8>, ModbusError> {
        let bus = self.registry.acquire_bus(timeouts::BUS_MUTEX).await?;
        self.rendezvous.begin();
        self.submit(function, address, count, priority, values)?;
        let outcome = self.rendezvous.wait(self.response_timeout()).await;
        drop(bus);
        match outcome {
            WaitOutcome::Response(data) => {
                self.successful_requests.fetch_add(1, Ordering::SeqCst);
                Ok(data)
            }
            WaitOutcome::Failed(error) => Err(error),
            WaitOutcome::TimedOut => {
                self.timeouts.fetch_add(1, Ordering::SeqCst);
                self.last_error
                    .store(ModbusError::Timeout.code(), Ordering::SeqCst);
                Err(ModbusError::Timeout)
            }
        }
    }

    /// Hand one request to the transport
    ///
    /// Counts the attempt whenever a transport was available, successful or
    /// not; a missing transport fails without counting.
    fn submit(
        &self,
        function: FunctionCode,
        address: u16,
        count: u16,
        priority: Priority,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        let Some(transport) = self.registry.transport() else {
            error!("device {}: no transport attached", self.server_address());
            return Err(ModbusError::CommunicationError);
        };
        let server = self.server_address();
        let result = match function {
            FunctionCode::ReadCoils => {
                transport.request_read_coils(server, address, count, priority)
            }
            FunctionCode::ReadDiscreteInputs => {
                transport.request_read_discrete_inputs(server, address, count, priority)
            }
            FunctionCode::ReadHoldingRegisters => {
                transport.request_read_holding_registers(server, address, count, priority)
            }
            FunctionCode::ReadInputRegisters => {
                transport.request_read_input_registers(server, address, count, priority)
            }
            FunctionCode::WriteSingleCoil => match values.first() {
                Some(value) => {
                    transport.request_write_single_coil(server, address, *value != 0, priority)
                }
                None => Err(crate::transport::TransportError::InvalidParameter),
            },
            FunctionCode::WriteSingleRegister => match values.first() {
                Some(value) => {
                    transport.request_write_single_register(server, address, *value, priority)
                }
                None => Err(crate::transport::TransportError::InvalidParameter),
            },
            FunctionCode::WriteMultipleCoils => {
                let bits = parse::unpack_bits(values, count);
                if count == 0 || bits.len() < count as usize {
                    Err(crate::transport::TransportError::InvalidParameter)
                } else {
                    transport.request_write_multiple_coils(server, address, &bits, priority)
                }
            }
            FunctionCode::WriteMultipleRegisters => {
                if count == 0 || values.len() < count as usize {
                    Err(crate::transport::TransportError::InvalidParameter)
                } else {
                    let payload = parse::registers_to_be_bytes(&values[..count as usize]);
                    transport.request_write_multiple_registers(server, address, &payload, priority)
                }
            }
        };
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(()) => Ok(()),
            Err(_) => {
                self.last_error
                    .store(ModbusError::CommunicationError.code(), Ordering::SeqCst);
                Err(ModbusError::CommunicationError)
            }
        }
    }
}

impl Drop for ModbusDevice {
    fn drop(&mut self) {
        self.registry.unregister_device(self.server_address());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
