use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, TryLockError, Weak};
use std::time::Duration;

use tracing::{info, warn};

use crate::constants::{limits, timeouts};
use crate::device::DeviceHandler;
use crate::error::ModbusError;
use crate::function::FunctionCode;
use crate::transport::{ModbusTransport, TransportError};

struct Shared {
    devices: HashMap<u8, Weak<dyn DeviceHandler>>,
    transport: Option<Arc<dyn ModbusTransport>>,
}

/// Process-wide device registry and bus arbiter
///
/// The registry maps server addresses to registered device handlers, holds
/// the transport, and owns the single bus mutex that serializes transactions
/// on the shared RS-485 link. Use [`Registry::instance`] to reach the
/// process-wide instance; devices built with [`crate::ModbusDevice::new`] use
/// it implicitly.
pub struct Registry {
    state: Mutex<Shared>,
    bus: tokio::sync::Mutex<()>,
}

/// Exclusive claim on the bus, released on drop
pub struct BusGuard<'a> {
    _guard: tokio::sync::MutexGuard<'a, ()>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            state: Mutex::new(Shared {
                devices: HashMap::new(),
                transport: None,
            }),
            bus: tokio::sync::Mutex::new(()),
        }
    }

    /// The process-wide registry
    pub fn instance() -> &'static Registry {
        static INSTANCE: OnceLock<Registry> = OnceLock::new();
        INSTANCE.get_or_init(Registry::new)
    }

    /// Attach the transport all subsequent requests are submitted through
    pub fn set_transport(&self, transport: Arc<dyn ModbusTransport>) {
        self.lock_state().transport = Some(transport);
        info!("transport attached");
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn ModbusTransport>> {
        self.lock_state().transport.clone()
    }

    /// Register a device handler under a server address
    ///
    /// Returns false when the address is outside 1..=247. Registering over an
    /// existing address replaces the previous entry. The registry keeps a
    /// weak reference, so registration does not keep the device alive.
    pub fn register_device(&self, address: u8, handler: &Arc<dyn DeviceHandler>) -> bool {
        if address == 0 || address > limits::MAX_SERVER_ADDRESS {
            warn!("cannot register device at invalid address {address}");
            return false;
        }
        let weak = Arc::downgrade(handler);
        handler.device().bind_self_handle(weak.clone());
        self.lock_state().devices.insert(address, weak);
        info!("device registered at address {address}");
        true
    }

    /// Remove the device registered at an address, returning whether an entry
    /// existed
    pub fn unregister_device(&self, address: u8) -> bool {
        let existed = self.lock_state().devices.remove(&address).is_some();
        if existed {
            info!("device unregistered from address {address}");
        }
        existed
    }

    /// Look up the device registered at an address
    ///
    /// Safe to call from the dispatch path: waits at most 10 ms for the
    /// registry lock and reports a miss rather than blocking.
    pub fn get_device(&self, address: u8) -> Option<Arc<dyn DeviceHandler>> {
        let state = self.lock_state_bounded()?;
        state.devices.get(&address).and_then(Weak::upgrade)
    }

    /// True when a live device is registered at the address
    pub fn has_device(&self, address: u8) -> bool {
        self.get_device(address).is_some()
    }

    /// Number of registered addresses, or 0 when the registry lock cannot be
    /// taken within the bounded wait
    pub fn device_count(&self) -> usize {
        self.lock_state_bounded()
            .map(|state| state.devices.len())
            .unwrap_or(0)
    }

    /// Acquire exclusive use of the bus for one transaction
    ///
    /// Fails with [`ModbusError::MutexError`] when the bus stays busy past
    /// the timeout. The bus is released when the returned guard drops.
    pub async fn acquire_bus(&self, timeout: Duration) -> Result<BusGuard<'_>, ModbusError> {
        match tokio::time::timeout(timeout, self.bus.lock()).await {
            Ok(guard) => Ok(BusGuard { _guard: guard }),
            Err(_) => {
                warn!("bus mutex not acquired within {timeout:?}");
                Err(ModbusError::MutexError)
            }
        }
    }

    /// Route a response payload to the device registered at `server`
    ///
    /// Completes the device's pending transaction (if the payload applies)
    /// and then invokes the device's response hook. Responses for unknown
    /// addresses are dropped.
    pub fn dispatch_response(
        &self,
        server: u8,
        function: FunctionCode,
        starting_address: u16,
        data: &[u8],
    ) {
        if let Some(handler) = self.get_device(server) {
            handler.device().complete_response(function, data);
            handler.handle_response(function, starting_address, data);
        }
    }

    /// Route a transport failure to the device registered at `server`
    ///
    /// Records the error on the device, fails its pending transaction, and
    /// then invokes the device's error hook. Errors for unknown addresses are
    /// dropped.
    pub fn dispatch_error(&self, server: u8, error: TransportError) {
        if let Some(handler) = self.get_device(server) {
            let error = ModbusError::from(error);
            handler.device().record_failure(error);
            handler.handle_error(error);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, Shared> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bounded lock for paths that must not stall behind a busy registry
    fn lock_state_bounded(&self) -> Option<MutexGuard<'_, Shared>> {
        let deadline = std::time::Instant::now() + timeouts::REGISTRY_LOOKUP;
        loop {
            match self.state.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if std::time::Instant::now() >= deadline {
                        return None;
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}

/// Transport callback: route a response payload to the registered device.
/// Thin wrapper over [`Registry::dispatch_response`] on the process-wide
/// registry.
pub fn dispatch_response(server: u8, function: FunctionCode, starting_address: u16, data: &[u8]) {
    Registry::instance().dispatch_response(server, function, starting_address, data);
}

/// Transport callback: route a transport failure to the registered device.
/// Thin wrapper over [`Registry::dispatch_error`] on the process-wide
/// registry.
pub fn dispatch_error(server: u8, error: TransportError) {
    Registry::instance().dispatch_error(server, error);
}
