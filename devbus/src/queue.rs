use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::limits;
use crate::device::DeviceHandler;
use crate::function::FunctionCode;
use crate::types::InitPhase;
use crate::util::now_millis;

/// Queue depth used when none is given
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// A response captured off the dispatch path for later processing
///
/// Packets hold a bounded copy of the response payload plus the function
/// code, starting address, and a monotonic capture timestamp.
#[derive(Clone)]
pub struct AsyncPacket {
    function: FunctionCode,
    address: u16,
    data: [u8; limits::MAX_RESPONSE_DATA],
    length: usize,
    timestamp: u64,
}

impl AsyncPacket {
    pub(crate) fn new(function: FunctionCode, address: u16, payload: &[u8]) -> AsyncPacket {
        let length = payload.len().min(limits::MAX_RESPONSE_DATA);
        let mut data = [0u8; limits::MAX_RESPONSE_DATA];
        data[..length].copy_from_slice(&payload[..length]);
        AsyncPacket {
            function,
            address,
            data,
            length,
            timestamp: now_millis(),
        }
    }

    /// Function code of the captured response
    pub fn function(&self) -> FunctionCode {
        self.function
    }

    /// Starting address the request was made with
    pub fn starting_address(&self) -> u16 {
        self.address
    }

    /// The captured payload
    pub fn data(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// True when the packet carries a payload
    pub fn is_valid(&self) -> bool {
        self.length > 0
    }

    /// Time since the packet was captured
    pub fn age(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.timestamp))
    }
}

impl fmt::Debug for AsyncPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AsyncPacket")
            .field("function", &self.function)
            .field("address", &self.address)
            .field("length", &self.length)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

struct Slots {
    tx: mpsc::Sender<AsyncPacket>,
    rx: Mutex<mpsc::Receiver<AsyncPacket>>,
}

/// Bounded FIFO of captured responses
///
/// The channel is allocated on first enable and reused for the lifetime of
/// the queue; disabling stops intake and discards anything still queued but
/// keeps the allocation, so async mode can be toggled freely.
pub struct ResponseQueue {
    slots: OnceLock<Slots>,
    enabled: AtomicBool,
    queued: AtomicUsize,
}

impl ResponseQueue {
    /// Create a disabled queue with no storage allocated yet
    pub fn new() -> ResponseQueue {
        ResponseQueue {
            slots: OnceLock::new(),
            enabled: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
        }
    }

    /// Start capturing responses
    ///
    /// The depth only applies when the queue storage is first created; later
    /// enables reuse the existing storage. Enabling an already enabled queue
    /// logs a warning and changes nothing.
    pub fn enable(&self, depth: usize) {
        if self.enabled.load(Ordering::SeqCst) {
            warn!("async mode already enabled");
            return;
        }
        let depth = depth.max(1);
        self.slots.get_or_init(|| {
            let (tx, rx) = mpsc::channel(depth);
            Slots {
                tx,
                rx: Mutex::new(rx),
            }
        });
        self.enabled.store(true, Ordering::SeqCst);
        info!("async mode enabled");
    }

    /// Stop capturing responses and discard anything still queued
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            let discarded = self.drain();
            if discarded > 0 {
                debug!("discarded {discarded} queued packets");
            }
            info!("async mode disabled");
        }
    }

    /// True while responses are being captured
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of packets waiting to be processed
    pub fn depth(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub(crate) fn try_push(&self, packet: AsyncPacket) -> Result<(), AsyncPacket> {
        let Some(slots) = self.slots.get() else {
            return Err(packet);
        };
        match slots.tx.try_send(packet) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(packet)) => Err(packet),
            Err(mpsc::error::TrySendError::Closed(packet)) => Err(packet),
        }
    }

    pub(crate) fn try_pop(&self) -> Option<AsyncPacket> {
        let slots = self.slots.get()?;
        let mut rx = slots
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match rx.try_recv() {
            Ok(packet) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Some(packet)
            }
            Err(_) => None,
        }
    }

    fn drain(&self) -> usize {
        let mut discarded = 0;
        while self.try_pop().is_some() {
            discarded += 1;
        }
        discarded
    }
}

impl Default for ResponseQueue {
    fn default() -> Self {
        ResponseQueue::new()
    }
}

/// Device that parks responses in a queue instead of handling them inline
///
/// Implementations provide the queue and the per-packet handler, then route
/// dispatch through the policy with a one-line [`DeviceHandler`] override:
///
/// ```ignore
/// impl DeviceHandler for Controller {
///     fn device(&self) -> &ModbusDevice {
///         &self.core
///     }
///
///     fn handle_response(&self, function: FunctionCode, starting_address: u16, data: &[u8]) {
///         self.handle_queued_response(function, starting_address, data);
///     }
/// }
/// ```
///
/// To solicit input between polls, issue a fire-and-forget read with
/// [`ModbusDevice::send_request_with_priority`] and let the eventual
/// response land in the queue.
///
/// [`ModbusDevice::send_request_with_priority`]: crate::ModbusDevice::send_request_with_priority
pub trait QueuedDevice: DeviceHandler {
    /// The queue backing this device
    fn queue(&self) -> &ResponseQueue;

    /// Handle one packet pulled from the queue
    fn on_async_response(&self, packet: &AsyncPacket);

    /// Called when a response arrives and the queue is full. The response is
    /// dropped; the default logs a warning.
    fn on_queue_full(&self) {
        warn!("queue full for device {}", self.device().server_address());
    }

    /// Start capturing responses with the given queue depth
    fn enable_async(&self, depth: usize) {
        self.queue().enable(depth);
    }

    /// Stop capturing responses and discard anything still queued
    fn disable_async(&self) {
        self.queue().disable();
    }

    /// True while responses are being captured
    fn is_async_enabled(&self) -> bool {
        self.queue().is_enabled()
    }

    /// Number of packets waiting to be processed
    fn queue_depth(&self) -> usize {
        self.queue().depth()
    }

    /// Pull queued packets through [`on_async_response`], oldest first
    ///
    /// Processes at most `max_packets`, or everything queued when
    /// `max_packets` is 0. Returns the number processed.
    ///
    /// [`on_async_response`]: QueuedDevice::on_async_response
    fn process_queue(&self, max_packets: usize) -> usize {
        let mut processed = 0;
        while let Some(packet) = self.queue().try_pop() {
            self.on_async_response(&packet);
            processed += 1;
            if max_packets > 0 && processed >= max_packets {
                break;
            }
        }
        processed
    }

    /// Dispatch policy for queued devices
    ///
    /// During configuration the response is only logged, matching the base
    /// [`DeviceHandler::handle_response`]. With async mode off the response
    /// is dropped. Otherwise the response is packetized and queued, and a
    /// full queue goes through [`on_queue_full`].
    ///
    /// [`on_queue_full`]: QueuedDevice::on_queue_full
    fn handle_queued_response(&self, function: FunctionCode, starting_address: u16, data: &[u8]) {
        if self.device().init_phase() == InitPhase::Configuring {
            debug!(
                "device {}: response to {} during configuration",
                self.device().server_address(),
                function
            );
            return;
        }
        if !self.queue().is_enabled() {
            return;
        }
        let packet = AsyncPacket::new(function, starting_address, data);
        if self.queue().try_push(packet).is_err() {
            self.on_queue_full();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::device::ModbusDevice;
    use crate::mock::MockTransport;
    use crate::registry::Registry;

    struct QueuedTest {
        core: ModbusDevice,
        queue: ResponseQueue,
        seen: Mutex<Vec<(FunctionCode, u16, Vec<u8>)>>,
        full_events: AtomicUsize,
    }

    impl QueuedTest {
        fn create(address: u8, registry: &'static Registry) -> Arc<QueuedTest> {
            let device = Arc::new(QueuedTest {
                core: ModbusDevice::with_registry(address, registry),
                queue: ResponseQueue::new(),
                seen: Mutex::new(Vec::new()),
                full_events: AtomicUsize::new(0),
            });
            device.clone().register().unwrap();
            device.core.set_init_phase(InitPhase::Ready);
            device
        }

        fn seen(&self) -> Vec<(FunctionCode, u16, Vec<u8>)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl DeviceHandler for QueuedTest {
        fn device(&self) -> &ModbusDevice {
            &self.core
        }

        fn handle_response(&self, function: FunctionCode, starting_address: u16, data: &[u8]) {
            self.handle_queued_response(function, starting_address, data);
        }
    }

    impl QueuedDevice for QueuedTest {
        fn queue(&self) -> &ResponseQueue {
            &self.queue
        }

        fn on_async_response(&self, packet: &AsyncPacket) {
            self.seen.lock().unwrap().push((
                packet.function(),
                packet.starting_address(),
                packet.data().to_vec(),
            ));
        }

        fn on_queue_full(&self) {
            self.full_events.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leaked() -> &'static Registry {
        Box::leak(Box::new(Registry::new()))
    }

    #[tokio::test]
    async fn overflow_drops_the_newest_and_notifies_once() {
        let registry = leaked();
        let _mock = MockTransport::attach(registry);
        let device = QueuedTest::create(6, registry);
        device.enable_async(2);

        for value in 1..=3u8 {
            registry.dispatch_response(6, FunctionCode::ReadHoldingRegisters, 0x0100, &[0, value]);
        }

        assert_eq!(device.queue_depth(), 2);
        assert_eq!(device.full_events.load(Ordering::SeqCst), 1);

        assert_eq!(device.process_queue(0), 2);
        let seen = device.seen();
        assert_eq!(seen[0].2, vec![0, 1]);
        assert_eq!(seen[1].2, vec![0, 2]);
    }

    #[tokio::test]
    async fn disable_discards_but_the_storage_survives() {
        let registry = leaked();
        let _mock = MockTransport::attach(registry);
        let device = QueuedTest::create(6, registry);
        device.enable_async(2);

        registry.dispatch_response(6, FunctionCode::ReadInputRegisters, 0x0000, &[0, 9]);
        assert_eq!(device.queue_depth(), 1);

        device.disable_async();
        assert!(!device.is_async_enabled());
        assert_eq!(device.queue_depth(), 0);

        // dropped while disabled
        registry.dispatch_response(6, FunctionCode::ReadInputRegisters, 0x0000, &[0, 9]);
        assert_eq!(device.queue_depth(), 0);

        // re-enable reuses the depth-2 storage no matter what is requested
        device.enable_async(50);
        for value in 1..=3u8 {
            registry.dispatch_response(6, FunctionCode::ReadInputRegisters, 0x0000, &[0, value]);
        }
        assert_eq!(device.queue_depth(), 2);
        assert_eq!(device.full_events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enabling_twice_warns_and_keeps_working() {
        let registry = leaked();
        let _mock = MockTransport::attach(registry);
        let device = QueuedTest::create(6, registry);
        device.enable_async(2);
        device.enable_async(5);

        registry.dispatch_response(6, FunctionCode::ReadCoils, 0x0000, &[0x05]);
        assert_eq!(device.queue_depth(), 1);
    }

    #[tokio::test]
    async fn responses_during_configuration_are_not_queued() {
        let registry = leaked();
        let _mock = MockTransport::attach(registry);
        let device = QueuedTest::create(6, registry);
        device.enable_async(2);
        device.core.set_init_phase(InitPhase::Configuring);

        registry.dispatch_response(6, FunctionCode::ReadHoldingRegisters, 0x0000, &[0, 1]);

        assert_eq!(device.queue_depth(), 0);
        assert!(device.seen().is_empty());
        assert_eq!(device.full_events.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn process_queue_honors_the_packet_limit() {
        let registry = leaked();
        let _mock = MockTransport::attach(registry);
        let device = QueuedTest::create(6, registry);
        device.enable_async(5);

        for value in 1..=3u8 {
            registry.dispatch_response(6, FunctionCode::ReadHoldingRegisters, 0x0000, &[0, value]);
        }

        assert_eq!(device.process_queue(2), 2);
        assert_eq!(device.queue_depth(), 1);
        assert_eq!(device.process_queue(0), 1);
        assert_eq!(device.queue_depth(), 0);
    }

    #[tokio::test]
    async fn packets_expose_what_was_captured() {
        let registry = leaked();
        let _mock = MockTransport::attach(registry);
        let device = QueuedTest::create(6, registry);
        device.enable_async(1);

        registry.dispatch_response(6, FunctionCode::ReadInputRegisters, 0x0010, &[0x01, 0x02, 0x03]);
        device.process_queue(0);

        let seen = device.seen();
        assert_eq!(
            seen,
            vec![(
                FunctionCode::ReadInputRegisters,
                0x0010,
                vec![0x01, 0x02, 0x03]
            )]
        );
    }

    #[tokio::test]
    async fn oversized_payloads_are_clamped() {
        let registry = leaked();
        let _mock = MockTransport::attach(registry);
        let device = QueuedTest::create(6, registry);
        device.enable_async(1);

        let oversized = vec![0xAA; 300];
        registry.dispatch_response(6, FunctionCode::ReadHoldingRegisters, 0x0000, &oversized);
        device.process_queue(0);

        let seen = device.seen();
        assert_eq!(seen[0].2.len(), limits::MAX_RESPONSE_DATA);
        assert!(seen[0].2.iter().all(|b| *b == 0xAA));
    }

    #[tokio::test]
    async fn depth_zero_still_queues_one_packet() {
        let registry = leaked();
        let _mock = MockTransport::attach(registry);
        let device = QueuedTest::create(6, registry);
        device.enable_async(0);

        registry.dispatch_response(6, FunctionCode::ReadHoldingRegisters, 0x0000, &[0, 1]);
        registry.dispatch_response(6, FunctionCode::ReadHoldingRegisters, 0x0000, &[0, 2]);

        assert_eq!(device.queue_depth(), 1);
        assert_eq!(device.full_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn packet_validity_tracks_the_payload() {
        let full = AsyncPacket::new(FunctionCode::ReadCoils, 0x0000, &[0x01]);
        assert!(full.is_valid());
        assert_eq!(full.data(), &[0x01]);

        let empty = AsyncPacket::new(FunctionCode::WriteSingleCoil, 0x0000, &[]);
        assert!(!empty.is_valid());
        assert!(empty.data().is_empty());
        assert!(empty.age() < Duration::from_secs(1));
    }
}
