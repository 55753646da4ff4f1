use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, TryLockError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::ModbusError;
use crate::function::FunctionCode;

/// How a wait on the rendezvous ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// A response payload arrived
    Response(Vec<u8>),
    /// The transport reported a failure for this device
    Failed(ModbusError),
    /// The deadline passed with neither
    TimedOut,
}

/// Single-transaction rendezvous between a waiting caller and the dispatch
/// path.
///
/// One instance lives in each device. The caller resets it with [`begin`]
/// while holding the bus mutex, submits the request, then blocks in [`wait`].
/// The dispatch path completes it without blocking: whichever of
/// [`complete_data`] and [`complete_error`] lands first wins, later
/// completions for the same transaction are ignored.
///
/// [`begin`]: Rendezvous::begin
/// [`wait`]: Rendezvous::wait
/// [`complete_data`]: Rendezvous::complete_data
/// [`complete_error`]: Rendezvous::complete_error
pub(crate) struct Rendezvous {
    buffer: Mutex<Vec<u8>>,
    received: AtomicBool,
    failure: AtomicU8,
    signal: Notify,
}

impl Rendezvous {
    pub(crate) fn new() -> Rendezvous {
        Rendezvous {
            buffer: Mutex::new(Vec::new()),
            received: AtomicBool::new(false),
            failure: AtomicU8::new(0),
            signal: Notify::new(),
        }
    }

    /// Reset for a new transaction. Callers hold the bus mutex here, so the
    /// only concurrent access is the dispatch path, which backs off while the
    /// buffer lock is held.
    pub(crate) fn begin(&self) {
        let mut buffer = lock_buffer(&self.buffer);
        buffer.clear();
        self.received.store(false, Ordering::SeqCst);
        self.failure.store(0, Ordering::SeqCst);
    }

    /// Deliver a response payload. Returns true when this transaction
    /// consumed it. An empty payload only completes a write operation, where
    /// the acknowledgement itself is the result.
    pub(crate) fn complete_data(&self, function: FunctionCode, data: &[u8]) -> bool {
        let mut buffer = match self.buffer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if self.received.load(Ordering::SeqCst) || self.failure.load(Ordering::SeqCst) != 0 {
            return false;
        }
        if data.is_empty() && !function.is_write() {
            return false;
        }
        buffer.clear();
        buffer.extend_from_slice(data);
        self.received.store(true, Ordering::SeqCst);
        self.signal.notify_one();
        true
    }

    /// Deliver a failure. Returns true when this transaction consumed it.
    pub(crate) fn complete_error(&self, error: ModbusError) -> bool {
        let _buffer = match self.buffer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if self.received.load(Ordering::SeqCst) || self.failure.load(Ordering::SeqCst) != 0 {
            return false;
        }
        self.failure.store(error.code(), Ordering::SeqCst);
        self.signal.notify_one();
        true
    }

    /// Wait until the transaction completes or the timeout expires.
    ///
    /// Loops on an absolute deadline: a notify permit left over from an
    /// earlier timed-out transaction wakes the loop once, finds neither flag
    /// set, and is absorbed.
    pub(crate) async fn wait(&self, timeout: Duration) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::timeout_at(deadline, self.signal.notified())
                .await
                .is_err()
            {
                return WaitOutcome::TimedOut;
            }
            if let Some(error) = ModbusError::from_code(self.failure.load(Ordering::SeqCst)) {
                return WaitOutcome::Failed(error);
            }
            if self.received.load(Ordering::SeqCst) {
                let mut buffer = lock_buffer(&self.buffer);
                return WaitOutcome::Response(std::mem::take(&mut *buffer));
            }
            // stale permit from a previous transaction, keep waiting
        }
    }
}

fn lock_buffer(buffer: &Mutex<Vec<u8>>) -> std::sync::MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_a_response_to_the_waiter() {
        let rendezvous = Rendezvous::new();
        rendezvous.begin();
        assert!(rendezvous.complete_data(FunctionCode::ReadHoldingRegisters, &[0x00, 0x0A]));
        let outcome = rendezvous.wait(Duration::from_millis(100)).await;
        assert_eq!(outcome, WaitOutcome::Response(vec![0x00, 0x0A]));
    }

    #[tokio::test]
    async fn delivers_a_failure_to_the_waiter() {
        let rendezvous = Rendezvous::new();
        rendezvous.begin();
        assert!(rendezvous.complete_error(ModbusError::CrcError));
        let outcome = rendezvous.wait(Duration::from_millis(100)).await;
        assert_eq!(outcome, WaitOutcome::Failed(ModbusError::CrcError));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_nothing_arrives() {
        let rendezvous = Rendezvous::new();
        rendezvous.begin();
        let outcome = rendezvous.wait(Duration::from_millis(1000)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn first_outcome_wins() {
        let rendezvous = Rendezvous::new();
        rendezvous.begin();
        assert!(rendezvous.complete_data(FunctionCode::ReadHoldingRegisters, &[0x01, 0x02]));
        assert!(!rendezvous.complete_error(ModbusError::Timeout));
        assert!(!rendezvous.complete_data(FunctionCode::ReadHoldingRegisters, &[0x03, 0x04]));
        let outcome = rendezvous.wait(Duration::from_millis(100)).await;
        assert_eq!(outcome, WaitOutcome::Response(vec![0x01, 0x02]));
    }

    #[tokio::test]
    async fn empty_payload_completes_only_write_operations() {
        let rendezvous = Rendezvous::new();
        rendezvous.begin();
        assert!(!rendezvous.complete_data(FunctionCode::ReadCoils, &[]));
        assert!(rendezvous.complete_data(FunctionCode::WriteSingleCoil, &[]));
        let outcome = rendezvous.wait(Duration::from_millis(100)).await;
        assert_eq!(outcome, WaitOutcome::Response(Vec::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_permit_from_a_timed_out_transaction_is_absorbed() {
        let rendezvous = Rendezvous::new();

        // first transaction times out, then its response arrives late and
        // leaves a permit behind
        rendezvous.begin();
        let outcome = rendezvous.wait(Duration::from_millis(100)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(rendezvous.complete_data(FunctionCode::ReadHoldingRegisters, &[0xBE, 0xEF]));

        // the next transaction must not mistake the leftover permit for its
        // own completion
        rendezvous.begin();
        let outcome = rendezvous.wait(Duration::from_millis(100)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn begin_discards_results_of_the_previous_transaction() {
        let rendezvous = Rendezvous::new();
        rendezvous.begin();
        assert!(rendezvous.complete_data(FunctionCode::ReadHoldingRegisters, &[0x11]));
        rendezvous.begin();
        assert!(rendezvous.complete_data(FunctionCode::ReadHoldingRegisters, &[0x22]));
        let outcome = rendezvous.wait(Duration::from_millis(100)).await;
        assert_eq!(outcome, WaitOutcome::Response(vec![0x22]));
    }
}
