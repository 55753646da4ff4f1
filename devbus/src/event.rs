use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::ModbusError;

/// Bit mask type used by [`EventGroup`]
pub type EventBits = u32;

/// Shared 32-bit event set
///
/// Devices raise application-chosen bits on lifecycle transitions (ready,
/// error) and tasks wait on any subset. Bits stay set until explicitly
/// cleared, and a waiter that subscribes after a bit was raised observes it
/// immediately. Clones share the same bit set.
#[derive(Clone)]
pub struct EventGroup {
    bits: Arc<watch::Sender<EventBits>>,
}

impl EventGroup {
    /// Create an event group with all bits clear
    pub fn new() -> EventGroup {
        let (tx, _rx) = watch::channel(0);
        EventGroup { bits: Arc::new(tx) }
    }

    /// Raise the given bits, leaving others untouched
    pub fn set(&self, bits: EventBits) {
        if bits != 0 {
            self.bits.send_modify(|current| *current |= bits);
        }
    }

    /// Clear the given bits, leaving others untouched
    pub fn clear(&self, bits: EventBits) {
        if bits != 0 {
            self.bits.send_modify(|current| *current &= !bits);
        }
    }

    /// Current bit set
    pub fn get(&self) -> EventBits {
        *self.bits.borrow()
    }

    /// Wait until any bit in `mask` is set, returning the full bit set at
    /// that moment. Fails with [`ModbusError::Timeout`] when the timeout
    /// expires first.
    pub async fn wait_any(
        &self,
        mask: EventBits,
        timeout: Duration,
    ) -> Result<EventBits, ModbusError> {
        let mut rx = self.bits.subscribe();
        let wait = rx.wait_for(|bits| bits & mask != 0);
        let result = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(bits)) => Ok(*bits),
            Ok(Err(_)) => Err(ModbusError::ResourceError),
            Err(_) => Err(ModbusError::Timeout),
        };
        result
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        EventGroup::new()
    }
}

impl std::fmt::Debug for EventGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        f.debug_struct("EventGroup")
            .field("bits", &format_args!("{:#010X}", self.get()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_manipulate_single_bits() {
        let group = EventGroup::new();
        group.set(0x01);
        group.set(0x0001_0000);
        assert_eq!(group.get(), 0x0001_0001);
        group.clear(0x01);
        assert_eq!(group.get(), 0x0001_0000);
    }

    #[tokio::test]
    async fn wait_sees_a_bit_set_before_subscribing() {
        let group = EventGroup::new();
        group.set(0x04);
        let bits = group.wait_any(0x04, Duration::from_millis(100)).await;
        assert_eq!(bits, Ok(0x04));
    }

    #[tokio::test]
    async fn wait_wakes_on_a_later_set() {
        let group = EventGroup::new();
        let waiter = {
            let group = group.clone();
            tokio::spawn(async move { group.wait_any(0x02, Duration::from_secs(1)).await })
        };
        tokio::task::yield_now().await;
        group.set(0x02);
        assert_eq!(waiter.await.unwrap(), Ok(0x02));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_no_bit_arrives() {
        let group = EventGroup::new();
        group.set(0x01);
        let result = group.wait_any(0x02, Duration::from_millis(500)).await;
        assert_eq!(result, Err(ModbusError::Timeout));
    }

    #[tokio::test]
    async fn any_bit_of_the_mask_satisfies_the_wait() {
        let group = EventGroup::new();
        group.set(0x08);
        let bits = group.wait_any(0x0C, Duration::from_millis(100)).await;
        assert_eq!(bits, Ok(0x08));
    }
}
