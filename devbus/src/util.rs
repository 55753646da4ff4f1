use std::sync::OnceLock;
use std::time::Instant;

/// Milliseconds since a process-wide monotonic epoch captured on first use.
/// Shared by packet timestamps, channel update stamps, and the error tracker
/// so their ages compare against the same clock.
pub(crate) fn now_millis() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}
