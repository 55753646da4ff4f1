//! A device-oriented client core for the [Modbus](http://modbus.org/) RTU protocol
//! using [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! Devices are long-lived objects registered by server address in a
//! process-wide [`Registry`]. A single bus mutex serializes complete
//! request/response cycles across all of them, so many tasks can poll many
//! devices on one RS-485 segment without interleaving frames. The transport
//! below is pluggable through the [`ModbusTransport`] trait; responses and
//! errors come back through the registry's dispatch entry points.
//!
//! # Features
//!
//! * One bus mutex serializing every request/response cycle on the segment
//! * Per-device statistics, init phases, and event-group signaling
//! * Channel-oriented sensor layer with scaling and range plausibility checks
//! * Optional queued response delivery decoupled from the dispatch path
//! * Lock-free categorized error statistics per server address
//!
//! # Supported Functions
//!
//! * Read Coils
//! * Read Discrete Inputs
//! * Read Holding Registers
//! * Read Input Registers
//! * Write Single Coil
//! * Write Single Register
//! * Write Multiple Coils
//! * Write Multiple Registers
//!
//! # Examples
//!
//! A simple application that periodically polls a power meter
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use devbus::{DeviceHandler, ModbusDevice};
//!
//! struct Meter {
//!     core: ModbusDevice,
//! }
//!
//! impl DeviceHandler for Meter {
//!     fn device(&self) -> &ModbusDevice {
//!         &self.core
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // the serial transport is application-provided:
//!     // devbus::Registry::instance().set_transport(transport);
//!
//!     let meter = Arc::new(Meter {
//!         core: ModbusDevice::new(0x02),
//!     });
//!     meter.clone().register()?;
//!
//!     // poll a block of holding registers every 3 seconds
//!     loop {
//!         match meter.core.read_holding_registers(0x0000, 5).await {
//!             Ok(values) => {
//!                 for (index, value) in values.iter().enumerate() {
//!                     println!("register {index}: {value}")
//!                 }
//!             }
//!             Err(err) => println!("error: {err}"),
//!         }
//!
//!         tokio::time::sleep(Duration::from_secs(3)).await
//!     }
//! }
//! ```

/// Request size, timeout, and serial timing constants
pub mod constants;
/// Lock-free categorized error statistics per server address
pub mod tracker;

// internal modules
mod device;
mod error;
mod event;
mod function;
#[cfg(test)]
pub(crate) mod mock;
mod parse;
mod queue;
mod registry;
mod rendezvous;
mod sensor;
mod transport;
mod types;
mod util;

pub use device::{DeviceHandler, ModbusDevice};
pub use error::ModbusError;
pub use event::{EventBits, EventGroup};
pub use function::FunctionCode;
pub use queue::{AsyncPacket, QueuedDevice, ResponseQueue, DEFAULT_QUEUE_DEPTH};
pub use registry::{dispatch_error, dispatch_response, BusGuard, Registry};
pub use sensor::{ChannelSet, SensorDevice};
pub use transport::{ModbusTransport, TransportError};
pub use types::{InitPhase, Priority, Statistics};
