use crate::error::ModbusError;
use crate::types::Priority;

/// Failure reported by the transport layer
///
/// Submission methods return these synchronously when a request cannot be
/// queued. The transport also delivers them asynchronously through
/// [`crate::dispatch_error`] when a transaction fails after submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the transport's own timeout
    Timeout,
    /// Response frame failed the CRC check
    CrcError,
    /// Response frame was malformed
    InvalidResponse,
    /// Transmit queue is full
    QueueFull,
    /// The transport could not allocate buffer space
    MemoryAllocationFailed,
    /// Exception response: illegal function
    IllegalFunction,
    /// Exception response: illegal data address
    IllegalDataAddress,
    /// Exception response: illegal data value
    IllegalDataValue,
    /// Exception response: server device failure
    ServerDeviceFailure,
    /// Request named an invalid server address
    InvalidSlave,
    /// Request named a function code the transport does not speak
    InvalidFunction,
    /// Request argument rejected by the transport
    InvalidParameter,
    /// Serial link failure
    CommError,
}

impl std::error::Error for TransportError {}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        match self {
            TransportError::Timeout => f.write_str("transport timeout"),
            TransportError::CrcError => f.write_str("CRC check failed"),
            TransportError::InvalidResponse => f.write_str("malformed response frame"),
            TransportError::QueueFull => f.write_str("transmit queue full"),
            TransportError::MemoryAllocationFailed => f.write_str("buffer allocation failed"),
            TransportError::IllegalFunction => f.write_str("exception: illegal function"),
            TransportError::IllegalDataAddress => f.write_str("exception: illegal data address"),
            TransportError::IllegalDataValue => f.write_str("exception: illegal data value"),
            TransportError::ServerDeviceFailure => f.write_str("exception: server device failure"),
            TransportError::InvalidSlave => f.write_str("invalid server address"),
            TransportError::InvalidFunction => f.write_str("unsupported function code"),
            TransportError::InvalidParameter => f.write_str("invalid request parameter"),
            TransportError::CommError => f.write_str("serial link failure"),
        }
    }
}

impl From<TransportError> for ModbusError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ModbusError::Timeout,
            TransportError::CrcError => ModbusError::CrcError,
            TransportError::InvalidResponse => ModbusError::InvalidResponse,
            TransportError::QueueFull => ModbusError::QueueFull,
            TransportError::MemoryAllocationFailed => ModbusError::ResourceError,
            TransportError::IllegalFunction => ModbusError::IllegalFunction,
            TransportError::IllegalDataAddress => ModbusError::IllegalDataAddress,
            TransportError::IllegalDataValue => ModbusError::IllegalDataValue,
            TransportError::ServerDeviceFailure => ModbusError::SlaveDeviceFailure,
            TransportError::InvalidSlave => ModbusError::InvalidParameter,
            TransportError::InvalidFunction => ModbusError::InvalidParameter,
            TransportError::InvalidParameter => ModbusError::InvalidParameter,
            TransportError::CommError => ModbusError::CommunicationError,
        }
    }
}

/// Lower-level Modbus RTU transport
///
/// The transport owns UART framing, CRC generation and checking, and a
/// priority-ordered transmit queue. Every method submits a request and
/// returns without waiting for the reply; replies and failures come back
/// later through [`crate::dispatch_response`] and [`crate::dispatch_error`].
/// Implementations must be callable from any task.
pub trait ModbusTransport: Send + Sync {
    /// Submit a read coils request (0x01)
    fn request_read_coils(
        &self,
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<(), TransportError>;

    /// Submit a read discrete inputs request (0x02)
    fn request_read_discrete_inputs(
        &self,
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<(), TransportError>;

    /// Submit a read holding registers request (0x03)
    fn request_read_holding_registers(
        &self,
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<(), TransportError>;

    /// Submit a read input registers request (0x04)
    fn request_read_input_registers(
        &self,
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<(), TransportError>;

    /// Submit a write single coil request (0x05)
    fn request_write_single_coil(
        &self,
        server: u8,
        address: u16,
        value: bool,
        priority: Priority,
    ) -> Result<(), TransportError>;

    /// Submit a write single register request (0x06)
    fn request_write_single_register(
        &self,
        server: u8,
        address: u16,
        value: u16,
        priority: Priority,
    ) -> Result<(), TransportError>;

    /// Submit a write multiple coils request (0x0F), one bool per coil
    fn request_write_multiple_coils(
        &self,
        server: u8,
        address: u16,
        values: &[bool],
        priority: Priority,
    ) -> Result<(), TransportError>;

    /// Submit a write multiple registers request (0x10); the payload carries
    /// each register as a big-endian byte pair
    fn request_write_multiple_registers(
        &self,
        server: u8,
        address: u16,
        payload: &[u8],
        priority: Priority,
    ) -> Result<(), TransportError>;
}
