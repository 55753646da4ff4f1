/// Unified error type shared by every layer of the library
///
/// Codes 0x01 through 0x04 are standard Modbus exception codes and keep their
/// wire values. Codes 0x80 and above are internal to this library. The numeric
/// value is stable so a recorded error can live in an `AtomicU8`, with 0
/// meaning that no error has been recorded.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModbusError {
    /// The function code received in the query is not an allowable action for the server
    IllegalFunction = 0x01,
    /// The data address received in the query is not an allowable address for the server
    IllegalDataAddress = 0x02,
    /// A value contained in the request is not an allowable value for the server
    IllegalDataValue = 0x03,
    /// An unrecoverable error occurred while the server was attempting to perform the action
    SlaveDeviceFailure = 0x04,
    /// No response arrived within the response timeout
    Timeout = 0x80,
    /// The transport discarded a response with a bad CRC
    CrcError = 0x81,
    /// The response was malformed or did not match the request
    InvalidResponse = 0x82,
    /// A bounded queue rejected an entry because it was full
    QueueFull = 0x83,
    /// The device has not completed initialization
    NotInitialized = 0x84,
    /// The request could not be submitted to the transport
    CommunicationError = 0x85,
    /// An argument failed validation
    InvalidParameter = 0x86,
    /// The system could not provide a required resource
    ResourceError = 0x87,
    /// A required object reference was absent
    NullPointer = 0x88,
    /// The requested operation is not supported
    NotSupported = 0x89,
    /// A mutex could not be acquired in time
    MutexError = 0x8A,
    /// A payload length did not match the expected shape
    InvalidDataLength = 0x8B,
    /// No device is registered at the requested address
    DeviceNotFound = 0x8C,
    /// A runtime resource could not be created
    ResourceCreationFailed = 0x8D,
    /// The server address is outside the valid range
    InvalidAddress = 0x8E,
}

impl ModbusError {
    /// Numeric code for this error, never 0
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Inverse of [`ModbusError::code`]. Returns `None` for 0 and for codes
    /// this library never produces.
    pub fn from_code(code: u8) -> Option<ModbusError> {
        match code {
            0x01 => Some(ModbusError::IllegalFunction),
            0x02 => Some(ModbusError::IllegalDataAddress),
            0x03 => Some(ModbusError::IllegalDataValue),
            0x04 => Some(ModbusError::SlaveDeviceFailure),
            0x80 => Some(ModbusError::Timeout),
            0x81 => Some(ModbusError::CrcError),
            0x82 => Some(ModbusError::InvalidResponse),
            0x83 => Some(ModbusError::QueueFull),
            0x84 => Some(ModbusError::NotInitialized),
            0x85 => Some(ModbusError::CommunicationError),
            0x86 => Some(ModbusError::InvalidParameter),
            0x87 => Some(ModbusError::ResourceError),
            0x88 => Some(ModbusError::NullPointer),
            0x89 => Some(ModbusError::NotSupported),
            0x8A => Some(ModbusError::MutexError),
            0x8B => Some(ModbusError::InvalidDataLength),
            0x8C => Some(ModbusError::DeviceNotFound),
            0x8D => Some(ModbusError::ResourceCreationFailed),
            0x8E => Some(ModbusError::InvalidAddress),
            _ => None,
        }
    }

    /// True for the four standard Modbus exception codes
    pub fn is_exception(self) -> bool {
        self.code() <= 0x04
    }
}

impl std::error::Error for ModbusError {}

impl std::fmt::Display for ModbusError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        match self {
            ModbusError::IllegalFunction => f.write_str("Illegal function"),
            ModbusError::IllegalDataAddress => f.write_str("Illegal data address"),
            ModbusError::IllegalDataValue => f.write_str("Illegal data value"),
            ModbusError::SlaveDeviceFailure => f.write_str("Slave device failure"),
            ModbusError::Timeout => f.write_str("Timeout"),
            ModbusError::CrcError => f.write_str("CRC error"),
            ModbusError::InvalidResponse => f.write_str("Invalid response"),
            ModbusError::QueueFull => f.write_str("Queue full"),
            ModbusError::NotInitialized => f.write_str("Not initialized"),
            ModbusError::CommunicationError => f.write_str("Communication error"),
            ModbusError::InvalidParameter => f.write_str("Invalid parameter"),
            ModbusError::ResourceError => f.write_str("Resource error"),
            ModbusError::NullPointer => f.write_str("Null pointer"),
            ModbusError::NotSupported => f.write_str("Not supported"),
            ModbusError::MutexError => f.write_str("Mutex error"),
            ModbusError::InvalidDataLength => f.write_str("Invalid data length"),
            ModbusError::DeviceNotFound => f.write_str("Device not found"),
            ModbusError::ResourceCreationFailed => f.write_str("Resource creation failed"),
            ModbusError::InvalidAddress => f.write_str("Invalid address"),
        }
    }
}
