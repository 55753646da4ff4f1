use std::fmt::{Display, Formatter};

mod constants {
    pub(crate) const READ_COILS: u8 = 1;
    pub(crate) const READ_DISCRETE_INPUTS: u8 = 2;
    pub(crate) const READ_HOLDING_REGISTERS: u8 = 3;
    pub(crate) const READ_INPUT_REGISTERS: u8 = 4;
    pub(crate) const WRITE_SINGLE_COIL: u8 = 5;
    pub(crate) const WRITE_SINGLE_REGISTER: u8 = 6;
    pub(crate) const WRITE_MULTIPLE_COILS: u8 = 15;
    pub(crate) const WRITE_MULTIPLE_REGISTERS: u8 = 16;
}

/// Modbus function codes supported by this library
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read coils (0x01)
    ReadCoils = constants::READ_COILS,
    /// Read discrete inputs (0x02)
    ReadDiscreteInputs = constants::READ_DISCRETE_INPUTS,
    /// Read holding registers (0x03)
    ReadHoldingRegisters = constants::READ_HOLDING_REGISTERS,
    /// Read input registers (0x04)
    ReadInputRegisters = constants::READ_INPUT_REGISTERS,
    /// Write single coil (0x05)
    WriteSingleCoil = constants::WRITE_SINGLE_COIL,
    /// Write single register (0x06)
    WriteSingleRegister = constants::WRITE_SINGLE_REGISTER,
    /// Write multiple coils (0x0F)
    WriteMultipleCoils = constants::WRITE_MULTIPLE_COILS,
    /// Write multiple registers (0x10)
    WriteMultipleRegisters = constants::WRITE_MULTIPLE_REGISTERS,
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            FunctionCode::ReadCoils => write!(f, "READ COILS ({:#04X})", self.get_value()),
            FunctionCode::ReadDiscreteInputs => {
                write!(f, "READ DISCRETE INPUTS ({:#04X})", self.get_value())
            }
            FunctionCode::ReadHoldingRegisters => {
                write!(f, "READ HOLDING REGISTERS ({:#04X})", self.get_value())
            }
            FunctionCode::ReadInputRegisters => {
                write!(f, "READ INPUT REGISTERS ({:#04X})", self.get_value())
            }
            FunctionCode::WriteSingleCoil => {
                write!(f, "WRITE SINGLE COIL ({:#04X})", self.get_value())
            }
            FunctionCode::WriteSingleRegister => {
                write!(f, "WRITE SINGLE REGISTER ({:#04X})", self.get_value())
            }
            FunctionCode::WriteMultipleCoils => {
                write!(f, "WRITE MULTIPLE COILS ({:#04X})", self.get_value())
            }
            FunctionCode::WriteMultipleRegisters => {
                write!(f, "WRITE MULTIPLE REGISTERS ({:#04X})", self.get_value())
            }
        }
    }
}

impl FunctionCode {
    /// Raw function code byte
    pub const fn get_value(self) -> u8 {
        self as u8
    }

    /// Look up a supported function code by its raw byte
    pub fn get(value: u8) -> Option<Self> {
        match value {
            constants::READ_COILS => Some(FunctionCode::ReadCoils),
            constants::READ_DISCRETE_INPUTS => Some(FunctionCode::ReadDiscreteInputs),
            constants::READ_HOLDING_REGISTERS => Some(FunctionCode::ReadHoldingRegisters),
            constants::READ_INPUT_REGISTERS => Some(FunctionCode::ReadInputRegisters),
            constants::WRITE_SINGLE_COIL => Some(FunctionCode::WriteSingleCoil),
            constants::WRITE_SINGLE_REGISTER => Some(FunctionCode::WriteSingleRegister),
            constants::WRITE_MULTIPLE_COILS => Some(FunctionCode::WriteMultipleCoils),
            constants::WRITE_MULTIPLE_REGISTERS => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// True for the four write operations. Write responses may carry an empty
    /// payload, which counts as a completed transaction.
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil
                | FunctionCode::WriteSingleRegister
                | FunctionCode::WriteMultipleCoils
                | FunctionCode::WriteMultipleRegisters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_supported_code() {
        for value in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10] {
            let fc = FunctionCode::get(value).unwrap();
            assert_eq!(fc.get_value(), value);
        }
    }

    #[test]
    fn rejects_unsupported_codes() {
        assert_eq!(FunctionCode::get(0x00), None);
        assert_eq!(FunctionCode::get(0x07), None);
        assert_eq!(FunctionCode::get(0x17), None);
    }

    #[test]
    fn classifies_write_operations() {
        assert!(FunctionCode::WriteSingleCoil.is_write());
        assert!(FunctionCode::WriteSingleRegister.is_write());
        assert!(FunctionCode::WriteMultipleCoils.is_write());
        assert!(FunctionCode::WriteMultipleRegisters.is_write());
        assert!(!FunctionCode::ReadCoils.is_write());
        assert!(!FunctionCode::ReadHoldingRegisters.is_write());
    }
}
