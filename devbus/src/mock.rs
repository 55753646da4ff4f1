use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::function::FunctionCode;
use crate::registry::Registry;
use crate::transport::{ModbusTransport, TransportError};
use crate::types::Priority;

/// Request recorded by the mock transport, one variant per submission method
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    ReadCoils {
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    },
    ReadDiscreteInputs {
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    },
    ReadHoldingRegisters {
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    },
    ReadInputRegisters {
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    },
    WriteSingleCoil {
        server: u8,
        address: u16,
        value: bool,
        priority: Priority,
    },
    WriteSingleRegister {
        server: u8,
        address: u16,
        value: u16,
        priority: Priority,
    },
    WriteMultipleCoils {
        server: u8,
        address: u16,
        values: Vec<bool>,
        priority: Priority,
    },
    WriteMultipleRegisters {
        server: u8,
        address: u16,
        payload: Vec<u8>,
        priority: Priority,
    },
}

/// Scripted behavior for one submission, consumed in FIFO order.
/// Submissions beyond the script stay silent.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Accept the submission and deliver this payload through the dispatch
    /// path before returning
    Data(Vec<u8>),
    /// Accept the submission and deliver this failure through the dispatch
    /// path before returning
    Error(TransportError),
    /// Accept the submission and deliver nothing
    Silent,
    /// Fail the submission itself
    Reject(TransportError),
}

/// Transport double that records submissions and plays back scripted
/// outcomes synchronously, so tests stay deterministic without tasks
pub(crate) struct MockTransport {
    registry: &'static Registry,
    requests: Mutex<Vec<Request>>,
    script: Mutex<VecDeque<Reply>>,
}

impl MockTransport {
    pub(crate) fn attach(registry: &'static Registry) -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport {
            registry,
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
        });
        registry.set_transport(mock.clone());
        mock
    }

    pub(crate) fn enqueue(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    fn on_submission(
        &self,
        request: Request,
        server: u8,
        function: FunctionCode,
        address: u16,
    ) -> Result<(), TransportError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Silent);
        match reply {
            Reply::Data(data) => {
                self.registry
                    .dispatch_response(server, function, address, &data);
                Ok(())
            }
            Reply::Error(error) => {
                self.registry.dispatch_error(server, error);
                Ok(())
            }
            Reply::Silent => Ok(()),
            Reply::Reject(error) => Err(error),
        }
    }
}

impl ModbusTransport for MockTransport {
    fn request_read_coils(
        &self,
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<(), TransportError> {
        self.on_submission(
            Request::ReadCoils {
                server,
                address,
                count,
                priority,
            },
            server,
            FunctionCode::ReadCoils,
            address,
        )
    }

    fn request_read_discrete_inputs(
        &self,
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<(), TransportError> {
        self.on_submission(
            Request::ReadDiscreteInputs {
                server,
                address,
                count,
                priority,
            },
            server,
            FunctionCode::ReadDiscreteInputs,
            address,
        )
    }

    fn request_read_holding_registers(
        &self,
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<(), TransportError> {
        self.on_submission(
            Request::ReadHoldingRegisters {
                server,
                address,
                count,
                priority,
            },
            server,
            FunctionCode::ReadHoldingRegisters,
            address,
        )
    }

    fn request_read_input_registers(
        &self,
        server: u8,
        address: u16,
        count: u16,
        priority: Priority,
    ) -> Result<(), TransportError> {
        self.on_submission(
            Request::ReadInputRegisters {
                server,
                address,
                count,
                priority,
            },
            server,
            FunctionCode::ReadInputRegisters,
            address,
        )
    }

    fn request_write_single_coil(
        &self,
        server: u8,
        address: u16,
        value: bool,
        priority: Priority,
    ) -> Result<(), TransportError> {
        self.on_submission(
            Request::WriteSingleCoil {
                server,
                address,
                value,
                priority,
            },
            server,
            FunctionCode::WriteSingleCoil,
            address,
        )
    }

    fn request_write_single_register(
        &self,
        server: u8,
        address: u16,
        value: u16,
        priority: Priority,
    ) -> Result<(), TransportError> {
        self.on_submission(
            Request::WriteSingleRegister {
                server,
                address,
                value,
                priority,
            },
            server,
            FunctionCode::WriteSingleRegister,
            address,
        )
    }

    fn request_write_multiple_coils(
        &self,
        server: u8,
        address: u16,
        values: &[bool],
        priority: Priority,
    ) -> Result<(), TransportError> {
        self.on_submission(
            Request::WriteMultipleCoils {
                server,
                address,
                values: values.to_vec(),
                priority,
            },
            server,
            FunctionCode::WriteMultipleCoils,
            address,
        )
    }

    fn request_write_multiple_registers(
        &self,
        server: u8,
        address: u16,
        payload: &[u8],
        priority: Priority,
    ) -> Result<(), TransportError> {
        self.on_submission(
            Request::WriteMultipleRegisters {
                server,
                address,
                payload: payload.to_vec(),
                priority,
            },
            server,
            FunctionCode::WriteMultipleRegisters,
            address,
        )
    }
}
