use crate::common::frame::FunctionField;
use crate::common::function::FunctionCode;
use crate::common::traits::Serialize;
use crate::decode::AppDecodeLevel;
use crate::error::RequestError;
use crate::exception::ExceptionCode;
use crate::types::{AddressRange, Indexed};

use scursor::WriteCursor;

/// Body of a successful reply, produced while the device is locked and encoded afterwards
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Reply {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
    SingleCoil(Indexed<bool>),
    SingleRegister(Indexed<u16>),
    WriteMultiple(AddressRange),
}

pub(crate) struct Response<'a> {
    function: FunctionCode,
    body: &'a Reply,
}

impl<'a> Response<'a> {
    pub(crate) fn new(function: FunctionCode, body: &'a Reply) -> Self {
        Response { function, body }
    }
}

impl Serialize for Reply {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        match self {
            Reply::Bits(values) => values.as_slice().serialize(cursor),
            Reply::Registers(values) => values.as_slice().serialize(cursor),
            Reply::SingleCoil(value) => value.serialize(cursor),
            Reply::SingleRegister(value) => value.serialize(cursor),
            Reply::WriteMultiple(range) => range.serialize(cursor),
        }
    }
}

impl Serialize for Response<'_> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function.get_value())?;
        self.body.serialize(cursor)
    }
}

pub(crate) struct ErrorResponse {
    function: FunctionField,
    exception: ExceptionCode,
}

impl ErrorResponse {
    pub(crate) fn new(function: FunctionCode, exception: ExceptionCode) -> Self {
        ErrorResponse {
            function: FunctionField::Exception(function),
            exception,
        }
    }

    pub(crate) fn unknown_function(unknown: u8) -> Self {
        ErrorResponse {
            function: FunctionField::UnknownFunction(unknown),
            exception: ExceptionCode::IllegalFunction,
        }
    }
}

impl Serialize for ErrorResponse {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function.get_value())?;
        self.exception.serialize(cursor)
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} ({:#04X})",
            self.function,
            self.exception,
            u8::from(self.exception)
        )
    }
}

pub(crate) struct ResponseDisplay<'a> {
    response: &'a Response<'a>,
    level: AppDecodeLevel,
}

impl<'a> ResponseDisplay<'a> {
    pub(crate) fn new(level: AppDecodeLevel, response: &'a Response<'a>) -> Self {
        Self { response, level }
    }
}

fn write_range(f: &mut std::fmt::Formatter<'_>, count: usize) -> std::fmt::Result {
    write!(f, " qty: {count}")
}

impl std::fmt::Display for ResponseDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.response.function)?;

        if !self.level.data_headers() {
            return Ok(());
        }

        match self.response.body {
            Reply::Bits(values) => {
                write_range(f, values.len())?;
                if self.level.data_values() {
                    for (i, x) in values.iter().enumerate() {
                        write!(f, "\n[{i}] value: {}", *x as i32)?;
                    }
                }
            }
            Reply::Registers(values) => {
                write_range(f, values.len())?;
                if self.level.data_values() {
                    for (i, x) in values.iter().enumerate() {
                        write!(f, "\n[{i}] value: {x:#06X}")?;
                    }
                }
            }
            Reply::SingleCoil(x) => write!(f, " {x}")?,
            Reply::SingleRegister(x) => write!(f, " {x}")?,
            Reply::WriteMultiple(range) => write!(f, " {range}")?,
        }

        Ok(())
    }
}
