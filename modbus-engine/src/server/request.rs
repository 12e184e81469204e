use crate::common::bits::{num_bytes_for_bits, num_bytes_for_registers};
use crate::common::function::FunctionCode;
use crate::common::parse::expect_empty;
use crate::common::traits::Parse;
use crate::constants::limits;
use crate::decode::AppDecodeLevel;
use crate::error::{AduParseError, RequestError};
use crate::server::handler::RequestHandler;
use crate::server::types::{BitIterator, RegisterIterator, WriteCoils, WriteDisplay, WriteRegisters};
use crate::types::*;

use scursor::ReadCursor;

#[derive(Debug)]
pub(crate) enum Request<'a> {
    ReadCoils(ReadBitsRange),
    ReadDiscreteInputs(ReadBitsRange),
    ReadHoldingRegisters(ReadRegistersRange),
    ReadInputRegisters(ReadRegistersRange),
    WriteSingleCoil(Indexed<bool>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleCoils(WriteCoils<'a>),
    WriteMultipleRegisters(WriteRegisters<'a>),
}

/// All requests that support broadcast
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub(crate) enum BroadcastRequest<'a> {
    WriteSingleCoil(Indexed<bool>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleCoils(WriteCoils<'a>),
    WriteMultipleRegisters(WriteRegisters<'a>),
}

impl BroadcastRequest<'_> {
    // execute a broadcast request against a device, there is nobody to report the result to
    pub(crate) fn execute(&self, handler: &mut dyn RequestHandler) {
        let _ = match self {
            BroadcastRequest::WriteSingleCoil(x) => handler.write_single_coil(*x),
            BroadcastRequest::WriteSingleRegister(x) => handler.write_single_register(*x),
            BroadcastRequest::WriteMultipleCoils(x) => handler.write_multiple_coils(*x),
            BroadcastRequest::WriteMultipleRegisters(x) => handler.write_multiple_registers(*x),
        };
    }
}

impl<'a> Request<'a> {
    pub(crate) fn get_function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils(_) => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
        }
    }

    pub(crate) fn into_broadcast_request(self) -> Option<BroadcastRequest<'a>> {
        match self {
            Request::ReadCoils(_) => None,
            Request::ReadDiscreteInputs(_) => None,
            Request::ReadHoldingRegisters(_) => None,
            Request::ReadInputRegisters(_) => None,
            Request::WriteSingleCoil(x) => Some(BroadcastRequest::WriteSingleCoil(x)),
            Request::WriteSingleRegister(x) => Some(BroadcastRequest::WriteSingleRegister(x)),
            Request::WriteMultipleCoils(x) => Some(BroadcastRequest::WriteMultipleCoils(x)),
            Request::WriteMultipleRegisters(x) => Some(BroadcastRequest::WriteMultipleRegisters(x)),
        }
    }

    pub(crate) fn parse(
        function: FunctionCode,
        cursor: &mut ReadCursor<'a>,
    ) -> Result<Self, RequestError> {
        let request = match function {
            FunctionCode::ReadCoils => {
                Request::ReadCoils(AddressRange::parse(cursor)?.of_read_bits()?)
            }
            FunctionCode::ReadDiscreteInputs => {
                Request::ReadDiscreteInputs(AddressRange::parse(cursor)?.of_read_bits()?)
            }
            FunctionCode::ReadHoldingRegisters => {
                Request::ReadHoldingRegisters(AddressRange::parse(cursor)?.of_read_registers()?)
            }
            FunctionCode::ReadInputRegisters => {
                Request::ReadInputRegisters(AddressRange::parse(cursor)?.of_read_registers()?)
            }
            FunctionCode::WriteSingleCoil => {
                Request::WriteSingleCoil(Indexed::<bool>::parse(cursor)?)
            }
            FunctionCode::WriteSingleRegister => {
                Request::WriteSingleRegister(Indexed::<u16>::parse(cursor)?)
            }
            FunctionCode::WriteMultipleCoils => {
                let range =
                    AddressRange::parse(cursor)?.limited_count(limits::MAX_WRITE_COILS_COUNT)?;
                expect_byte_count(cursor, num_bytes_for_bits(range.count))?;
                // consumes the rest of the frame
                return Ok(Request::WriteMultipleCoils(WriteCoils::new(
                    range,
                    BitIterator::parse_all(range, cursor)?,
                )));
            }
            FunctionCode::WriteMultipleRegisters => {
                let range = AddressRange::parse(cursor)?
                    .limited_count(limits::MAX_WRITE_REGISTERS_COUNT)?;
                expect_byte_count(cursor, num_bytes_for_registers(range.count))?;
                return Ok(Request::WriteMultipleRegisters(WriteRegisters::new(
                    range,
                    RegisterIterator::parse_all(range, cursor)?,
                )));
            }
        };

        expect_empty(cursor)?;
        Ok(request)
    }
}

fn expect_byte_count(cursor: &mut ReadCursor, expected: usize) -> Result<(), RequestError> {
    let actual = cursor.read_u8()? as usize;
    if actual != expected {
        return Err(AduParseError::ByteCountMismatch(expected, actual).into());
    }
    Ok(())
}

pub(crate) struct RequestDisplay<'a, 'b> {
    request: &'a Request<'b>,
    level: AppDecodeLevel,
}

impl<'a, 'b> RequestDisplay<'a, 'b> {
    pub(crate) fn new(level: AppDecodeLevel, request: &'a Request<'b>) -> Self {
        Self { request, level }
    }
}

impl std::fmt::Display for RequestDisplay<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.request.get_function())?;

        if self.level.data_headers() {
            match self.request {
                Request::ReadCoils(range) | Request::ReadDiscreteInputs(range) => {
                    write!(f, " {}", range.get())?;
                }
                Request::ReadHoldingRegisters(range) | Request::ReadInputRegisters(range) => {
                    write!(f, " {}", range.get())?;
                }
                Request::WriteSingleCoil(request) => {
                    write!(f, " {request}")?;
                }
                Request::WriteSingleRegister(request) => {
                    write!(f, " {request}")?;
                }
                Request::WriteMultipleCoils(items) => {
                    let values = WriteDisplay::new(self.level, items.range, items.iterator);
                    write!(f, " {values}")?;
                }
                Request::WriteMultipleRegisters(items) => {
                    let values = WriteDisplay::new(self.level, items.range, items.iterator);
                    write!(f, " {values}")?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    mod reads {
        use scursor::ReadCursor;

        use super::super::*;
        use crate::error::InvalidRange;

        #[test]
        fn can_parse_read_coils() {
            let mut cursor = ReadCursor::new(&[0x00, 0x02, 0x00, 0x0A]);
            match Request::parse(FunctionCode::ReadCoils, &mut cursor).unwrap() {
                Request::ReadCoils(range) => {
                    assert_eq!(range.get(), AddressRange::try_from(2, 10).unwrap())
                }
                _ => panic!("bad match"),
            }
        }

        #[test]
        fn fails_when_too_many_registers_requested() {
            let mut cursor = ReadCursor::new(&[0x00, 0x00, 0x00, 0x7E]);
            let err = Request::parse(FunctionCode::ReadHoldingRegisters, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, InvalidRange::CountTooLargeForType(126, 125).into());
        }

        #[test]
        fn fails_on_trailing_bytes() {
            let mut cursor = ReadCursor::new(&[0x00, 0x00, 0x00, 0x01, 0x00]);
            let err = Request::parse(FunctionCode::ReadInputRegisters, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::TrailingBytes(1).into());
        }

        #[test]
        fn reads_are_not_broadcast() {
            let mut cursor = ReadCursor::new(&[0x00, 0x00, 0x00, 0x01]);
            let request = Request::parse(FunctionCode::ReadDiscreteInputs, &mut cursor).unwrap();
            assert!(request.into_broadcast_request().is_none());
        }
    }

    mod coils {
        use scursor::ReadCursor;

        use super::super::*;
        use crate::types::Indexed;

        #[test]
        fn fails_when_byte_count_too_small() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x08, 0x00]);
            let err = Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::ByteCountMismatch(1, 0).into());
        }

        #[test]
        fn fails_when_byte_count_too_large() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x08, 0x02]);
            let err = Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::ByteCountMismatch(1, 2).into());
        }

        #[test]
        fn fails_when_specified_byte_count_not_present() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x08, 0x01]);
            let err = Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::InsufficientBytes.into());
        }

        #[test]
        fn fails_when_too_many_bytes_present() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x08, 0x01, 0xFF, 0xFF]);
            let err = Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::TrailingBytes(1).into());
        }

        #[test]
        fn fails_for_bad_single_coil_value() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x12, 0x34]);
            let err = Request::parse(FunctionCode::WriteSingleCoil, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::UnknownCoilState(0x1234).into());
        }

        #[test]
        fn can_parse_coils() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x03, 0x01, 0x05]);
            let coils = match Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor).unwrap()
            {
                Request::WriteMultipleCoils(write) => write,
                _ => panic!("bad match"),
            };

            assert_eq!(coils.range, AddressRange::try_from(1, 3).unwrap());
            assert_eq!(
                coils.iterator.collect::<Vec<Indexed<bool>>>(),
                vec![
                    Indexed::new(1, true),
                    Indexed::new(2, false),
                    Indexed::new(3, true)
                ]
            )
        }
    }

    mod registers {
        use scursor::ReadCursor;

        use super::super::*;
        use crate::error::InvalidRange;
        use crate::types::Indexed;

        #[test]
        fn fails_when_byte_count_does_not_match_quantity() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x01, 0x03]);
            let err = Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::ByteCountMismatch(2, 3).into());
        }

        #[test]
        fn fails_when_specified_byte_count_not_present() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x01, 0x02, 0xFF]);
            let err = Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::InsufficientBytes.into());
        }

        #[test]
        fn fails_when_quantity_exceeds_limit() {
            let mut cursor = ReadCursor::new(&[0x00, 0x00, 0x00, 0x7C, 0xF8]);
            let err = Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, InvalidRange::CountTooLargeForType(124, 123).into());
        }

        #[test]
        fn can_parse_registers() {
            let mut cursor =
                ReadCursor::new(&[0x00, 0x01, 0x00, 0x02, 0x04, 0xCA, 0xFE, 0xBB, 0xDD]);
            let registers =
                match Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor).unwrap() {
                    Request::WriteMultipleRegisters(write) => write,
                    _ => panic!("bad match"),
                };

            assert_eq!(registers.range, AddressRange::try_from(1, 2).unwrap());
            assert_eq!(
                registers.iterator.collect::<Vec<Indexed<u16>>>(),
                vec![Indexed::new(1, 0xCAFE), Indexed::new(2, 0xBBDD)]
            )
        }

        #[test]
        fn display_includes_values_when_enabled() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x01, 0x02, 0x00, 0x2A]);
            let request =
                Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor).unwrap();

            let headers = RequestDisplay::new(AppDecodeLevel::DataHeaders, &request).to_string();
            assert_eq!(
                headers,
                "WRITE MULTIPLE REGISTERS (0x10) start: 0x0001 qty: 1"
            );

            let values = RequestDisplay::new(AppDecodeLevel::DataValues, &request).to_string();
            assert_eq!(
                values,
                "WRITE MULTIPLE REGISTERS (0x10) start: 0x0001 qty: 1\nidx: 0x0001 value: 0x002A"
            );
        }
    }
}
