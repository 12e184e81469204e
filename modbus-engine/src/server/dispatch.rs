use crate::exception::ExceptionCode;
use crate::server::handler::RequestHandler;
use crate::server::request::Request;
use crate::server::response::Reply;
use crate::types::AddressRange;

/// Run a request against a locked device
///
/// Reads succeed only if every address in the range is present. Writes are delegated to the
/// device's write handler and echo the request on success.
pub(crate) fn dispatch(
    request: &Request,
    handler: &mut dyn RequestHandler,
) -> Result<Reply, ExceptionCode> {
    match request {
        Request::ReadCoils(range) => {
            read_all(range.get(), |i| handler.read_coil(i))
                .map(Reply::Bits)
        }
        Request::ReadDiscreteInputs(range) => {
            read_all(range.get(), |i| handler.read_discrete_input(i))
                .map(Reply::Bits)
        }
        Request::ReadHoldingRegisters(range) => {
            read_all(range.get(), |i| handler.read_holding_register(i))
                .map(Reply::Registers)
        }
        Request::ReadInputRegisters(range) => {
            read_all(range.get(), |i| handler.read_input_register(i))
                .map(Reply::Registers)
        }
        Request::WriteSingleCoil(x) => handler
            .write_single_coil(*x)
            .map(|_| Reply::SingleCoil(*x)),
        Request::WriteSingleRegister(x) => handler
            .write_single_register(*x)
            .map(|_| Reply::SingleRegister(*x)),
        Request::WriteMultipleCoils(items) => handler
            .write_multiple_coils(*items)
            .map(|_| Reply::WriteMultiple(items.range)),
        Request::WriteMultipleRegisters(items) => handler
            .write_multiple_registers(*items)
            .map(|_| Reply::WriteMultiple(items.range)),
    }
}

fn read_all<T, F>(range: AddressRange, get: F) -> Result<Vec<T>, ExceptionCode>
where
    F: FnMut(u16) -> Result<T, ExceptionCode>,
{
    range.iter().map(get).collect()
}
