use crate::exception::ExceptionCode;
use crate::types::UnitId;

/// The task processing requests has terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown;

/// Top level error type used while processing a request on the server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An I/O error occurred
    Io(std::io::ErrorKind),
    /// A Modbus exception was produced while handling the request
    Exception(ExceptionCode),
    /// Request contained an invalid address range
    BadRange(InvalidRange),
    /// Request body could not be parsed
    BadRequest(AduParseError),
    /// A frame could not be parsed from the stream
    BadFrame(FrameParseError),
    /// Internal error that should never occur
    Internal(InternalError),
    /// The task processing requests has been shut down
    Shutdown,
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => std::io::Error::from(*kind).fmt(f),
            RequestError::Exception(err) => err.fmt(f),
            RequestError::BadRange(err) => err.fmt(f),
            RequestError::BadRequest(err) => err.fmt(f),
            RequestError::BadFrame(err) => err.fmt(f),
            RequestError::Internal(err) => err.fmt(f),
            RequestError::Shutdown => {
                f.write_str("the task processing requests has been shut down")
            }
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(err: ExceptionCode) -> Self {
        RequestError::Exception(err)
    }
}

impl From<InvalidRange> for RequestError {
    fn from(err: InvalidRange) -> Self {
        RequestError::BadRange(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

impl From<Shutdown> for RequestError {
    fn from(_: Shutdown) -> Self {
        RequestError::Shutdown
    }
}

impl From<scursor::ReadError> for RequestError {
    fn from(err: scursor::ReadError) -> Self {
        RequestError::BadRequest(err.into())
    }
}

impl From<scursor::WriteError> for RequestError {
    fn from(err: scursor::WriteError) -> Self {
        RequestError::Internal(err.into())
    }
}

impl std::error::Error for Shutdown {}

impl std::fmt::Display for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("the task has been shut down")
    }
}

/// Errors that can be produced when validating start/count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRange {
    /// Count of zero not allowed
    CountOfZero,
    /// Address in range overflows u16
    AddressOverflow(u16, u16),
    /// Count too large for type
    CountTooLargeForType(u16, u16), // count / max
}

impl std::error::Error for InvalidRange {}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRange::CountOfZero => f.write_str("range contains count == 0"),
            InvalidRange::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count = {count} would overflow u16 representation"
            ),
            InvalidRange::CountTooLargeForType(x, y) => write!(
                f,
                "count of {x} is too large for the specified type (max == {y})"
            ),
        }
    }
}

/// Errors that occur while parsing a request body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// Request is too short to be valid
    InsufficientBytes,
    /// Byte count doesn't match what is expected based on the quantity
    ByteCountMismatch(usize, usize), // expected count / actual count
    /// Request contains extra trailing bytes
    TrailingBytes(usize),
    /// Bad value for the coil state
    UnknownCoilState(u16),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("request is too short to be valid"),
            AduParseError::ByteCountMismatch(expected, actual) => write!(
                f,
                "byte count ({actual}) doesn't match what is expected based on the quantity ({expected})"
            ),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "request contains {remaining} extra trailing bytes")
            }
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
        }
    }
}

impl From<scursor::ReadError> for AduParseError {
    fn from(_: scursor::ReadError) -> Self {
        AduParseError::InsufficientBytes
    }
}

/// Errors that occur while parsing a frame off a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// Received TCP frame with the length field set to zero
    MbapLengthZero,
    /// Received TCP frame with length that exceeds max allowed size
    MbapLengthTooBig(usize, usize), // actual size and the maximum size
    /// Received TCP frame within non-Modbus protocol id
    UnknownProtocolId(u16),
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("Received TCP frame with the length field set to zero")
            }
            FrameParseError::MbapLengthTooBig(size, max) => write!(
                f,
                "Received TCP frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "Received TCP frame with non-Modbus protocol id: {id}")
            }
        }
    }
}

/// Errors that indicate faulty logic in the library itself if they occur
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Insufficient space for write operation
    InsufficientWriteSpace,
    /// The calculated frame size exceeds what is allowed by the protocol
    FrameTooBig(usize, usize), // the size and the maximum size
    /// Attempted to read more bytes than present
    InsufficientBytesForRead(usize, usize), // requested / remaining
    /// Byte count would exceed maximum allowed size in the ADU of u8
    BadByteCount(usize),
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace => {
                f.write_str("insufficient space for write operation")
            }
            InternalError::FrameTooBig(size, max) => write!(
                f,
                "The calculated frame size ({size}) exceeds the maximum allowed size ({max})"
            ),
            InternalError::InsufficientBytesForRead(requested, remaining) => write!(
                f,
                "attempted to read {requested} bytes with only {remaining} remaining"
            ),
            InternalError::BadByteCount(size) => write!(
                f,
                "Byte count of in ADU {size} exceeds maximum size of u8"
            ),
        }
    }
}

impl From<scursor::WriteError> for InternalError {
    fn from(_: scursor::WriteError) -> Self {
        InternalError::InsufficientWriteSpace
    }
}

/// Errors reported when registering an endpoint in a [`DeviceMap`](crate::server::DeviceMap)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointError {
    /// The unit id is reserved for broadcast and cannot address a single device
    ReservedUnitId(UnitId),
    /// An endpoint is already registered for this unit id
    DuplicateUnitId(UnitId),
}

impl std::error::Error for EndpointError {}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EndpointError::ReservedUnitId(id) => {
                write!(f, "unit id {id} is reserved for broadcast")
            }
            EndpointError::DuplicateUnitId(id) => {
                write!(f, "an endpoint is already registered for unit id {id}")
            }
        }
    }
}

/// No endpoint is registered for the requested unit id
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitNotFound(pub UnitId);

impl std::error::Error for UnitNotFound {}

impl std::fmt::Display for UnitNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "no endpoint registered for unit id {}", self.0)
    }
}
