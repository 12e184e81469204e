use crate::common::buffer::ReadBuffer;
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::common::traits::Serialize;
use crate::decode::{DecodeLevel, FrameDecodeLevel};
use crate::error::RequestError;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) unit_id: UnitId,
    pub(crate) tx_id: TxId,
}

impl FrameHeader {
    pub(crate) fn new(unit_id: UnitId, tx_id: TxId) -> Self {
        FrameHeader { unit_id, tx_id }
    }
}

pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    adu: [u8; constants::MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            adu: [0; constants::MAX_ADU_LENGTH],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) -> bool {
        match self.adu.get_mut(0..src.len()) {
            Some(dest) => {
                dest.copy_from_slice(src);
                self.length = src.len();
                true
            }
            None => false,
        }
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.adu[0..self.length]
    }
}

/// Function code as it appears on the wire in an exception reply
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum FunctionField {
    Exception(FunctionCode),
    UnknownFunction(u8),
}

impl FunctionField {
    pub(crate) fn get_value(self) -> u8 {
        match self {
            FunctionField::Exception(x) => x.as_error(),
            FunctionField::UnknownFunction(x) => x | 0x80,
        }
    }
}

impl std::fmt::Display for FunctionField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionField::Exception(x) => write!(f, "{x} exception"),
            FunctionField::UnknownFunction(x) => write!(f, "unknown function ({x:#04X})"),
        }
    }
}

/// Reads complete frames out of a byte stream
pub(crate) trait FrameParser {
    fn max_frame_size(&self) -> usize;

    /// Parse bytes out of the buffer. Consumed bytes are discarded.
    ///
    /// * `Err(..)` the input data is invalid
    /// * `Ok(None)` more data is required to complete the frame
    /// * `Ok(Some(..))` a complete frame
    fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError>;
}

/// Writes a complete frame into an internal buffer
pub(crate) trait FrameFormatter {
    fn format(
        &mut self,
        header: FrameHeader,
        msg: &dyn Serialize,
        decode: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError>;
}

pub(crate) struct FramedReader<T>
where
    T: FrameParser,
{
    parser: T,
    buffer: ReadBuffer,
}

impl<T: FrameParser> FramedReader<T> {
    pub(crate) fn new(parser: T) -> Self {
        let size = parser.max_frame_size();
        Self {
            parser,
            buffer: ReadBuffer::new(size),
        }
    }

    pub(crate) async fn next_frame(
        &mut self,
        io: &mut PhysLayer,
        decode: DecodeLevel,
    ) -> Result<Frame, RequestError> {
        loop {
            match self.parser.parse(&mut self.buffer, decode.frame)? {
                Some(frame) => return Ok(frame),
                None => {
                    self.buffer.read_some(io, decode.physical).await?;
                }
            }
        }
    }
}
