use crate::common::buffer::ReadBuffer;
use crate::common::frame::{Frame, FrameFormatter, FrameHeader, FrameParser, TxId};
use crate::common::phys::format_bytes;
use crate::common::traits::Serialize;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::types::UnitId;

use scursor::WriteCursor;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH;
    // includes the 1 byte unit id
    pub(crate) const MAX_LENGTH_FIELD: usize = crate::common::frame::constants::MAX_ADU_LENGTH + 1;
}

#[derive(Clone, Copy)]
struct MbapHeader {
    tx_id: TxId,
    adu_length: usize,
    unit_id: UnitId,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    Header(MbapHeader),
}

pub(crate) struct MbapParser {
    state: ParseState,
}

pub(crate) struct MbapFormatter {
    buffer: [u8; constants::MAX_FRAME_LENGTH],
}

struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    header: MbapHeader,
    adu: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    fn new(level: FrameDecodeLevel, header: MbapHeader, adu: &'a [u8]) -> Self {
        MbapDisplay { level, header, adu }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {} unit: {} len: {}",
            self.header.tx_id, self.header.unit_id, self.header.adu_length
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.adu)?;
        }
        Ok(())
    }
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    fn parse_header(cursor: &mut ReadBuffer) -> Result<MbapHeader, RequestError> {
        let tx_id = TxId::new(cursor.read_u16_be()?);
        let protocol_id = cursor.read_u16_be()?;
        let length = cursor.read_u16_be()? as usize;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }

        // must be > 0 b/c the 1-byte unit identifier counts towards length
        if length == 0 {
            return Err(FrameParseError::MbapLengthZero.into());
        }

        if length > constants::MAX_LENGTH_FIELD {
            return Err(
                FrameParseError::MbapLengthTooBig(length, constants::MAX_LENGTH_FIELD).into(),
            );
        }

        Ok(MbapHeader {
            tx_id,
            adu_length: length - 1,
            unit_id,
        })
    }

    fn parse_body(header: &MbapHeader, cursor: &mut ReadBuffer) -> Result<Frame, RequestError> {
        let mut frame = Frame::new(FrameHeader::new(header.unit_id, header.tx_id));
        if !frame.set(cursor.read(header.adu_length)?) {
            return Err(InternalError::FrameTooBig(
                header.adu_length,
                crate::common::frame::constants::MAX_ADU_LENGTH,
            )
            .into());
        }
        Ok(frame)
    }
}

impl FrameParser for MbapParser {
    fn max_frame_size(&self) -> usize {
        constants::MAX_FRAME_LENGTH
    }

    fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header) => {
                if cursor.len() < header.adu_length {
                    return Ok(None);
                }

                let frame = Self::parse_body(&header, cursor)?;
                self.state = ParseState::Begin;

                if decode.enabled() {
                    tracing::info!(
                        "MBAP RX - {}",
                        MbapDisplay::new(decode, header, frame.payload())
                    );
                }

                Ok(Some(frame))
            }
            ParseState::Begin => {
                if cursor.len() < constants::HEADER_LENGTH {
                    return Ok(None);
                }

                self.state = ParseState::Header(Self::parse_header(cursor)?);
                self.parse(cursor, decode)
            }
        }
    }
}

impl MbapFormatter {
    pub(crate) fn new() -> Self {
        Self {
            buffer: [0; constants::MAX_FRAME_LENGTH],
        }
    }
}

impl FrameFormatter for MbapFormatter {
    fn format(
        &mut self,
        header: FrameHeader,
        msg: &dyn Serialize,
        decode: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError> {
        // the body is written first so that the length field is known when writing the header
        let (head, body) = self.buffer.split_at_mut(constants::HEADER_LENGTH);

        let adu_length = {
            let mut cursor = WriteCursor::new(body);
            msg.serialize(&mut cursor)?;
            cursor.position()
        };

        let length_field = u16::try_from(adu_length + 1).map_err(|_| {
            InternalError::FrameTooBig(adu_length, crate::common::frame::constants::MAX_ADU_LENGTH)
        })?;

        {
            let mut cursor = WriteCursor::new(head);
            cursor.write_u16_be(header.tx_id.to_u16())?;
            cursor.write_u16_be(0)?;
            cursor.write_u16_be(length_field)?;
            cursor.write_u8(header.unit_id.value)?;
        }

        let total_length = constants::HEADER_LENGTH + adu_length;

        let frame = match self.buffer.get(..total_length) {
            Some(x) => x,
            None => {
                return Err(
                    InternalError::FrameTooBig(total_length, constants::MAX_FRAME_LENGTH).into(),
                )
            }
        };

        if decode.enabled() {
            let mbap = MbapHeader {
                tx_id: header.tx_id,
                adu_length,
                unit_id: header.unit_id,
            };
            if let Some(adu) = frame.get(constants::HEADER_LENGTH..) {
                tracing::info!("MBAP TX - {}", MbapDisplay::new(decode, mbap, adu));
            }
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::block_on;
    use tokio_test::io::Builder;

    use crate::common::frame::FramedReader;
    use crate::common::phys::PhysLayer;
    use crate::decode::DecodeLevel;

    use super::*;

    //                            |   tx id  |  proto id |  length  | unit |  payload   |
    const SIMPLE_FRAME: &[u8] = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x2A, 0x03, 0x04];

    struct MockMessage {
        a: u8,
        b: u8,
    }

    impl Serialize for MockMessage {
        fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
            cursor.write_u8(self.a)?;
            cursor.write_u8(self.b)?;
            Ok(())
        }
    }

    struct TooBig;

    impl Serialize for TooBig {
        fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
            for _ in 0..=crate::common::frame::constants::MAX_ADU_LENGTH {
                cursor.write_u8(0xCC)?;
            }
            Ok(())
        }
    }

    fn assert_equals_simple_frame(frame: &Frame) {
        assert_eq!(frame.header.tx_id, TxId::new(0x0007));
        assert_eq!(frame.header.unit_id, UnitId::new(0x2A));
        assert_eq!(frame.payload(), &[0x03, 0x04]);
    }

    fn read_frame(io: tokio_test::io::Mock) -> Result<Frame, RequestError> {
        let mut layer = PhysLayer::new(io);
        let mut reader = FramedReader::new(MbapParser::new());
        block_on(reader.next_frame(&mut layer, DecodeLevel::default()))
    }

    fn test_segmented_parse(split_at: usize) {
        let (f1, f2) = SIMPLE_FRAME.split_at(split_at);
        let frame = read_frame(Builder::new().read(f1).read(f2).build()).unwrap();
        assert_equals_simple_frame(&frame);
    }

    fn test_error(input: &[u8]) -> RequestError {
        read_frame(Builder::new().read(input).build()).err().unwrap()
    }

    #[test]
    fn correctly_formats_frame() {
        let mut formatter = MbapFormatter::new();
        let msg = MockMessage { a: 0x03, b: 0x04 };
        let header = FrameHeader::new(UnitId::new(42), TxId::new(7));
        let output = formatter
            .format(header, &msg, FrameDecodeLevel::Payload)
            .unwrap();

        assert_eq!(output, SIMPLE_FRAME)
    }

    #[test]
    fn formatting_fails_when_the_adu_is_too_big() {
        let mut formatter = MbapFormatter::new();
        let header = FrameHeader::new(UnitId::new(1), TxId::new(1));
        assert_eq!(
            formatter
                .format(header, &TooBig, FrameDecodeLevel::Nothing)
                .err(),
            Some(RequestError::Internal(InternalError::InsufficientWriteSpace))
        );
    }

    #[test]
    fn can_parse_frame_from_stream() {
        let frame = read_frame(Builder::new().read(SIMPLE_FRAME).build()).unwrap();
        assert_equals_simple_frame(&frame);
    }

    #[test]
    fn can_parse_maximum_size_frame() {
        // maximum ADU length is 253, so max MBAP length value is 254 which is 0xFE
        let header = &[0x00, 0x07, 0x00, 0x00, 0x00, 0xFE, 0x2A];
        let payload = &[0xCC; 253];

        let frame = read_frame(Builder::new().read(header).read(payload).build()).unwrap();

        assert_eq!(frame.payload(), payload.as_ref());
    }

    #[test]
    fn can_parse_two_frames_from_one_read() {
        let mut both = SIMPLE_FRAME.to_vec();
        both.extend_from_slice(SIMPLE_FRAME);

        let mut layer = PhysLayer::new(Builder::new().read(&both).build());
        let mut reader = FramedReader::new(MbapParser::new());
        for _ in 0..2 {
            let frame = block_on(reader.next_frame(&mut layer, DecodeLevel::default())).unwrap();
            assert_equals_simple_frame(&frame);
        }
    }

    #[test]
    fn can_parse_frame_if_segmented_in_header() {
        test_segmented_parse(4);
    }

    #[test]
    fn can_parse_frame_if_segmented_in_payload() {
        test_segmented_parse(8);
    }

    #[test]
    fn errors_on_bad_protocol_id() {
        let frame = &[0x00, 0x07, 0xCA, 0xFE, 0x00, 0x01, 0x2A];
        assert_eq!(
            test_error(frame),
            RequestError::BadFrame(FrameParseError::UnknownProtocolId(0xCAFE))
        );
    }

    #[test]
    fn errors_on_length_of_zero() {
        let frame = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x2A];
        assert_eq!(
            test_error(frame),
            RequestError::BadFrame(FrameParseError::MbapLengthZero)
        );
    }

    #[test]
    fn errors_when_mbap_length_too_big() {
        let frame = &[0x00, 0x07, 0x00, 0x00, 0x00, 0xFF, 0x2A];
        assert_eq!(
            test_error(frame),
            RequestError::BadFrame(FrameParseError::MbapLengthTooBig(
                0xFF,
                constants::MAX_LENGTH_FIELD
            ))
        );
    }

    #[test]
    fn truncated_frame_is_an_io_error() {
        let frame = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x2A, 0x03];
        assert_eq!(
            test_error(frame),
            RequestError::Io(std::io::ErrorKind::UnexpectedEof)
        );
    }
}
