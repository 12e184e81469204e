use tokio::sync::mpsc;

use crate::common::frame::{Frame, FrameFormatter, FrameHeader, FramedReader};
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::common::traits::Serialize;
use crate::decode::DecodeLevel;
use crate::error::{InvalidRange, RequestError};
use crate::exception::ExceptionCode;
use crate::server::device_map::{lock, ServerHandlerMap};
use crate::server::dispatch::dispatch;
use crate::server::request::{Request, RequestDisplay};
use crate::server::response::{ErrorResponse, Response, ResponseDisplay};
use crate::tcp::frame::{MbapFormatter, MbapParser};

use scursor::ReadCursor;

/// Messages sent from the server handle to the listener and from the listener to each session
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ServerSetting {
    ChangeDecoding(DecodeLevel),
}

pub(crate) struct SessionTask {
    io: PhysLayer,
    handlers: ServerHandlerMap,
    commands: mpsc::Receiver<ServerSetting>,
    reader: FramedReader<MbapParser>,
    writer: MbapFormatter,
    decode: DecodeLevel,
}

impl SessionTask {
    pub(crate) fn new(
        io: PhysLayer,
        handlers: ServerHandlerMap,
        commands: mpsc::Receiver<ServerSetting>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            io,
            handlers,
            commands,
            reader: FramedReader::new(MbapParser::new()),
            writer: MbapFormatter::new(),
            decode,
        }
    }

    /// Serve requests until an I/O or framing error occurs or the session is shut down
    pub(crate) async fn run(&mut self) -> RequestError {
        loop {
            if let Err(err) = self.run_one().await {
                return err;
            }
        }
    }

    async fn run_one(&mut self) -> Result<(), RequestError> {
        tokio::select! {
            frame = self.reader.next_frame(&mut self.io, self.decode) => {
                let frame = frame?;
                self.handle_frame(frame).await
            }
            setting = self.commands.recv() => {
                match setting {
                    Some(ServerSetting::ChangeDecoding(level)) => {
                        self.decode = level;
                        Ok(())
                    }
                    None => Err(RequestError::Shutdown),
                }
            }
        }
    }

    async fn reply<T>(&mut self, header: FrameHeader, msg: &T) -> Result<(), RequestError>
    where
        T: Serialize + Sync,
    {
        let bytes = self.writer.format(header, msg, self.decode.frame)?;
        self.io.write(bytes, self.decode.physical).await?;
        Ok(())
    }

    async fn reply_with_error(
        &mut self,
        header: FrameHeader,
        response: ErrorResponse,
    ) -> Result<(), RequestError> {
        if self.decode.app.enabled() {
            tracing::warn!("PDU TX - {}", response);
        }
        self.reply(header, &response).await
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), RequestError> {
        let unit_id = frame.header.unit_id;
        let mut cursor = ReadCursor::new(frame.payload());

        let function = match cursor.read_u8() {
            Err(_) => {
                tracing::warn!("received request without a function code");
                return Ok(());
            }
            Ok(value) => value,
        };

        // unmapped units never receive a reply, not even an exception
        if !unit_id.is_broadcast() && self.handlers.resolve(unit_id).is_none() {
            tracing::warn!("received frame for unmapped unit id: {}", unit_id);
            return Ok(());
        }

        let function = match FunctionCode::get(function) {
            Some(x) => x,
            None => {
                tracing::warn!("received unknown function code: {:#04X}", function);
                if unit_id.is_broadcast() {
                    return Ok(());
                }
                return self
                    .reply_with_error(frame.header, ErrorResponse::unknown_function(function))
                    .await;
            }
        };

        let request = match Request::parse(function, &mut cursor) {
            Ok(x) => x,
            Err(err) => {
                tracing::warn!("error parsing {} request: {}", function, err);
                if unit_id.is_broadcast() {
                    return Ok(());
                }
                return self
                    .reply_with_error(
                        frame.header,
                        ErrorResponse::new(function, parse_error_exception(&err)),
                    )
                    .await;
            }
        };

        if self.decode.app.enabled() {
            tracing::info!("PDU RX - {}", RequestDisplay::new(self.decode.app, &request));
        }

        if unit_id.is_broadcast() {
            self.handle_broadcast(request);
            return Ok(());
        }

        let endpoint = match self.handlers.resolve(unit_id) {
            Some(x) => x.clone(),
            None => return Ok(()),
        };

        // the device is locked only while the reply is computed, never while writing it
        let result = {
            let mut guard = lock(&endpoint);
            dispatch(&request, &mut *guard)
        };

        match result {
            Ok(reply) => {
                let response = Response::new(function, &reply);
                if self.decode.app.enabled() {
                    tracing::info!(
                        "PDU TX - {}",
                        ResponseDisplay::new(self.decode.app, &response)
                    );
                }
                self.reply(frame.header, &response).await
            }
            Err(ex) => {
                self.reply_with_error(frame.header, ErrorResponse::new(function, ex))
                    .await
            }
        }
    }

    fn handle_broadcast(&self, request: Request) {
        match request.into_broadcast_request() {
            Some(broadcast) => {
                for (_, endpoint) in self.handlers.iter() {
                    broadcast.execute(&mut *lock(endpoint));
                }
            }
            None => {
                tracing::warn!("broadcast is not supported for read requests");
            }
        }
    }
}

/// Exception returned for a request body that could not be parsed
fn parse_error_exception(err: &RequestError) -> ExceptionCode {
    match err {
        // start + count past the end of the address space
        RequestError::BadRange(InvalidRange::AddressOverflow(_, _)) => {
            ExceptionCode::IllegalDataAddress
        }
        _ => ExceptionCode::IllegalDataValue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::device_map::DeviceMap;
    use crate::server::handler::DefaultWriteHandler;
    use crate::types::{AddressRange, UnitId};

    use tokio_test::io::Builder;

    fn handlers() -> ServerHandlerMap {
        let mut map = DeviceMap::new();
        for unit in [1, 2] {
            map.add_endpoint(UnitId::new(unit), DefaultWriteHandler::new(), |db| {
                let range = AddressRange::try_from(0, 10).unwrap();
                db.add_coils(range, false);
                db.add_holding_registers(range, 0);
            })
            .unwrap();
        }
        map.into_handler_map()
    }

    async fn run_session(handlers: ServerHandlerMap, io: tokio_test::io::Mock) -> RequestError {
        let (_tx, rx) = mpsc::channel(1);
        let mut task = SessionTask::new(
            PhysLayer::new(io),
            handlers,
            rx,
            DecodeLevel::default(),
        );
        task.run().await
    }

    fn holding_register(handlers: &ServerHandlerMap, unit: u8, index: u16) -> Option<u16> {
        let endpoint = handlers.resolve(UnitId::new(unit)).unwrap();
        let value = lock(endpoint).database.get_holding_register(index);
        value
    }

    #[tokio::test]
    async fn replies_to_read_coils() {
        let io = Builder::new()
            .read(&[
                0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x0A,
            ])
            .write(&[
                0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x01, 0x02, 0x00, 0x00,
            ])
            .build();

        let err = run_session(handlers(), io).await;
        assert_eq!(err, RequestError::Io(std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn replies_with_exception_for_missing_points() {
        let io = Builder::new()
            .read(&[
                0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x0B,
            ])
            .write(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x02])
            .build();

        run_session(handlers(), io).await;
    }

    #[tokio::test]
    async fn replies_with_illegal_function_for_unknown_codes() {
        let io = Builder::new()
            .read(&[0x00, 0x03, 0x00, 0x00, 0x00, 0x02, 0x01, 0x2B])
            .write(&[0x00, 0x03, 0x00, 0x00, 0x00, 0x03, 0x01, 0xAB, 0x01])
            .build();

        run_session(handlers(), io).await;
    }

    #[tokio::test]
    async fn replies_with_illegal_data_value_for_malformed_requests() {
        // coil value that is neither ON nor OFF
        let io = Builder::new()
            .read(&[
                0x00, 0x04, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x01, 0x12, 0x34,
            ])
            .write(&[0x00, 0x04, 0x00, 0x00, 0x00, 0x03, 0x01, 0x85, 0x03])
            .build();

        run_session(handlers(), io).await;
    }

    #[tokio::test]
    async fn ranges_past_the_last_address_are_illegal_addresses() {
        let io = Builder::new()
            // read coils
            .read(&[
                0x00, 0x0A, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0xFF, 0xFF, 0x00, 0x02,
            ])
            .write(&[0x00, 0x0A, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x02])
            // read holding registers
            .read(&[
                0x00, 0x0B, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0xFF, 0xFF, 0x00, 0x02,
            ])
            .write(&[0x00, 0x0B, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02])
            // write multiple coils
            .read(&[
                0x00, 0x0C, 0x00, 0x00, 0x00, 0x08, 0x01, 0x0F, 0xFF, 0xFF, 0x00, 0x02, 0x01, 0x03,
            ])
            .write(&[0x00, 0x0C, 0x00, 0x00, 0x00, 0x03, 0x01, 0x8F, 0x02])
            // write multiple registers
            .read(&[
                0x00, 0x0D, 0x00, 0x00, 0x00, 0x0B, 0x01, 0x10, 0xFF, 0xFF, 0x00, 0x02, 0x04, 0x00,
                0x01, 0x00, 0x02,
            ])
            .write(&[0x00, 0x0D, 0x00, 0x00, 0x00, 0x03, 0x01, 0x90, 0x02])
            .build();

        run_session(handlers(), io).await;
    }

    #[tokio::test]
    async fn quantity_errors_are_illegal_values() {
        let io = Builder::new()
            // 126 registers
            .read(&[
                0x00, 0x0E, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x7E,
            ])
            .write(&[0x00, 0x0E, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x03])
            // count of zero
            .read(&[
                0x00, 0x0F, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00,
            ])
            .write(&[0x00, 0x0F, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x03])
            .build();

        run_session(handlers(), io).await;
    }

    #[test]
    fn parse_errors_map_to_exceptions() {
        assert_eq!(
            parse_error_exception(&RequestError::BadRange(InvalidRange::AddressOverflow(
                0xFFFF, 2
            ))),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            parse_error_exception(&RequestError::BadRange(InvalidRange::CountTooLargeForType(
                126, 125
            ))),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            parse_error_exception(&RequestError::BadRequest(
                crate::error::AduParseError::UnknownCoilState(0x1234)
            )),
            ExceptionCode::IllegalDataValue
        );
    }

    #[tokio::test]
    async fn ignores_unmapped_units_and_keeps_serving() {
        let io = Builder::new()
            .read(&[
                0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x63, 0x03, 0x00, 0x00, 0x00, 0x01,
            ])
            .read(&[
                0x00, 0x06, 0x00, 0x00, 0x00, 0x06, 0x02, 0x03, 0x00, 0x00, 0x00, 0x01,
            ])
            .write(&[
                0x00, 0x06, 0x00, 0x00, 0x00, 0x05, 0x02, 0x03, 0x02, 0x00, 0x00,
            ])
            .build();

        run_session(handlers(), io).await;
    }

    #[tokio::test]
    async fn writes_are_applied_to_the_addressed_unit_only() {
        let handlers = handlers();
        let io = Builder::new()
            .read(&[
                0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x03, 0x00, 0x2A,
            ])
            .write(&[
                0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x03, 0x00, 0x2A,
            ])
            .build();

        run_session(handlers.clone(), io).await;

        assert_eq!(holding_register(&handlers, 1, 3), Some(42));
        assert_eq!(holding_register(&handlers, 2, 3), Some(0));
    }

    #[tokio::test]
    async fn broadcast_writes_reach_every_unit_without_reply() {
        let handlers = handlers();
        let io = Builder::new()
            .read(&[
                0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x00, 0x06, 0x00, 0x04, 0x00, 0x07,
            ])
            .build();

        run_session(handlers.clone(), io).await;

        assert_eq!(holding_register(&handlers, 1, 4), Some(7));
        assert_eq!(holding_register(&handlers, 2, 4), Some(7));
    }

    #[tokio::test]
    async fn framing_errors_close_the_session() {
        let io = Builder::new()
            .read(&[0x00, 0x09, 0xCA, 0xFE, 0x00, 0x06, 0x01])
            .build();

        let err = run_session(handlers(), io).await;
        assert_eq!(
            err,
            RequestError::BadFrame(crate::error::FrameParseError::UnknownProtocolId(0xCAFE))
        );
    }

    #[tokio::test]
    async fn session_stops_when_the_server_is_dropped() {
        let (tx, rx) = mpsc::channel::<ServerSetting>(1);
        drop(tx);
        // never completes a read
        let io = Builder::new().wait(std::time::Duration::from_secs(60)).build();
        let mut task = SessionTask::new(
            PhysLayer::new(io),
            handlers(),
            rx,
            DecodeLevel::default(),
        );
        assert_eq!(task.run().await, RequestError::Shutdown);
    }

    #[tokio::test]
    async fn decode_level_changes_are_applied() {
        let (tx, rx) = mpsc::channel::<ServerSetting>(1);
        let level = DecodeLevel::default().application(crate::decode::AppDecodeLevel::DataValues);
        tx.send(ServerSetting::ChangeDecoding(level)).await.unwrap();
        drop(tx);

        let io = Builder::new().wait(std::time::Duration::from_secs(60)).build();
        let mut task = SessionTask::new(
            PhysLayer::new(io),
            handlers(),
            rx,
            DecodeLevel::default(),
        );
        assert_eq!(task.run().await, RequestError::Shutdown);
        assert_eq!(task.decode, level);
    }
}
