use crate::database::Database;
use crate::exception::ExceptionCode;
use crate::server::types::{WriteCoils, WriteRegisters};
use crate::types::Indexed;

/// Outcome of a write request: `Ok(())` on success or the exception code returned to the client
pub type WriteResult = Result<(), ExceptionCode>;

/// Application policy invoked when a client writes to a device
///
/// The handler receives exclusive access to the device's [`Database`] for the duration of a
/// single request. It decides whether the write is accepted, applies it, and reports the
/// outcome. Rejections are sent to the client as exception responses.
///
/// Every method defaults to rejecting the request with [`ExceptionCode::IllegalFunction`],
/// so a handler only implements the writes it supports.
pub trait WriteHandler: Send + 'static {
    /// Write a single coil value
    fn write_single_coil(
        &mut self,
        _value: Indexed<bool>,
        _database: &mut Database,
    ) -> WriteResult {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write a single holding register value
    fn write_single_register(
        &mut self,
        _value: Indexed<u16>,
        _database: &mut Database,
    ) -> WriteResult {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write multiple coils
    fn write_multiple_coils(
        &mut self,
        _values: WriteCoils,
        _database: &mut Database,
    ) -> WriteResult {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write multiple holding registers
    fn write_multiple_registers(
        &mut self,
        _values: WriteRegisters,
        _database: &mut Database,
    ) -> WriteResult {
        Err(ExceptionCode::IllegalFunction)
    }
}

/// How [`DefaultWriteHandler`] applies a multi-point write that names a missing point
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Apply values in address order and stop at the first missing point
    ///
    /// Points before the missing one keep their new values.
    #[default]
    PartialThenStop,
    /// Check every address first and apply nothing if any point is missing
    AllOrNothing,
}

/// Write handler that accepts writes to every point present in the database
///
/// Writes to points that do not exist fail with [`ExceptionCode::IllegalDataAddress`].
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultWriteHandler {
    mode: WriteMode,
}

impl DefaultWriteHandler {
    /// Create a handler using the default [`WriteMode::PartialThenStop`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler that applies multi-point writes according to `mode`
    pub fn with_mode(mode: WriteMode) -> Self {
        Self { mode }
    }

    /// The configured write mode
    pub fn mode(&self) -> WriteMode {
        self.mode
    }
}

fn write_all<T, I>(
    mode: WriteMode,
    values: I,
    database: &mut Database,
    get: fn(&Database, u16) -> Option<T>,
    update: fn(&mut Database, u16, T) -> bool,
) -> WriteResult
where
    T: Copy,
    I: Iterator<Item = Indexed<T>> + Clone,
{
    if mode == WriteMode::AllOrNothing
        && !values.clone().all(|x| get(&*database, x.index).is_some())
    {
        return Err(ExceptionCode::IllegalDataAddress);
    }

    for x in values {
        if !update(database, x.index, x.value) {
            return Err(ExceptionCode::IllegalDataAddress);
        }
    }

    Ok(())
}

impl WriteHandler for DefaultWriteHandler {
    fn write_single_coil(&mut self, value: Indexed<bool>, database: &mut Database) -> WriteResult {
        if database.update_coil(value.index, value.value) {
            Ok(())
        } else {
            Err(ExceptionCode::IllegalDataAddress)
        }
    }

    fn write_single_register(
        &mut self,
        value: Indexed<u16>,
        database: &mut Database,
    ) -> WriteResult {
        if database.update_holding_register(value.index, value.value) {
            Ok(())
        } else {
            Err(ExceptionCode::IllegalDataAddress)
        }
    }

    fn write_multiple_coils(&mut self, values: WriteCoils, database: &mut Database) -> WriteResult {
        write_all(
            self.mode,
            values.iterator,
            database,
            Database::get_coil,
            Database::update_coil,
        )
    }

    fn write_multiple_registers(
        &mut self,
        values: WriteRegisters,
        database: &mut Database,
    ) -> WriteResult {
        write_all(
            self.mode,
            values.iterator,
            database,
            Database::get_holding_register,
            Database::update_holding_register,
        )
    }
}

/// Per-device operations the dispatcher runs while holding the device lock
pub(crate) trait RequestHandler {
    fn read_coil(&self, address: u16) -> Result<bool, ExceptionCode>;
    fn read_discrete_input(&self, address: u16) -> Result<bool, ExceptionCode>;
    fn read_holding_register(&self, address: u16) -> Result<u16, ExceptionCode>;
    fn read_input_register(&self, address: u16) -> Result<u16, ExceptionCode>;

    fn write_single_coil(&mut self, value: Indexed<bool>) -> WriteResult;
    fn write_single_register(&mut self, value: Indexed<u16>) -> WriteResult;
    fn write_multiple_coils(&mut self, values: WriteCoils) -> WriteResult;
    fn write_multiple_registers(&mut self, values: WriteRegisters) -> WriteResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::types::{BitIterator, RegisterIterator};
    use crate::types::AddressRange;

    use scursor::ReadCursor;

    struct ReadOnly;

    impl WriteHandler for ReadOnly {}

    fn database() -> Database {
        let mut db = Database::new();
        db.add_coils(AddressRange::try_from(0, 4).unwrap(), false);
        db.add_holding_registers(AddressRange::try_from(0, 4).unwrap(), 0);
        db
    }

    fn coils(start: u16, count: u16, bytes: &[u8]) -> WriteCoils<'_> {
        let range = AddressRange::try_from(start, count).unwrap();
        let mut cursor = ReadCursor::new(bytes);
        WriteCoils::new(range, BitIterator::parse_all(range, &mut cursor).unwrap())
    }

    fn registers(start: u16, count: u16, bytes: &[u8]) -> WriteRegisters<'_> {
        let range = AddressRange::try_from(start, count).unwrap();
        let mut cursor = ReadCursor::new(bytes);
        WriteRegisters::new(
            range,
            RegisterIterator::parse_all(range, &mut cursor).unwrap(),
        )
    }

    #[test]
    fn unimplemented_writes_are_illegal_functions() {
        let mut db = database();
        let mut handler = ReadOnly;
        assert_eq!(
            handler.write_single_coil(Indexed::new(0, true), &mut db),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            handler.write_multiple_registers(registers(0, 1, &[0x00, 0x01]), &mut db),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(db.get_coil(0), Some(false));
    }

    #[test]
    fn single_writes_require_an_existing_point() {
        let mut db = database();
        let mut handler = DefaultWriteHandler::new();
        assert_eq!(
            handler.write_single_register(Indexed::new(3, 42), &mut db),
            Ok(())
        );
        assert_eq!(db.get_holding_register(3), Some(42));
        assert_eq!(
            handler.write_single_register(Indexed::new(4, 42), &mut db),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(db.get_holding_register(4), None);
    }

    #[test]
    fn partial_then_stop_keeps_earlier_values() {
        let mut db = database();
        let mut handler = DefaultWriteHandler::new();

        // coils 2..=5 all on, but only 2 and 3 exist
        let result = handler.write_multiple_coils(coils(2, 4, &[0x0F]), &mut db);

        assert_eq!(result, Err(ExceptionCode::IllegalDataAddress));
        assert_eq!(db.get_coil(2), Some(true));
        assert_eq!(db.get_coil(3), Some(true));
        assert_eq!(db.get_coil(4), None);
    }

    #[test]
    fn all_or_nothing_applies_nothing_on_failure() {
        let mut db = database();
        let mut handler = DefaultWriteHandler::with_mode(WriteMode::AllOrNothing);

        let result = handler.write_multiple_registers(
            registers(3, 2, &[0x00, 0x07, 0x00, 0x08]),
            &mut db,
        );

        assert_eq!(result, Err(ExceptionCode::IllegalDataAddress));
        assert_eq!(db.get_holding_register(3), Some(0));
    }

    #[test]
    fn all_or_nothing_applies_everything_on_success() {
        let mut db = database();
        let mut handler = DefaultWriteHandler::with_mode(WriteMode::AllOrNothing);

        let result = handler.write_multiple_coils(coils(1, 3, &[0x05]), &mut db);

        assert_eq!(result, Ok(()));
        assert_eq!(db.get_coil(1), Some(true));
        assert_eq!(db.get_coil(2), Some(false));
        assert_eq!(db.get_coil(3), Some(true));
    }
}
