use crate::common::traits::Parse;
use crate::constants::coil;
use crate::error::*;
use crate::types::{AddressRange, Indexed};

use scursor::ReadCursor;

/// Fail if the cursor still holds unread bytes
pub(crate) fn expect_empty(cursor: &ReadCursor) -> Result<(), AduParseError> {
    if cursor.is_empty() {
        Ok(())
    } else {
        Err(AduParseError::TrailingBytes(cursor.remaining()))
    }
}

fn coil_from_u16(value: u16) -> Result<bool, AduParseError> {
    match value {
        coil::ON => Ok(true),
        coil::OFF => Ok(false),
        _ => Err(AduParseError::UnknownCoilState(value)),
    }
}

impl Parse for AddressRange {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(AddressRange::try_from(
            cursor.read_u16_be()?,
            cursor.read_u16_be()?,
        )?)
    }
}

impl Parse for Indexed<bool> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(Indexed::new(
            cursor.read_u16_be()?,
            coil_from_u16(cursor.read_u16_be()?)?,
        ))
    }
}

impl Parse for Indexed<u16> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(Indexed::new(cursor.read_u16_be()?, cursor.read_u16_be()?))
    }
}
