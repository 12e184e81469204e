use crate::common::bits::{num_bytes_for_registers, pack_bits};
use crate::common::traits::Serialize;
use crate::constants::coil;
use crate::error::{InternalError, RequestError};
use crate::exception::ExceptionCode;
use crate::types::{AddressRange, Indexed};

use scursor::WriteCursor;

fn byte_count(count: usize) -> Result<u8, InternalError> {
    u8::try_from(count).map_err(|_| InternalError::BadByteCount(count))
}

impl Serialize for AddressRange {
    fn serialize(&self, cur: &mut WriteCursor) -> Result<(), RequestError> {
        cur.write_u16_be(self.start)?;
        cur.write_u16_be(self.count)?;
        Ok(())
    }
}

impl Serialize for ExceptionCode {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8((*self).into())?;
        Ok(())
    }
}

impl Serialize for Indexed<bool> {
    fn serialize(&self, cur: &mut WriteCursor) -> Result<(), RequestError> {
        cur.write_u16_be(self.index)?;
        cur.write_u16_be(if self.value { coil::ON } else { coil::OFF })?;
        Ok(())
    }
}

impl Serialize for Indexed<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(self.value)?;
        Ok(())
    }
}

impl Serialize for &[bool] {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        let num_bytes = byte_count((self.len() + 7) / 8)?;
        cursor.write_u8(num_bytes)?;
        for byte in pack_bits(self) {
            cursor.write_u8(byte)?;
        }
        Ok(())
    }
}

impl Serialize for &[u16] {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        let count = u16::try_from(self.len())
            .map_err(|_| InternalError::BadByteCount(self.len()))?;
        cursor.write_u8(byte_count(num_bytes_for_registers(count))?)?;
        for value in *self {
            cursor.write_u16_be(*value)?
        }
        Ok(())
    }
}
