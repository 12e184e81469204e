use crate::common::bits::{num_bytes_for_bits, num_bytes_for_registers};
use crate::common::parse::expect_empty;
use crate::decode::AppDecodeLevel;
use crate::error::RequestError;
use crate::types::{AddressRange, Indexed};

use scursor::ReadCursor;

/// Coil values of a `WRITE MULTIPLE COILS` request
///
/// The iterator yields one `Indexed<bool>` per address of `range`, in ascending address order.
/// It borrows the request frame, so the values can only be consumed while the
/// [`WriteHandler`](crate::server::WriteHandler) is running.
#[derive(Debug, Copy, Clone)]
pub struct WriteCoils<'a> {
    /// address range of the request
    pub range: AddressRange,
    /// lazy iterator over the coil values to write
    pub iterator: BitIterator<'a>,
}

impl<'a> WriteCoils<'a> {
    pub(crate) fn new(range: AddressRange, iterator: BitIterator<'a>) -> Self {
        Self { range, iterator }
    }
}

/// Register values of a `WRITE MULTIPLE REGISTERS` request
///
/// The iterator yields one `Indexed<u16>` per address of `range`, in ascending address order.
#[derive(Debug, Copy, Clone)]
pub struct WriteRegisters<'a> {
    /// address range of the request
    pub range: AddressRange,
    /// lazy iterator over the register values to write
    pub iterator: RegisterIterator<'a>,
}

impl<'a> WriteRegisters<'a> {
    pub(crate) fn new(range: AddressRange, iterator: RegisterIterator<'a>) -> Self {
        Self { range, iterator }
    }
}

/// Unpacks the coil values of a request frame, LSB first
#[derive(Debug, Copy, Clone)]
pub struct BitIterator<'a> {
    bytes: &'a [u8],
    range: AddressRange,
    pos: u16,
}

/// Decodes the big-endian register values of a request frame
#[derive(Debug, Copy, Clone)]
pub struct RegisterIterator<'a> {
    bytes: &'a [u8],
    range: AddressRange,
    pos: u16,
}

impl<'a> BitIterator<'a> {
    /// Consume the packed values for `range`, which must be the rest of the frame
    pub(crate) fn parse_all(
        range: AddressRange,
        cursor: &mut ReadCursor<'a>,
    ) -> Result<Self, RequestError> {
        let bytes = cursor.read_bytes(num_bytes_for_bits(range.count))?;
        expect_empty(cursor)?;
        Ok(Self {
            bytes,
            range,
            pos: 0,
        })
    }

    fn remaining(&self) -> usize {
        usize::from(self.range.count - self.pos)
    }
}

impl<'a> RegisterIterator<'a> {
    /// Consume the values for `range`, which must be the rest of the frame
    pub(crate) fn parse_all(
        range: AddressRange,
        cursor: &mut ReadCursor<'a>,
    ) -> Result<Self, RequestError> {
        let bytes = cursor.read_bytes(num_bytes_for_registers(range.count))?;
        expect_empty(cursor)?;
        Ok(Self {
            bytes,
            range,
            pos: 0,
        })
    }

    fn remaining(&self) -> usize {
        usize::from(self.range.count - self.pos)
    }
}

impl Iterator for BitIterator<'_> {
    type Item = Indexed<bool>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.range.count {
            return None;
        }
        let byte = *self.bytes.get(usize::from(self.pos / 8))?;
        let value = (byte >> (self.pos % 8)) & 1 != 0;
        let item = Indexed::new(self.range.start + self.pos, value);
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl Iterator for RegisterIterator<'_> {
    type Item = Indexed<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.range.count {
            return None;
        }
        let offset = 2 * usize::from(self.pos);
        let value = match self.bytes.get(offset..offset + 2)? {
            [high, low] => u16::from_be_bytes([*high, *low]),
            _ => return None,
        };
        let item = Indexed::new(self.range.start + self.pos, value);
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

/// Decoded form of the values carried by a multi-point write
pub(crate) struct WriteDisplay<I> {
    level: AppDecodeLevel,
    range: AddressRange,
    values: I,
}

impl<I> WriteDisplay<I> {
    pub(crate) fn new(level: AppDecodeLevel, range: AddressRange, values: I) -> Self {
        Self {
            level,
            range,
            values,
        }
    }
}

impl<I, T> std::fmt::Display for WriteDisplay<I>
where
    I: Iterator<Item = Indexed<T>> + Clone,
    Indexed<T>: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.range)?;
        if self.level.data_values() {
            for value in self.values.clone() {
                write!(f, "\n{value}")?;
            }
        }
        Ok(())
    }
}
