pub(crate) fn num_bytes_for_bits(count: u16) -> usize {
    (count as usize + 7) / 8
}

pub(crate) fn num_bytes_for_registers(count: u16) -> usize {
    2 * (count as usize)
}

/// Pack bits LSB-first, 8 per byte, the last byte zero padded
pub(crate) fn pack_bits(bits: &[bool]) -> impl Iterator<Item = u8> + '_ {
    bits.chunks(8).map(|chunk| {
        chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, bit)| if *bit { acc | (1 << i) } else { acc })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculates_number_of_bytes_needed_for_count_of_packed_bits() {
        assert_eq!(num_bytes_for_bits(7), 1);
        assert_eq!(num_bytes_for_bits(8), 1);
        assert_eq!(num_bytes_for_bits(9), 2);
        assert_eq!(num_bytes_for_bits(0xFFFF), 8192);
    }

    #[test]
    fn packs_low_order_bits_first() {
        let bits = [true, false, true, true, false, false, false, false, true];
        assert_eq!(pack_bits(&bits).collect::<Vec<u8>>(), vec![0x0D, 0x01]);
    }

    #[test]
    fn register_byte_count_is_doubled() {
        assert_eq!(num_bytes_for_registers(125), 250);
    }
}
