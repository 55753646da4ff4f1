use scursor::ReadCursor;

use crate::error::ModbusError;

/// Decode a register read payload: consecutive big-endian u16 pairs.
///
/// Every complete pair is decoded; a trailing odd byte is ignored. The
/// transport reports the count it actually received, so the caller gets
/// whatever the server sent rather than a count-capped view.
pub(crate) fn parse_registers(data: &[u8]) -> Result<Vec<u16>, ModbusError> {
    let mut cursor = ReadCursor::new(data);
    let mut values = Vec::with_capacity(data.len() / 2);
    while cursor.remaining() >= 2 {
        let value = cursor
            .read_u16_be()
            .map_err(|_| ModbusError::InvalidResponse)?;
        values.push(value);
    }
    Ok(values)
}

/// Decode a coil/discrete-input read payload: LSB-first bits, eight per byte,
/// bounded by both the requested count and the bytes actually present.
pub(crate) fn parse_bits(data: &[u8], count: u16) -> Vec<bool> {
    let count = count as usize;
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        match data.get(i / 8) {
            Some(byte) => values.push((byte >> (i % 8)) & 0x01 != 0),
            None => break,
        }
    }
    values
}

/// Encode registers for a write multiple registers payload, one big-endian
/// byte pair per register
pub(crate) fn registers_to_be_bytes(values: &[u16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(values.len() * 2);
    for value in values {
        payload.extend_from_slice(&value.to_be_bytes());
    }
    payload
}

/// Pack coil states into a word bitmap: coil `i` lands in word `i / 16` at
/// bit position `i % 16`
pub(crate) fn pack_bits(values: &[bool]) -> Vec<u16> {
    let mut words = vec![0u16; values.len().div_ceil(16)];
    for (i, on) in values.iter().enumerate() {
        if *on {
            words[i / 16] |= 1 << (i % 16);
        }
    }
    words
}

/// Inverse of [`pack_bits`], bounded by `count`
pub(crate) fn unpack_bits(words: &[u16], count: u16) -> Vec<bool> {
    let count = count as usize;
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        match words.get(i / 16) {
            Some(word) => values.push((word >> (i % 16)) & 0x01 != 0),
            None => break,
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_big_endian_register_pairs() {
        let data = [0x00, 0x0A, 0x00, 0x14, 0x00, 0x1E];
        assert_eq!(parse_registers(&data).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn ignores_a_trailing_odd_byte() {
        let data = [0x12, 0x34, 0x56];
        assert_eq!(parse_registers(&data).unwrap(), vec![0x1234]);
    }

    #[test]
    fn parses_every_pair_even_beyond_the_requested_count() {
        let data = [0x00, 0x01, 0x00, 0x02];
        assert_eq!(parse_registers(&data).unwrap(), vec![1, 2]);
    }

    #[test]
    fn extracts_bits_lsb_first() {
        // 0b0000_0101: coil 0 on, coil 1 off, coil 2 on
        assert_eq!(parse_bits(&[0x05], 3), vec![true, false, true]);
    }

    #[test]
    fn bit_extraction_spans_byte_boundaries() {
        let bits = parse_bits(&[0xFF, 0x01], 9);
        assert_eq!(bits.len(), 9);
        assert!(bits.iter().all(|b| *b));
    }

    #[test]
    fn bit_extraction_stops_at_the_payload_end() {
        assert_eq!(parse_bits(&[0x01], 12).len(), 8);
    }

    #[test]
    fn encodes_registers_big_endian() {
        assert_eq!(
            registers_to_be_bytes(&[0x0102, 0xA0B0]),
            vec![0x01, 0x02, 0xA0, 0xB0]
        );
    }

    #[test]
    fn packs_coil_seventeen_into_the_second_word() {
        let mut values = vec![false; 18];
        values[0] = true;
        values[17] = true;
        let words = pack_bits(&values);
        assert_eq!(words, vec![0x0001, 0x0002]);
    }

    #[test]
    fn pack_then_unpack_preserves_coil_states() {
        let values = vec![
            true, false, true, true, false, false, true, false, true, true, true, false, false,
            true, false, true, true,
        ];
        let words = pack_bits(&values);
        assert_eq!(words.len(), 2);
        assert_eq!(unpack_bits(&words, values.len() as u16), values);
    }

    #[test]
    fn unpack_is_bounded_by_count() {
        assert_eq!(unpack_bits(&[0xFFFF], 3), vec![true, true, true]);
    }
}
