//! Exp-Golomb and bit-level reads against known codewords.

use mvscan_avc::{AvcError, BitReader};

#[test]
fn test_ue_known_codewords() {
    // 1 -> 0, 010 -> 1, 011 -> 2, 00100 -> 3
    for (bits, expected) in [
        (vec![0b10000000u8], 0u32),
        (vec![0b01000000], 1),
        (vec![0b01100000], 2),
        (vec![0b00100000], 3),
    ] {
        let mut reader = BitReader::new(&bits);
        assert_eq!(reader.read_ue().unwrap(), expected);
    }
}

#[test]
fn test_se_known_codewords() {
    // 1 -> 0, 010 -> 1, 011 -> -1
    for (bits, expected) in [
        (vec![0b10000000u8], 0i32),
        (vec![0b01000000], 1),
        (vec![0b01100000], -1),
        (vec![0b00100000], 2),
        (vec![0b00101000], -2),
    ] {
        let mut reader = BitReader::new(&bits);
        assert_eq!(reader.read_se().unwrap(), expected);
    }
}

#[test]
fn test_te_inverts_single_bit() {
    let data = [0b10000000];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_te(1).unwrap(), 0);

    let data = [0b01000000];
    let mut reader = BitReader::new(&data);
    // range > 1 behaves as ue: 010 -> 1
    assert_eq!(reader.read_te(2).unwrap(), 1);
}

#[test]
fn test_large_ue_values() {
    // ue codeword for 254: 7 zeros, then 11111111
    let mut data = Vec::new();
    data.push(0b00000001);
    data.push(0b11111110);
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_ue().unwrap(), 254);
}

#[test]
fn test_byte_align_and_position() {
    let data = [0xFF, 0x00, 0xAA];
    let mut reader = BitReader::new(&data);
    reader.read_bits(3).unwrap();
    assert!(!reader.is_byte_aligned());
    reader.byte_align();
    assert!(reader.is_byte_aligned());
    assert_eq!(reader.bit_position(), 8);
    assert_eq!(reader.read_u8().unwrap(), 0x00);
}

#[test]
fn test_peek_and_skip() {
    let data = [0b11010010];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.peek_bits(3).unwrap(), 0b110);
    reader.skip_bits(3).unwrap();
    assert_eq!(reader.read_bits(5).unwrap(), 0b10010);
}

#[test]
fn test_truncated_read_errors() {
    let data = [0xAB];
    let mut reader = BitReader::new(&data);
    assert!(matches!(
        reader.read_bits(16),
        Err(AvcError::UnexpectedEndOfStream { .. })
    ));
    // The failed read must not have consumed anything
    assert_eq!(reader.read_bits(8).unwrap(), 0xAB);
}

#[test]
fn test_more_rbsp_data_stops_at_trailing_bit() {
    // ue(4) = 00101, then the stop bit and padding
    let data = [0b00101100];
    let mut reader = BitReader::new(&data);
    assert!(reader.more_rbsp_data());
    assert_eq!(reader.read_ue().unwrap(), 4);
    assert!(!reader.more_rbsp_data());
}

#[test]
fn test_more_rbsp_data_with_cabac_zero_padding() {
    // Stop bit followed by a whole zero byte of padding
    let data = [0b11000000, 0b00000000];
    let mut reader = BitReader::new(&data);
    reader.read_bit().unwrap();
    assert!(!reader.more_rbsp_data());
}
