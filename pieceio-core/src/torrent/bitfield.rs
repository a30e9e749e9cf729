//! Packed piece bitfields.
//!
//! Pieces are packed eight per byte with piece 0 in the most significant bit
//! of the first byte, the same layout as the BitTorrent `bitfield` message.
//! Unused low bits of the final byte are zero.

/// Packs per-piece "have" flags into `ceil(n / 8)` bytes.
pub fn encode_bitfield(have: &[bool]) -> Vec<u8> {
    have.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .filter(|(_, have)| **have)
                .fold(0u8, |byte, (bit, _)| byte | (0x80 >> bit))
        })
        .collect()
}

/// Unpacks `piece_count` flags from a packed bitfield.
///
/// Padding bits past `piece_count` are ignored and bytes missing from a short
/// input read as "not owned".
pub fn decode_bitfield(bytes: &[u8], piece_count: usize) -> Vec<bool> {
    (0..piece_count)
        .map(|piece| {
            bytes
                .get(piece / 8)
                .is_some_and(|byte| byte & (0x80 >> (piece % 8)) != 0)
        })
        .collect()
}

/// One byte per piece, `1` for owned and `0` otherwise.
pub fn encode_piece_flags(have: &[bool]) -> Vec<u8> {
    have.iter().map(|&owned| u8::from(owned)).collect()
}
