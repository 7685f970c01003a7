//! Message signed by the group

use num_bigint::BigUint;

/// Combine the previous relay entry and the request seed into the bytes the
/// group signs. The signature over them becomes the new relay entry.
///
/// Both values are written as minimal big-endian byte strings, zero being
/// the empty string, with nothing in between. Because no length or
/// separator is written, different pairs can produce the same bytes, e.g.
/// `(0x0102, 0x03)` and `(0x01, 0x0203)`. Deployed groups sign exactly this
/// encoding, so it must not change.
pub fn combine_entry_to_sign(previous_entry: &BigUint, seed: &BigUint) -> Vec<u8> {
    let mut combined = minimal_bytes(previous_entry);
    combined.extend_from_slice(&minimal_bytes(seed));
    combined
}

fn minimal_bytes(value: &BigUint) -> Vec<u8> {
    if value.bits() == 0 {
        Vec::new()
    } else {
        value.to_bytes_be()
    }
}
