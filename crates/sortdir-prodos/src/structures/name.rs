//! Filename case handling.
//!
//! ProDOS stores names as uppercase ASCII. GS/OS and ProDOS 2.5 reuse the
//! `version`/`min_version` pair of a header or entry as a 15-bit bitmap of
//! positions to display in lowercase: bit 7 of `version` marks the bitmap as
//! present, bits 6..0 of `version` cover characters 0..6 and bits 7..0 of
//! `min_version` cover characters 7..14. The name bytes themselves never
//! change.

use crate::structures::raw::NAME_LEN;

/// Requested on-disk case for a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTransform {
    /// `read.me`
    Lower,
    /// `READ.ME` (legacy, bitmap cleared)
    Upper,
    /// `Read.me`
    Initial,
    /// `Read.Me`
    Camel,
}

impl CaseTransform {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'l' => Some(Self::Lower),
            'u' => Some(Self::Upper),
            'i' => Some(Self::Initial),
            'c' => Some(Self::Camel),
            _ => None,
        }
    }
}

/// Computes replacement `(version, min_version)` bytes for a raw name.
pub fn encode(name: &[u8; NAME_LEN], len: u8, transform: CaseTransform) -> (u8, u8) {
    let len = (len as usize).min(NAME_LEN);
    let mut mask: u16 = 0;
    match transform {
        CaseTransform::Upper => return (0, 0),
        CaseTransform::Lower => {
            for (i, b) in name[..len].iter().enumerate() {
                if b.is_ascii_alphabetic() {
                    mask |= position_bit(i);
                }
            }
        }
        CaseTransform::Initial => {
            // Only the leading character keeps its stored (upper) case.
            for (i, b) in name[..len].iter().enumerate().skip(1) {
                if b.is_ascii_alphabetic() {
                    mask |= position_bit(i);
                }
            }
        }
        CaseTransform::Camel => {
            let mut keep_upper = true;
            for (i, b) in name[..len].iter().enumerate() {
                if b.is_ascii_alphabetic() {
                    if !keep_upper {
                        mask |= position_bit(i);
                    }
                    keep_upper = false;
                } else {
                    keep_upper = true;
                }
            }
        }
    }
    (0x80 | (mask >> 8) as u8, mask as u8)
}

/// Decodes a raw name to its display form. Without the bitmap marker the
/// stored uppercase bytes are returned as-is.
pub fn decode(name: &[u8; NAME_LEN], len: u8, version: u8, min_version: u8) -> String {
    let len = (len as usize).min(NAME_LEN);
    if version & 0x80 == 0 {
        return name[..len].iter().map(|&b| b as char).collect();
    }
    let mask = ((version as u16) << 8) | min_version as u16;
    name[..len]
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if mask & position_bit(i) != 0 {
                b.to_ascii_lowercase() as char
            } else {
                b as char
            }
        })
        .collect()
}

/// Bitmap bit for character position `i`: `version` bit 6 is position 0,
/// `min_version` bit 0 is position 14.
fn position_bit(i: usize) -> u16 {
    1 << (14 - i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str) -> ([u8; NAME_LEN], u8) {
        let mut bytes = [0u8; NAME_LEN];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        (bytes, name.len() as u8)
    }

    fn apply(name: &str, transform: CaseTransform) -> String {
        let (bytes, len) = raw(name);
        let (vers, min_vers) = encode(&bytes, len, transform);
        decode(&bytes, len, vers, min_vers)
    }

    #[test]
    fn upper_clears_bitmap() {
        let (bytes, len) = raw("READ.ME");
        assert_eq!(encode(&bytes, len, CaseTransform::Upper), (0, 0));
        assert_eq!(decode(&bytes, len, 0, 0), "READ.ME");
    }

    #[test]
    fn lower_flags_alphabetic_positions_only() {
        assert_eq!(apply("READ.ME", CaseTransform::Lower), "read.me");
        assert_eq!(apply("A2B3", CaseTransform::Lower), "a2b3");
    }

    #[test]
    fn initial_keeps_leading_character() {
        assert_eq!(apply("READ.ME", CaseTransform::Initial), "Read.me");
        assert_eq!(apply("X", CaseTransform::Initial), "X");
    }

    #[test]
    fn camel_capitalizes_after_separators() {
        let (bytes, len) = raw("READ.ME");
        let (vers, min_vers) = encode(&bytes, len, CaseTransform::Camel);
        // READ.ME: positions 1-3 and 6 are lowered, R and M stay upper.
        assert_eq!(vers, 0xb9);
        assert_eq!(min_vers, 0x00);
        assert_eq!(decode(&bytes, len, vers, min_vers), "Read.Me");
    }

    #[test]
    fn camel_spans_both_bitmap_bytes() {
        assert_eq!(apply("MY.LONG.NAMES", CaseTransform::Camel), "My.Long.Names");
    }

    #[test]
    fn round_trip_matches_string_transform() {
        for name in ["READ.ME", "PRODOS", "A.B.C.D.E.F.G", "X123YZ", "NAME.WITH.15CH"] {
            let lowered: String = name.to_ascii_lowercase();
            assert_eq!(apply(name, CaseTransform::Lower), lowered);

            let mut initial = lowered.clone();
            // The stored first byte is uppercase and keeps its case.
            initial.replace_range(0..1, &name[0..1]);
            assert_eq!(apply(name, CaseTransform::Initial), initial);
        }
    }

    #[test]
    fn decode_without_marker_is_identity() {
        let (bytes, len) = raw("SOME.FILE");
        assert_eq!(decode(&bytes, len, 0x00, 0xff), "SOME.FILE");
    }
}
