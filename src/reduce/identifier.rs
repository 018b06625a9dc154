//! 96-bit identifier arithmetic (spec §4.3): source row identifiers are
//! Mongo `ObjectId`s, a 12-byte (96-bit) value that sorts lexicographically
//! the same as it does numerically. `u128` comfortably holds 96 bits, so
//! range splitting is plain integer arithmetic rather than hand-rolled
//! big-number math.

use crate::error::EngineError;
use mongodb::bson::oid::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Identifier(pub u128);

impl Identifier {
    pub fn from_object_id(id: &ObjectId) -> Self {
        let bytes = id.bytes();
        let mut buf = [0u8; 16];
        buf[4..16].copy_from_slice(&bytes);
        Identifier(u128::from_be_bytes(buf))
    }

    pub fn to_object_id(self) -> Result<ObjectId, EngineError> {
        let full = self.0.to_be_bytes();
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&full[4..16]);
        Ok(ObjectId::from_bytes(bytes))
    }
}

/// A half-open `[start, end)` range; `end = None` means unbounded above,
/// used for the last range so no row past the observed maximum is missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierRange {
    pub index: usize,
    pub start: Identifier,
    pub end: Option<Identifier>,
}

/// Splits the inclusive `[min, max]` span into `k` contiguous, equal-sized
/// (as close as integer division allows) ranges. The first `span % k`
/// ranges get one extra unit so every identifier in range is covered
/// exactly once. `k = 1` yields a single unbounded range.
pub fn build_ranges(min: Identifier, max: Identifier, k: u32) -> Vec<IdentifierRange> {
    if max < min || k == 0 {
        return Vec::new();
    }
    let k = k as u128;
    let span = max.0 - min.0 + 1;
    let base = span / k;
    let rem = span % k;

    let mut ranges = Vec::with_capacity(k as usize);
    let mut cursor = min.0;
    for i in 0..k {
        let size = base + if (i as u128) < rem { 1 } else { 0 };
        let start = cursor;
        let is_last = i as u128 == k - 1;
        let end = if is_last { None } else { Some(start + size) };
        ranges.push(IdentifierRange {
            index: i as usize,
            start: Identifier(start),
            end: end.map(Identifier),
        });
        cursor = start + size.max(1);
        if is_last {
            break;
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Identifier {
        Identifier(n)
    }

    #[test]
    fn single_chunk_covers_everything_unbounded() {
        let ranges = build_ranges(id(10), id(20), 1);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, id(10));
        assert_eq!(ranges[0].end, None);
    }

    #[test]
    fn splits_into_equal_contiguous_ranges_with_remainder_distributed() {
        // span = 10 (0..=9), k = 3 -> sizes 4, 3, 3
        let ranges = build_ranges(id(0), id(9), 3);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].start, id(0));
        assert_eq!(ranges[0].end, Some(id(4)));
        assert_eq!(ranges[1].start, id(4));
        assert_eq!(ranges[1].end, Some(id(7)));
        assert_eq!(ranges[2].start, id(7));
        assert_eq!(ranges[2].end, None);
    }

    #[test]
    fn max_less_than_min_is_empty() {
        assert!(build_ranges(id(5), id(4), 4).is_empty());
    }

    #[test]
    fn object_id_roundtrips_through_identifier() {
        let oid = ObjectId::new();
        let identifier = Identifier::from_object_id(&oid);
        assert_eq!(identifier.to_object_id().unwrap(), oid);
    }
}
