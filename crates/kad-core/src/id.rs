//! 160-bit identifier algebra: XOR distance, bucket indexing, and the
//! random-identifier-within-bucket sampler used for routing table refresh.

use std::cmp::Ordering;
use std::fmt;

use bitvec::prelude::*;

/// Width of an identifier in bytes (160 bits).
pub const ID_LEN: usize = 20;
/// Width of an identifier in bits.
pub const ID_BITS: usize = ID_LEN * 8;

/// A 160-bit unsigned identifier, big-endian.
///
/// Used both for node ids and for the keys under which values are stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id([u8; ID_LEN]);

impl Id {
    pub const ZERO: Id = Id([0u8; ID_LEN]);

    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; ID_LEN] {
        self.0
    }

    /// Draws a cryptographically random identifier, used for a fresh node id
    /// or a fresh nonce.
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LEN];
        getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
        Id(bytes)
    }

    /// `self XOR other`, interpreted as the Kademlia distance metric.
    pub fn distance(&self, other: &Id) -> Distance {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// The bucket index `other` falls into from `self`'s perspective.
    ///
    /// `None` iff `other == self` — bucket index is undefined for the local
    /// id.
    pub fn bucket_index_of(&self, other: &Id) -> Option<usize> {
        if self == other {
            return None;
        }
        Some(self.distance(other).bit_length() - 1)
    }

    /// Returns an id `d` bits away from `self` whose bucket index, from
    /// `self`'s perspective, is exactly `bucket` — i.e. `self XOR d` where
    /// `d` is drawn uniformly from `bucket_range(bucket)`.
    ///
    /// `bit_position` below counts from the least-significant bit (0) to
    /// the most-significant bit (ID_BITS - 1), matching the bucket-index
    /// convention: bucket `i` is the set of distances whose highest set bit
    /// is bit `i`.
    pub fn random_in_bucket(&self, bucket: usize) -> Id {
        assert!(bucket < ID_BITS, "bucket index out of range: {bucket}");

        let mut distance = [0u8; ID_LEN];
        let mut filler = [0u8; ID_LEN];
        getrandom::getrandom(&mut filler).expect("failed to generate random bytes");

        {
            let dist_bits = distance.view_bits_mut::<Msb0>();
            let filler_bits = filler.view_bits::<Msb0>();

            // Bit `bucket` (counting from the LSB) must be set so the
            // highest set bit is exactly `bucket`; everything above it
            // stays zero, everything below is randomized.
            dist_bits.set(bit_index_from_lsb(bucket), true);
            for p in 0..bucket {
                let idx = bit_index_from_lsb(p);
                dist_bits.set(idx, filler_bits[idx]);
            }
        }

        self.xor_with(&Distance(distance))
    }

    fn xor_with(&self, distance: &Distance) -> Id {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ distance.0[i];
        }
        Id(out)
    }
}

/// Maps a bit position counted from the LSB (0) into the `Msb0`-ordered bit
/// index bitvec expects for a big-endian byte array.
fn bit_index_from_lsb(position: usize) -> usize {
    ID_BITS - 1 - position
}

/// The XOR distance between two identifiers, treated as an unsigned
/// 160-bit integer. Byte-array lexicographic ordering matches big-endian
/// numeric ordering, so deriving `Ord` gives the correct metric ordering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance([u8; ID_LEN]);

impl Distance {
    /// Position of the highest set bit, plus one; 0 iff the distance is
    /// zero (only possible when comparing an id to itself).
    pub fn bit_length(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                let leading = byte.leading_zeros() as usize;
                return ID_BITS - (i * 8 + leading);
            }
        }
        0
    }

    /// The inclusive `[min, max]` range of distances that land in bucket
    /// `i`, expressed as the smallest and largest id matching `2^i` and
    /// `2^(i+1) - 1` respectively.
    pub fn bucket_range(i: usize) -> (Distance, Distance) {
        assert!(i < ID_BITS);
        let mut min = [0u8; ID_LEN];
        min.view_bits_mut::<Msb0>().set(bit_index_from_lsb(i), true);

        let mut max = [0u8; ID_LEN];
        {
            let bits = max.view_bits_mut::<Msb0>();
            for p in 0..=i {
                bits.set(bit_index_from_lsb(p), true);
            }
        }
        (Distance(min), Distance(max))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", hex::encode(self.0))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(self.0))
    }
}

/// Compares two ids by XOR distance to a shared target, the ordering
/// `closest_to` sorts by.
pub fn distance_cmp(target: &Id, a: &Id, b: &Id) -> Ordering {
    a.distance(target).cmp(&b.distance(target))
}
