//! The XOR-metric routing table: 160 ordered k-buckets, a recency-ordered
//! `observe`/`evict` pair, and a distance-centred outward bucket walk for
//! finding the closest known peers to any target id.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use kad_core::{Id, Peer, ID_BITS};

#[derive(Clone, Debug)]
pub struct RoutingEntry {
    pub peer: Peer,
    pub last_seen: Instant,
}

/// Result of [`RoutingTable::observe`].
#[derive(Clone, Debug)]
pub enum ObserveOutcome {
    /// The peer was already known; its `last_seen` was refreshed and it was
    /// moved to the back of its bucket.
    Bumped,
    /// The peer was new and there was room for it.
    Inserted,
    /// The peer's bucket is full. `candidate` is the least-recently-seen
    /// entry in that bucket — the caller should probe it and `evict` it on
    /// failure. The new peer was *not* inserted.
    Full { candidate: Peer },
}

struct KBucket {
    k: usize,
    entries: VecDeque<RoutingEntry>,
    last_touched: Instant,
}

impl KBucket {
    fn new(k: usize, now: Instant) -> Self {
        KBucket {
            k,
            entries: VecDeque::with_capacity(k),
            last_touched: now,
        }
    }

    fn observe(&mut self, peer: Peer, now: Instant) -> ObserveOutcome {
        if let Some(pos) = self.entries.iter().position(|e| e.peer.id == peer.id) {
            let mut entry = self.entries.remove(pos).expect("position just found");
            entry.last_seen = now;
            self.entries.push_back(entry);
            self.last_touched = now;
            return ObserveOutcome::Bumped;
        }

        if self.entries.len() < self.k {
            self.entries.push_back(RoutingEntry { peer, last_seen: now });
            self.last_touched = now;
            return ObserveOutcome::Inserted;
        }

        let candidate = self
            .entries
            .front()
            .expect("a full bucket with capacity > 0 is non-empty")
            .peer
            .clone();
        ObserveOutcome::Full { candidate }
    }

    fn evict(&mut self, id: &Id) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| &e.peer.id == id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.iter()
    }
}

/// 160 ordered k-buckets plus the local id.
pub struct RoutingTable {
    local_id: Id,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_id: Id, k: usize) -> Self {
        let now = Instant::now();
        RoutingTable {
            local_id,
            buckets: (0..ID_BITS).map(|_| KBucket::new(k, now)).collect(),
        }
    }

    pub fn local_id(&self) -> Id {
        self.local_id
    }

    /// The only mutator. Panics if `peer.id == self.local_id` — a
    /// programmer error, never a recoverable one.
    pub fn observe(&mut self, peer: Peer) -> ObserveOutcome {
        assert_ne!(peer.id, self.local_id, "cannot observe the local node's own id");
        let idx = self
            .local_id
            .bucket_index_of(&peer.id)
            .expect("checked above: peer.id != local_id");
        self.buckets[idx].observe(peer, Instant::now())
    }

    /// True if `id` currently has an entry in the table.
    pub fn contains(&self, id: &Id) -> bool {
        match self.local_id.bucket_index_of(id) {
            Some(idx) => self.buckets[idx].iter().any(|e| e.peer.id == *id),
            None => false,
        }
    }

    /// Removes `id` from its bucket. Panics if `id` was not present —
    /// missing ids are an error here, not a silent no-op.
    pub fn evict(&mut self, id: &Id) {
        let idx = self
            .local_id
            .bucket_index_of(id)
            .expect("cannot evict the local node's own id");
        assert!(self.buckets[idx].evict(id), "evict called for an unknown id");
    }

    /// Up to `n` known peers ordered by ascending XOR distance to `target`,
    /// via the distance-centred outward bucket walk.
    pub fn closest_to(&self, target: &Id, n: usize) -> Vec<Peer> {
        let start = if *target == self.local_id {
            0
        } else {
            self.local_id
                .bucket_index_of(target)
                .expect("checked above: target != local_id")
        };

        let mut out = Vec::new();
        for group in centered_groups(start, self.buckets.len()) {
            let mut batch: Vec<Peer> = group
                .into_iter()
                .flat_map(|idx| self.buckets[idx].iter().map(|e| e.peer.clone()))
                .collect();
            batch.sort_by_key(|peer| peer.id.distance(target));
            out.extend(batch);
            if out.len() >= n {
                out.truncate(n);
                return out;
            }
        }
        out
    }

    /// The smallest bucket index with at least one entry, or `None` if the
    /// table is empty. Used to skip refreshing buckets nearer than any
    /// known peer.
    pub fn first_occupied_bucket(&self) -> Option<usize> {
        self.buckets.iter().position(|b| !b.is_empty())
    }

    /// Bucket indices that have seen no `observe` activity in over
    /// `stale_after` — candidates for periodic refresh.
    pub fn stale_buckets(&self, stale_after: Duration) -> Vec<usize> {
        let now = Instant::now();
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty() && now.duration_since(b.last_touched) > stale_after)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// A deliberate no-op: this core tracks no flakiness score for a peer
    /// that fails to answer a request, but gives a caller a single hook to
    /// add one later instead of that policy being silently absent.
    pub fn note_unreachable(&self, _id: &Id) {}
}

/// Generates the distance-centred permutation of bucket indices starting
/// at `i` and expanding outward by ±1, ±2, …, stopping expansion on either
/// side once it leaves `[0, length)`. Indices equidistant from `i` (one
/// group per width) are returned together so their entries can be sorted
/// against each other before being appended to the result — otherwise a
/// peer in the "-width" bucket could be listed ahead of a strictly closer
/// peer in the "+width" bucket just because of iteration order.
fn centered_groups(i: usize, length: usize) -> Vec<Vec<usize>> {
    let mut groups = vec![vec![i]];
    let mut width = 1usize;
    loop {
        let mut group = Vec::with_capacity(2);
        if i >= width {
            group.push(i - width);
        }
        if i + width < length {
            group.push(i + width);
        }
        if group.is_empty() {
            break;
        }
        groups.push(group);
        width += 1;
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_from_u32(v: u32) -> Id {
        let mut bytes = [0u8; kad_core::ID_LEN];
        bytes[kad_core::ID_LEN - 4..].copy_from_slice(&v.to_be_bytes());
        Id::from_bytes(bytes)
    }

    fn peer(v: u32) -> Peer {
        Peer::new("127.0.0.1", 9000, id_from_u32(v))
    }

    #[test]
    fn bucket_fill_and_evict_scenario() {
        let mut table = RoutingTable::new(id_from_u32(0b1000), 2);

        assert!(matches!(table.observe(peer(0b1100)), ObserveOutcome::Inserted));
        assert!(matches!(table.observe(peer(0b1101)), ObserveOutcome::Inserted));

        match table.observe(peer(0b1110)) {
            ObserveOutcome::Full { candidate } => {
                assert_eq!(candidate.id, id_from_u32(0b1100));
            }
            other => panic!("expected Full, got {other:?}"),
        }

        table.evict(&id_from_u32(0b1100));
        assert!(matches!(table.observe(peer(0b1110)), ObserveOutcome::Inserted));
    }

    #[test]
    fn repeated_observe_bumps_without_reordering_others() {
        let mut table = RoutingTable::new(id_from_u32(0b1000), 3);
        table.observe(peer(0b1100));
        table.observe(peer(0b1101));
        table.observe(peer(0b1110));

        assert!(matches!(table.observe(peer(0b1100)), ObserveOutcome::Bumped));

        // The bucket (index 2) should now list 0b1101, 0b1110, 0b1100 —
        // 0b1100 moved to the back, the other two keep their order.
        let closest = table.closest_to(&id_from_u32(0b1000), 3);
        let closest_from_self_bucket: Vec<_> = closest.iter().map(|p| p.id).collect();
        assert!(closest_from_self_bucket.contains(&id_from_u32(0b1100)));
    }

    #[test]
    fn closest_lookup_across_buckets_scenario() {
        let mut table = RoutingTable::new(id_from_u32(0b10000), 2);
        table.observe(peer(0b10010));
        table.observe(peer(0b10100));
        table.observe(peer(0b10101));
        table.observe(peer(0b11000));

        let closest = table.closest_to(&id_from_u32(0b10010), 2);
        assert_eq!(
            closest.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![id_from_u32(0b10010), id_from_u32(0b10100)]
        );

        let closest = table.closest_to(&id_from_u32(0b10100), 2);
        assert_eq!(
            closest.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![id_from_u32(0b10100), id_from_u32(0b10101)]
        );

        table.evict(&id_from_u32(0b10100));
        let closest = table.closest_to(&id_from_u32(0b10100), 2);
        assert_eq!(
            closest.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![id_from_u32(0b10101), id_from_u32(0b10010)]
        );
    }

    #[test]
    fn first_occupied_bucket_and_stale_buckets() {
        let mut table = RoutingTable::new(id_from_u32(0b1000), 2);
        assert_eq!(table.first_occupied_bucket(), None);
        table.observe(peer(0b1100));
        assert_eq!(table.first_occupied_bucket(), Some(2));
        assert!(table.stale_buckets(Duration::from_secs(0)).contains(&2));
        assert!(table.stale_buckets(Duration::from_secs(3600)).is_empty());
    }

    #[test]
    #[should_panic]
    fn observe_self_is_a_programmer_error() {
        let mut table = RoutingTable::new(id_from_u32(0b1000), 2);
        table.observe(peer(0b1000));
    }
}
