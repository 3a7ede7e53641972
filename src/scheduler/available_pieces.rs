use std::collections::BTreeSet;

use bit_set::BitSet;

/// Tracks how many connected peers have each piece, and which pieces are still waiting to be
/// started.
///
/// Pending pieces are kept ordered by `(availability, index)` so that the rarest piece, with the
/// lowest index breaking ties, is always first.
pub struct AvailablePieces {
    /// Number of connected peers that have each piece
    availability: Vec<usize>,
    /// Pieces that are neither in progress nor verified
    pending: BitSet,
    /// Priority queue of (peer_count, piece_index) tuples ordered by rarity
    priorities: BTreeSet<(usize, usize)>,
}

impl AvailablePieces {
    pub fn new(total_pieces: usize) -> Self {
        Self {
            availability: vec![0; total_pieces],
            pending: (0..total_pieces).collect(),
            priorities: (0..total_pieces).map(|index| (0, index)).collect(),
        }
    }

    pub fn availability(&self, piece: usize) -> usize {
        self.availability.get(piece).copied().unwrap_or(0)
    }

    pub fn is_pending(&self, piece: usize) -> bool {
        self.pending.contains(piece)
    }

    pub fn peer_has_piece(&mut self, piece: usize) {
        if piece < self.availability.len() {
            self.update(piece, |count| count + 1);
        }
    }

    pub fn peer_lost_piece(&mut self, piece: usize) {
        if piece < self.availability.len() {
            self.update(piece, |count| count.saturating_sub(1));
        }
    }

    fn update(&mut self, piece: usize, f: impl FnOnce(usize) -> usize) {
        let old = self.availability[piece];
        let new = f(old);
        self.availability[piece] = new;
        if self.pending.contains(piece) {
            self.priorities.remove(&(old, piece));
            self.priorities.insert((new, piece));
        }
    }

    /// Removes and returns the rarest pending piece accepted by `filter`, which is given the
    /// piece index and its availability.
    pub fn take_next(&mut self, filter: impl Fn(usize, usize) -> bool) -> Option<usize> {
        let &(count, piece) = self
            .priorities
            .iter()
            .find(|&&(count, piece)| filter(piece, count))?;
        self.priorities.remove(&(count, piece));
        self.pending.remove(piece);
        Some(piece)
    }

    /// Puts a piece back in the pending set, e.g. after it failed verification.
    pub fn insert(&mut self, piece: usize) {
        if self.pending.insert(piece) {
            self.priorities.insert((self.availability[piece], piece));
        }
    }
}
