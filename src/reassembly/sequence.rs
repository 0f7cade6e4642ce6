//! Sequence-number arithmetic for the reassembly ring.
//!
//! A sequence number `s` lands in slot `s % N` at ABA iteration
//! `s / N + 1`. Neighbour lookups are expressed on the target sequence
//! number itself, so crossing the back of the ring shifts the expected
//! iteration without any explicit wrap bookkeeping.

use crate::reassembly::SequenceNumber;

/// Ring coordinates of one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPosition {
    /// Index into the slot array
    pub index: usize,
    /// ABA iteration expected at that slot, always >= 1
    pub aba: u64,
}

/// Pure index arithmetic over a ring of fixed capacity
#[derive(Debug, Clone, Copy)]
pub struct SequenceIndex {
    capacity: u64,
}

impl SequenceIndex {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "ring capacity must be at least 1");
        Self {
            capacity: capacity as u64,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Ring coordinates for `sequence`.
    ///
    /// Iterations start at 1, so sequence 0 (the sentinel) maps to slot 0 at
    /// iteration 1 and the first wrap of any slot is iteration 2.
    #[inline]
    pub fn position(&self, sequence: SequenceNumber) -> SlotPosition {
        SlotPosition {
            index: (sequence % self.capacity) as usize,
            aba: sequence / self.capacity + 1,
        }
    }

    /// Coordinates `distance` steps towards the front of the stream, or
    /// `None` when the walk would step past sequence 0.
    #[inline]
    pub fn leading(&self, sequence: SequenceNumber, distance: u64) -> Option<SlotPosition> {
        sequence
            .checked_sub(distance)
            .map(|target| self.position(target))
    }

    /// Coordinates `distance` steps away from the front of the stream.
    #[inline]
    pub fn trailing(&self, sequence: SequenceNumber, distance: u64) -> SlotPosition {
        self.position(sequence + distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_iteration_mapping() {
        let index = SequenceIndex::new(4);
        assert_eq!(index.position(0), SlotPosition { index: 0, aba: 1 });
        assert_eq!(index.position(1), SlotPosition { index: 1, aba: 1 });
        assert_eq!(index.position(3), SlotPosition { index: 3, aba: 1 });
    }

    #[test]
    fn test_wrap_advances_iteration() {
        let index = SequenceIndex::new(4);
        assert_eq!(index.position(4), SlotPosition { index: 0, aba: 2 });
        assert_eq!(index.position(7), SlotPosition { index: 3, aba: 2 });
        assert_eq!(index.position(8), SlotPosition { index: 0, aba: 3 });
    }

    #[test]
    fn test_leading_walk_crosses_the_ring_back() {
        let index = SequenceIndex::new(4);
        // From sequence 5 (slot 1, iteration 2) two steps left lands on
        // sequence 3 (slot 3, iteration 1).
        assert_eq!(
            index.leading(5, 2),
            Some(SlotPosition { index: 3, aba: 1 })
        );
        assert_eq!(index.leading(1, 1), Some(SlotPosition { index: 0, aba: 1 }));
        assert_eq!(index.leading(1, 2), None);
    }

    #[test]
    fn test_trailing_walk_crosses_the_ring_back() {
        let index = SequenceIndex::new(4);
        assert_eq!(
            index.trailing(3, 1),
            SlotPosition { index: 0, aba: 2 }
        );
        assert_eq!(
            index.trailing(3, 5),
            SlotPosition { index: 0, aba: 3 }
        );
    }

    #[test]
    fn test_capacity_one_ring() {
        let index = SequenceIndex::new(1);
        assert_eq!(index.position(0), SlotPosition { index: 0, aba: 1 });
        assert_eq!(index.position(5), SlotPosition { index: 0, aba: 6 });
    }
}
