//! Per-slot state machine of the reassembly ring.
//!
//! Each slot packs its flags and ABA iteration into a single atomic word.
//! Search walks read that word and nothing else, so they stay lock-free and
//! see a consistent per-slot snapshot. The staged descriptor itself lives
//! behind a small per-slot mutex: installs, claims and recycling all move
//! the descriptor under that lock, and the state word is only ever written
//! while it is held. The compare-and-swap that flips `CLAIMED` is the
//! linearisation point deciding which thread owns a span.
//!
//! Slot reuse across ring rotations is an ABA hazard for plain flag words;
//! the iteration counter in the upper bits is what tells a fresh use of a
//! slot index from a stale one.

use std::sync::atomic::{ AtomicU32, AtomicU64, Ordering };

use parking_lot::Mutex;
use static_assertions::const_assert;

use crate::constants::CACHE_LINE_SIZE;
use crate::reassembly::staged::{ SpanningBuffers, StagedBuffer };

/// Buffer present in the slot
const OCCUPIED: u64 = 1;
/// The staged buffer contains at least one complete delimiter
const HAS_DELIMITER: u64 = 1 << 1;
/// A trailing-offset annotation was recorded for this buffer
const HAS_TRAILING_OFFSET: u64 = 1 << 2;
/// The span starting at this slot has been claimed
const CLAIMED: u64 = 1 << 3;
/// The construction dummy at the back of the ring
const SENTINEL: u64 = 1 << 4;

/// Bits 0..FLAG_BITS hold flags, the rest the ABA iteration.
const FLAG_BITS: u32 = 8;
const FLAG_MASK: u64 = (1 << FLAG_BITS) - 1;

const_assert!(SENTINEL < (1 << FLAG_BITS));
const_assert!(std::mem::align_of::<SlotState>() == 2 * CACHE_LINE_SIZE);

/// Annotation value meaning "no trailing-tuple offset recorded".
const NO_TRAILING_OFFSET: u32 = u32::MAX;

#[inline]
const fn pack(aba: u64, flags: u64) -> u64 {
    (aba << FLAG_BITS) | (flags & FLAG_MASK)
}

#[inline]
const fn aba_of(word: u64) -> u64 {
    word >> FLAG_BITS
}

/// Snapshot of one slot as seen by a search walk. One atomic load.
#[derive(Debug, Clone, Copy)]
pub struct EntryState {
    /// The slot holds a buffer for the iteration the walk expected
    pub has_correct_aba: bool,
    /// That buffer contains a complete delimiter
    pub has_delimiter: bool,
    /// That buffer carries a trailing-offset annotation
    pub has_trailing_offset: bool,
}

/// Outcome of staging a buffer into a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallResult {
    /// Buffer staged. `replaced` reports that a descriptor retained from an
    /// earlier iteration was released to make room.
    Installed {
        replaced: bool,
    },
    /// The slot still holds an unclaimed buffer from an earlier iteration,
    /// or has already rotated past this sequence number.
    OutOfRange,
}

/// One entry of the ring
///
/// Aligned to two cache lines so neighbouring slots never share one; the
/// searches of concurrent ingests hammer adjacent entries.
#[repr(align(128))]
pub struct SlotState {
    state: AtomicU64,
    trailing_offset: AtomicU32,
    staged: Mutex<Option<StagedBuffer>>,
}

impl SlotState {
    pub fn empty() -> Self {
        Self {
            state: AtomicU64::new(0),
            trailing_offset: AtomicU32::new(NO_TRAILING_OFFSET),
            staged: Mutex::new(None),
        }
    }

    /// Install the construction sentinel: sequence 0, iteration 1.
    ///
    /// The sentinel is an already-passed boundary. It is claimable exactly
    /// once, by whichever thread completes the first span, yet remains
    /// replaceable when the window first wraps onto slot 0 even if that
    /// claim never happened.
    pub(crate) fn install_sentinel(&self, dummy: StagedBuffer) {
        *self.staged.lock() = Some(dummy);
        self.state
            .store(pack(1, OCCUPIED | HAS_DELIMITER | SENTINEL), Ordering::Release);
    }

    /// Stage a buffer that contains at least one complete delimiter.
    pub(crate) fn try_set_with_delimiter(&self, aba: u64, staged: StagedBuffer) -> InstallResult {
        self.try_install(aba, staged, HAS_DELIMITER)
    }

    /// Stage a buffer whose payload is a single fragment of some span.
    pub(crate) fn try_set_without_delimiter(
        &self,
        aba: u64,
        staged: StagedBuffer
    ) -> InstallResult {
        self.try_install(aba, staged, 0)
    }

    fn try_install(&self, aba: u64, staged: StagedBuffer, extra_flags: u64) -> InstallResult {
        let mut cell = self.staged.lock();
        loop {
            let current = self.state.load(Ordering::Acquire);
            if aba_of(current) >= aba {
                // A second install for the same (slot, iteration) pair, or a
                // successor already rotated the slot forward.
                return InstallResult::OutOfRange;
            }
            let reusable = (current & OCCUPIED) == 0
                || (current & CLAIMED) != 0
                || (current & SENTINEL) != 0;
            if !reusable {
                // Unclaimed in-flight buffer from an older iteration: the
                // window is exhausted and this ingest must be rejected.
                return InstallResult::OutOfRange;
            }
            let next = pack(aba, OCCUPIED | extra_flags);
            match self.state.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire
            ) {
                Ok(_) => {
                    // The zero-byte sentinel is not a real buffer; replacing
                    // it is not a drop worth reporting.
                    let replaced =
                        cell.replace(staged).is_some() && (current & SENTINEL) == 0;
                    self.trailing_offset.store(NO_TRAILING_OFFSET, Ordering::Relaxed);
                    return InstallResult::Installed { replaced };
                }
                // A concurrent claim of the old content slipped in between
                // the load and the swap; re-evaluate against the new word.
                Err(_) => continue,
            }
        }
    }

    /// Record that the span crossing this buffer ends at `offset` inside it.
    ///
    /// Idempotent. Returns false when the slot no longer holds a buffer for
    /// `expected_aba`, in which case nothing is recorded.
    pub(crate) fn set_trailing_offset(&self, expected_aba: u64, offset: u32) -> bool {
        let _cell = self.staged.lock();
        let current = self.state.load(Ordering::Acquire);
        if aba_of(current) != expected_aba || (current & OCCUPIED) == 0 {
            return false;
        }
        self.trailing_offset.store(offset, Ordering::Relaxed);
        self.state.store(current | HAS_TRAILING_OFFSET, Ordering::Release);
        true
    }

    /// Snapshot for a search walk. Never touches the descriptor cell.
    #[inline]
    pub(crate) fn read_entry_state(&self, expected_aba: u64) -> EntryState {
        let word = self.state.load(Ordering::Acquire);
        EntryState {
            has_correct_aba: aba_of(word) == expected_aba && (word & OCCUPIED) != 0,
            has_delimiter: (word & HAS_DELIMITER) != 0,
            has_trailing_offset: (word & HAS_TRAILING_OFFSET) != 0,
        }
    }

    /// Atomically claim this slot as the start of a span.
    ///
    /// Exactly one caller can win per iteration. The descriptor is cloned
    /// out rather than moved: the same buffer also closes the preceding
    /// span, and the two spans complete in arbitrary order.
    pub(crate) fn try_claim_span_start(&self, expected_aba: u64) -> Option<StagedBuffer> {
        let cell = self.staged.lock();
        let current = self.state.load(Ordering::Acquire);
        let claimable = aba_of(current) == expected_aba
            && (current & OCCUPIED) != 0
            && (current & CLAIMED) == 0
            && (current & (HAS_DELIMITER | HAS_TRAILING_OFFSET)) != 0;
        if !claimable {
            return None;
        }
        if
            self.state
                .compare_exchange(current, current | CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return None;
        }
        let staged = cell
            .as_ref()
            .expect("claimed span start holds no staged buffer");
        Some(self.attach_annotation(current, staged.clone()))
    }

    /// Move out the descriptor of a middle (no-delimiter) slot of a span the
    /// caller has already claimed the start of.
    ///
    /// No compare-and-swap: once the head claim succeeded no other thread
    /// can reach this slot, because middles carry no boundary a search could
    /// stop at. A missing buffer here is a protocol violation and fatal.
    pub(crate) fn claim_no_delimiter_buffer(&self, expected_aba: u64, span: &mut SpanningBuffers) {
        let mut cell = self.staged.lock();
        let current = self.state.load(Ordering::Acquire);
        assert!(
            aba_of(current) == expected_aba
                && (current & OCCUPIED) != 0
                && (current & CLAIMED) == 0,
            "middle-of-span claim on a slot that is not an unclaimed middle"
        );
        let staged = cell.take().expect("middle of a claimed span holds no staged buffer");
        self.state.store(current | CLAIMED, Ordering::Release);
        span.push(staged);
    }

    /// Clone out the descriptor of the buffer holding the delimiter that
    /// closes a span.
    ///
    /// The slot is left unclaimed; the same buffer opens the next span.
    /// Returns `None` when the slot was recycled since the search saw it,
    /// which aborts the emission before any slot has been mutated.
    pub(crate) fn claim_leading_buffer(&self, expected_aba: u64) -> Option<StagedBuffer> {
        let cell = self.staged.lock();
        let current = self.state.load(Ordering::Acquire);
        if aba_of(current) != expected_aba || (current & OCCUPIED) == 0 {
            return None;
        }
        let staged = cell
            .as_ref()
            .expect("closing boundary of a span holds no staged buffer");
        Some(self.attach_annotation(current, staged.clone()))
    }

    fn attach_annotation(&self, word: u64, staged: StagedBuffer) -> StagedBuffer {
        if (word & HAS_TRAILING_OFFSET) != 0 {
            let offset = self.trailing_offset.load(Ordering::Relaxed);
            if offset != NO_TRAILING_OFFSET {
                return staged.with_trailing_tuple(offset);
            }
        }
        staged
    }

    /// Whether this slot is acceptable once the stream has drained: empty,
    /// still the pristine sentinel, fully claimed, or the stream-frontier
    /// boundary whose onward span never completed. An unclaimed buffer with
    /// no boundary is a lost middle.
    pub(crate) fn is_final_state_valid(&self) -> bool {
        let word = self.state.load(Ordering::Acquire);
        (word & OCCUPIED) == 0
            || (word & SENTINEL) != 0
            || (word & CLAIMED) != 0
            || (word & (HAS_DELIMITER | HAS_TRAILING_OFFSET)) != 0
    }

    #[cfg(test)]
    fn flags(&self) -> u64 {
        self.state.load(Ordering::Acquire) & FLAG_MASK
    }
}
