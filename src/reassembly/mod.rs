//! Spanning-tuple reassembly over a lock-free slot ring.
//!
//! A source delivers fixed-size buffers tagged with contiguous sequence
//! numbers, in arbitrary arrival order and from many threads at once. A
//! logical tuple may begin near the end of one buffer and end several buffers
//! later. The reassembler stages each buffer in a ring slot addressed by its
//! sequence number and emits every spanning tuple exactly once, as soon as
//! the buffers carrying its bytes have all arrived.
//!
//! ## Components
//!
//! | Type | Role |
//! |------|------|
//! | `SequenceIndex` | Sequence number to (slot, ABA iteration) arithmetic |
//! | `SlotState` | Per-slot atomic state machine |
//! | `StagedBuffer` | Buffer handle plus delimiter geometry |
//! | `Reassembler` | Ring ownership and the accept entry points |
//! | `SpanningBuffers` | One emitted span, in sequence order |
//!
//! ## Concurrency
//!
//! Each slot packs its flags and an ABA iteration counter into a single
//! atomic word. Search walks are plain atomic loads and take no lock; span
//! ownership is decided by one compare-and-swap on the span's head slot, so
//! exactly one thread assembles each span. Ingest never parks and completes
//! in work proportional to the span it discovers.

pub mod reassembler;
pub mod sequence;
pub mod slot;
pub mod staged;

pub use reassembler::{ AcceptResult, Reassembler, ReassemblerConfig };
pub use sequence::{ SequenceIndex, SlotPosition };
pub use slot::{ EntryState, SlotState };
pub use staged::{ BufferHandle, SpanningBuffers, StagedBuffer };

/// Sequence number assigned by the source to each emitted buffer
///
/// Strictly increasing and contiguous, starting at 1. Sequence number 0 is
/// reserved for the construction sentinel at the back of the ring.
pub type SequenceNumber = u64;
