//! Stitch - lock-free reassembly of tuples spanning out-of-order buffers
//!
//! Sources deliver fixed-size buffers tagged with contiguous sequence
//! numbers, concurrently and in arbitrary order. Record boundaries fall
//! anywhere, so a logical tuple may straddle several buffers. Stitch stages
//! each buffer in a sequence-addressed ring slot and hands every spanning
//! tuple to the caller exactly once, as soon as the last buffer carrying its
//! bytes arrives, without copying payload data.
//!
//! ```rust
//! use stitch::{BufferHandle, Reassembler, StagedBuffer};
//!
//! let reassembler = Reassembler::new(1024).unwrap();
//!
//! // "k=1,v=a" continues in the next buffer, which closes it with '\n'.
//! let fragment = StagedBuffer::without_delimiter(BufferHandle::from(&b"k=1,v=a"[..]));
//! assert_eq!(reassembler.accept_without_delimiter(1, fragment).span_count(), 0);
//!
//! let closing = StagedBuffer::with_delimiters(BufferHandle::from(&b"\nk=2"[..]), 0, 0).unwrap();
//! let result = reassembler.accept_with_delimiter(2, closing);
//! let span = result.leading_span.expect("tuple completed");
//! assert_eq!(span.len(), 2);
//! ```

pub mod constants;
pub mod error;
pub mod metrics;
pub mod reassembly;

// Re-export main components
pub use error::{ Result, StitchError };
pub use metrics::{ Metrics, MetricsSnapshot };
pub use reassembly::{
    AcceptResult,
    BufferHandle,
    Reassembler,
    ReassemblerConfig,
    SequenceNumber,
    SpanningBuffers,
    StagedBuffer,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
