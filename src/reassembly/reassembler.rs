//! The reassembler: ring ownership, ingest entry points, search and claim
//! orchestration.
//!
//! Every ingest stages its buffer in the slot addressed by the sequence
//! number, then walks neighbouring slots for the boundaries of the spans the
//! buffer participates in. A span is emitted by whichever thread claims its
//! head slot; all other threads that discover the same span back off without
//! emitting. Walks are read-only and lock-free, claims linearise on one
//! compare-and-swap per span.

use tracing::{ debug, trace };

use crate::constants::DEFAULT_RING_CAPACITY;
use crate::error::{ Result, StitchError };
use crate::metrics::Metrics;
use crate::reassembly::sequence::SequenceIndex;
use crate::reassembly::slot::{ InstallResult, SlotState };
use crate::reassembly::staged::{ SpanningBuffers, StagedBuffer };
use crate::reassembly::SequenceNumber;

/// Configuration for a reassembler ring
#[derive(Debug, Clone)]
pub struct ReassemblerConfig {
    /// Number of ring slots; bounds in-flight reordering on the stream
    pub capacity: usize,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl ReassemblerConfig {
    /// Create a new configuration with the specified ring capacity
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StitchError::config("Ring capacity must be greater than 0"));
        }
        Ok(Self { capacity })
    }
}

/// Outcome of one ingest
///
/// Out-of-range rejections carry no spans and leave the ring untouched; the
/// caller decides whether to resize or drop the buffer. For
/// [`Reassembler::accept_without_delimiter`] the single discovered span is
/// reported as `leading_span`.
#[derive(Debug, Default)]
pub struct AcceptResult {
    /// Whether the buffer was staged; false means the sequence number fell
    /// outside the ring window
    pub in_range: bool,
    /// Completed span ending at this buffer
    pub leading_span: Option<SpanningBuffers>,
    /// Completed span starting at this buffer's last delimiter
    pub trailing_span: Option<SpanningBuffers>,
}

impl AcceptResult {
    fn out_of_range() -> Self {
        Self::default()
    }

    /// Number of spans completed by this ingest (0, 1 or 2)
    pub fn span_count(&self) -> usize {
        self.leading_span.is_some() as usize + self.trailing_span.is_some() as usize
    }

    /// Consume the result, yielding the completed spans in stream order
    pub fn into_spans(self) -> impl Iterator<Item = SpanningBuffers> {
        self.leading_span.into_iter().chain(self.trailing_span)
    }
}

/// Reassembles logical tuples spanning several physical buffers
///
/// One instance serves one input stream. All entry points take `&self` and
/// are safe to call from any number of threads at once.
pub struct Reassembler {
    slots: Box<[SlotState]>,
    index: SequenceIndex,
    metrics: Metrics,
}

impl Reassembler {
    /// Create a reassembler with `capacity` ring slots.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_config(ReassemblerConfig::new(capacity)?)
    }

    pub fn with_config(config: ReassemblerConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(StitchError::config("Ring capacity must be greater than 0"));
        }
        let slots: Box<[SlotState]> = (0..config.capacity).map(|_| SlotState::empty()).collect();
        // Sequence 0 is a dummy boundary, so the very first leading search
        // terminates at the back of the ring instead of walking forever.
        slots[0].install_sentinel(StagedBuffer::sentinel());
        Ok(Self {
            slots,
            index: SequenceIndex::new(config.capacity),
            metrics: Metrics::new(),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Ingest a buffer in which the parser found at least one delimiter.
    ///
    /// The buffer both closes the span arriving from the left and opens the
    /// span leaving to the right, so the result can carry up to two spans:
    /// the one ending at this buffer's first delimiter and the one starting
    /// at its last.
    pub fn accept_with_delimiter(
        &self,
        sequence: SequenceNumber,
        staged: StagedBuffer
    ) -> AcceptResult {
        let position = self.index.position(sequence);
        match self.slots[position.index].try_set_with_delimiter(position.aba, staged) {
            InstallResult::OutOfRange => {
                return self.reject(sequence);
            }
            InstallResult::Installed { replaced } => self.note_install(sequence, replaced),
        }
        let leading_span = self.find_leading_span(sequence);
        let trailing_span = self.find_trailing_span(sequence, sequence);
        trace!(sequence, spans = (leading_span.is_some() as usize)
            + (trailing_span.is_some() as usize), "delimited buffer staged");
        AcceptResult {
            in_range: true,
            leading_span,
            trailing_span,
        }
    }

    /// Ingest a buffer in which the parser found no delimiter.
    ///
    /// The payload is a middle fragment of exactly one span. That span is
    /// completable only when boundaries exist on both sides, so a single
    /// span is emitted when this buffer was the last missing piece.
    pub fn accept_without_delimiter(
        &self,
        sequence: SequenceNumber,
        staged: StagedBuffer
    ) -> AcceptResult {
        let position = self.index.position(sequence);
        match self.slots[position.index].try_set_without_delimiter(position.aba, staged) {
            InstallResult::OutOfRange => {
                return self.reject(sequence);
            }
            InstallResult::Installed { replaced } => self.note_install(sequence, replaced),
        }
        let span = self.find_span_without_delimiter(sequence);
        trace!(sequence, spans = span.is_some() as usize, "fragment buffer staged");
        AcceptResult {
            in_range: true,
            leading_span: span,
            trailing_span: None,
        }
    }

    /// Ingest a delimited buffer and record that the span crossing it ends
    /// at `offset_of_last_tuple` instead of at an in-buffer delimiter.
    ///
    /// Used when a delimited buffer is being joined to a trailing fragment
    /// that the parser has already scanned. The annotation is visible to
    /// neighbouring searches as a span boundary, and the emitted closing
    /// descriptor carries the offset. Only the trailing side is searched.
    pub fn accept_with_delimiter_trailing_annotation(
        &self,
        sequence: SequenceNumber,
        staged: StagedBuffer,
        offset_of_last_tuple: u32
    ) -> AcceptResult {
        let position = self.index.position(sequence);
        match self.slots[position.index].try_set_with_delimiter(position.aba, staged) {
            InstallResult::OutOfRange => {
                return self.reject(sequence);
            }
            InstallResult::Installed { replaced } => self.note_install(sequence, replaced),
        }
        self.slots[position.index].set_trailing_offset(position.aba, offset_of_last_tuple);
        let trailing_span = self.find_trailing_span(sequence, sequence);
        trace!(sequence, spans = trailing_span.is_some() as usize,
            "delimited buffer staged with trailing annotation");
        AcceptResult {
            in_range: true,
            leading_span: None,
            trailing_span,
        }
    }

    /// Whether the ring has drained: every slot is empty, claimed, still the
    /// pristine sentinel, or the stream-frontier boundary whose onward span
    /// never completed. An unclaimed fragment buffer fails the check.
    pub fn validate_final_state(&self) -> bool {
        self.slots.iter().all(SlotState::is_final_state_valid)
    }

    /// Span that ends at `sequence`'s first delimiter.
    fn find_leading_span(&self, sequence: SequenceNumber) -> Option<SpanningBuffers> {
        let distance = self.search_leading(sequence)?;
        self.assemble_span(sequence - distance, sequence)
    }

    /// Span that starts at `start`'s last boundary. The walk begins at
    /// `search_from`; the two differ when a fragment ingest resumes the
    /// search on behalf of a boundary further left.
    fn find_trailing_span(
        &self,
        start: SequenceNumber,
        search_from: SequenceNumber
    ) -> Option<SpanningBuffers> {
        let distance = self.search_trailing(search_from)?;
        self.assemble_span(start, search_from + distance)
    }

    fn find_span_without_delimiter(&self, sequence: SequenceNumber) -> Option<SpanningBuffers> {
        let leading_distance = self.search_leading(sequence)?;
        self.find_trailing_span(sequence - leading_distance, sequence)
    }

    /// Walk left from `sequence` until a boundary is found: a delimiter, a
    /// trailing-offset annotation, or the sentinel. Returns the distance, or
    /// `None` when the walk hits a slot outside the indexed window, meaning
    /// the span's start has not arrived (or is already gone).
    ///
    /// Read-only and lock-free. Terminates within one ring revolution: after
    /// capacity steps the walk reaches its own slot at the previous
    /// iteration, which can never match.
    fn search_leading(&self, sequence: SequenceNumber) -> Option<u64> {
        let mut distance = 1;
        loop {
            let position = self.index.leading(sequence, distance)?;
            let entry = self.slots[position.index].read_entry_state(position.aba);
            if !entry.has_correct_aba {
                return None;
            }
            if entry.has_delimiter || entry.has_trailing_offset {
                return Some(distance);
            }
            distance += 1;
        }
    }

    /// Walk right from `sequence` until a buffer with a delimiter is found.
    /// Symmetric to [`Self::search_leading`], except that only a real
    /// delimiter closes a span.
    fn search_trailing(&self, sequence: SequenceNumber) -> Option<u64> {
        let mut distance = 1;
        loop {
            let position = self.index.trailing(sequence, distance);
            let entry = self.slots[position.index].read_entry_state(position.aba);
            if !entry.has_correct_aba {
                return None;
            }
            if entry.has_delimiter {
                return Some(distance);
            }
            distance += 1;
        }
    }

    /// Claim the span `[head, closing]` and move its buffers out.
    ///
    /// `head` is the opening boundary, `closing` the buffer holding the
    /// delimiter that ends the span. The closing descriptor is pinned first:
    /// its slot can be recycled once its own onward span completes, and
    /// pinning before the head claim means a lost race aborts with no slot
    /// mutated. The head claim then decides ownership; middles cannot
    /// disappear in between because an unclaimed fragment blocks both claims
    /// and installs.
    ///
    /// The head buffer is part of the emitted list only when payload bytes
    /// follow its boundary; the zero-length sentinel and buffers whose last
    /// delimiter ends the buffer open the span without contributing to it.
    fn assemble_span(
        &self,
        head: SequenceNumber,
        closing: SequenceNumber
    ) -> Option<SpanningBuffers> {
        let closing_position = self.index.position(closing);
        let closing_buffer = self.slots[closing_position.index]
            .claim_leading_buffer(closing_position.aba)?;

        let head_position = self.index.position(head);
        let head_buffer = self.slots[head_position.index].try_claim_span_start(head_position.aba)?;

        let middles = (closing - head - 1) as usize;
        let include_head = head_buffer.has_trailing_fragment();
        let mut span = SpanningBuffers::with_capacity(middles + 1 + include_head as usize);
        if include_head {
            span.push(head_buffer);
        }
        for sequence in head + 1..closing {
            let position = self.index.position(sequence);
            self.slots[position.index].claim_no_delimiter_buffer(position.aba, &mut span);
        }
        span.push(closing_buffer);

        self.metrics.record_span();
        Some(span)
    }

    fn note_install(&self, sequence: SequenceNumber, replaced: bool) {
        self.metrics.record_accept();
        if replaced {
            self.metrics.record_drop();
            debug!(sequence, "recycled slot released a retained buffer");
        }
    }

    fn reject(&self, sequence: SequenceNumber) -> AcceptResult {
        self.metrics.record_rejection();
        debug!(sequence, "sequence outside the ring window, buffer not staged");
        AcceptResult::out_of_range()
    }
}

impl std::fmt::Display for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reassembler({})", self.capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reassembly::staged::BufferHandle;

    /// Descriptor for `text`, delimiters at every `\n`.
    fn staged(text: &str) -> StagedBuffer {
        let bytes = text.as_bytes();
        let first = bytes.iter().position(|b| *b == b'\n');
        let last = bytes.iter().rposition(|b| *b == b'\n');
        match (first, last) {
            (Some(first), Some(last)) => StagedBuffer::with_delimiters(
                BufferHandle::from(bytes),
                first as u32,
                last as u32
            ).unwrap(),
            _ => StagedBuffer::without_delimiter(BufferHandle::from(bytes)),
        }
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(Reassembler::new(0).is_err());
        assert!(ReassemblerConfig::new(0).is_err());
    }

    #[test]
    fn test_default_config() {
        let reassembler = Reassembler::with_config(ReassemblerConfig::default()).unwrap();
        assert_eq!(reassembler.capacity(), crate::constants::DEFAULT_RING_CAPACITY);
    }

    #[test]
    fn test_display() {
        let reassembler = Reassembler::new(4).unwrap();
        assert_eq!(reassembler.to_string(), "Reassembler(4)");
    }

    #[test]
    fn test_first_delimited_buffer_completes_the_opening_span() {
        let reassembler = Reassembler::new(4).unwrap();
        let result = reassembler.accept_with_delimiter(1, staged("k=1,v=a\n"));
        assert!(result.in_range);
        let span = result.leading_span.expect("opening span");
        assert_eq!(span.len(), 1);
        assert_eq!(span[0].bytes(), b"k=1,v=a\n");
        assert!(result.trailing_span.is_none());
    }

    #[test]
    fn test_fragment_alone_emits_nothing() {
        let reassembler = Reassembler::new(4).unwrap();
        let result = reassembler.accept_without_delimiter(1, staged("k=1"));
        assert!(result.in_range);
        assert_eq!(result.span_count(), 0);
    }

    #[test]
    fn test_two_buffer_span() {
        let reassembler = Reassembler::new(4).unwrap();
        assert_eq!(reassembler.accept_without_delimiter(1, staged("k=1,v=a")).span_count(), 0);
        let result = reassembler.accept_with_delimiter(2, staged("\nk=2,v=b\n"));
        let span = result.leading_span.expect("span closed by the delimiter");
        assert_eq!(span.len(), 2);
        assert_eq!(span[0].bytes(), b"k=1,v=a");
        assert_eq!(span[1].bytes(), b"\nk=2,v=b\n");
        assert!(result.trailing_span.is_none());
    }

    #[test]
    fn test_out_of_range_when_window_is_exhausted() {
        let reassembler = Reassembler::new(2).unwrap();
        assert!(reassembler.accept_without_delimiter(1, staged("aa")).in_range);
        assert!(reassembler.accept_without_delimiter(2, staged("bb")).in_range);
        // Slot 1 still holds the unclaimed fragment of sequence 1.
        let result = reassembler.accept_without_delimiter(3, staged("cc"));
        assert!(!result.in_range);
        assert_eq!(reassembler.metrics().snapshot().buffers_rejected, 1);
    }

    #[test]
    fn test_trailing_annotation_rides_out_on_the_span_head() {
        let reassembler = Reassembler::new(8).unwrap();
        // The closing buffer arrives first, then the annotated buffer joins
        // its own tail fragment to it. Only the trailing side is searched.
        assert_eq!(reassembler.accept_with_delimiter(3, staged("v=c\nk=4,v=d")).span_count(), 0);
        let result =
            reassembler.accept_with_delimiter_trailing_annotation(2, staged("k=2,v=b\nk=3"), 9);
        assert!(result.in_range);
        assert!(result.leading_span.is_none());
        let span = result.trailing_span.expect("span joined to the annotated buffer");
        assert_eq!(span.len(), 2);
        assert_eq!(span[0].offset_of_trailing_tuple(), Some(9));
        assert_eq!(span[1].bytes(), b"v=c\nk=4,v=d");
    }

    #[test]
    fn test_metrics_account_for_spans() {
        let reassembler = Reassembler::new(4).unwrap();
        reassembler.accept_with_delimiter(1, staged("k=1,v=a\n"));
        reassembler.accept_with_delimiter(2, staged("k=2,v=b\n"));
        let snapshot = reassembler.metrics().snapshot();
        assert_eq!(snapshot.buffers_accepted, 2);
        assert_eq!(snapshot.spans_emitted, 2);
    }

    #[test]
    fn test_validate_final_state() {
        let reassembler = Reassembler::new(4).unwrap();
        assert!(reassembler.validate_final_state());

        reassembler.accept_with_delimiter(1, staged("k=1,v=a\n"));
        // Frontier boundary: acceptable.
        assert!(reassembler.validate_final_state());

        reassembler.accept_without_delimiter(2, staged("k=2"));
        // Lost middle: its span never completed.
        assert!(!reassembler.validate_final_state());
    }
}
