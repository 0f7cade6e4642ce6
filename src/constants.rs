//! Core constants for the reassembly ring.

/// Default ring capacity in slots
///
/// The capacity bounds how far ahead of the oldest incomplete span the
/// source may run before ingests are rejected.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// Cache line size for alignment (64 bytes on most CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity_is_power_of_two() {
        assert!(DEFAULT_RING_CAPACITY.is_power_of_two());
    }

    #[test]
    fn test_cache_line_size_is_power_of_two() {
        assert!(CACHE_LINE_SIZE.is_power_of_two());
    }
}
