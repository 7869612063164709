/// Recommend a chunk size for a file of `file_size` bytes.
///
/// Starts at `min_size` and grows in `min_size` increments until the
/// expected chunk count drops below 100, clamping to `max_size`. The result
/// is advisory: the server only enforces that no single chunk exceeds
/// `max_size`, not that clients use the recommended size.
pub fn recommend_chunk_size(file_size: u64, min_size: u64, max_size: u64) -> u64 {
    debug_assert!(min_size > 0);
    let mut chunk_size = min_size;
    loop {
        let count = file_size.div_ceil(chunk_size);
        if count < 100 {
            return chunk_size;
        }
        chunk_size += min_size;
        if chunk_size > max_size {
            return max_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_small_file_gets_min_size() {
        assert_eq!(recommend_chunk_size(1, 1024, 1 << 20), 1024);
        assert_eq!(recommend_chunk_size(0, 1024, 1 << 20), 1024);
    }

    #[test]
    fn test_grows_in_min_increments() {
        // 1 MB file, 1 KB min: 1024 chunks at min, needs 11 KB chunks
        // to get below 100.
        let size = recommend_chunk_size(1 << 20, 1024, 1 << 20);
        assert_eq!(size % 1024, 0);
        assert!((1u64 << 20).div_ceil(size) < 100);
    }

    #[test]
    fn test_saturates_at_max() {
        // 10 GB file with a 1 MB cap can't get below 100 chunks.
        let size = recommend_chunk_size(10 << 30, 1 << 20, 1 << 20);
        assert_eq!(size, 1 << 20);
    }

    #[test]
    fn test_reference_scenario() {
        // 1553-byte file, min = max = 1000: two chunks of 1000 and 553.
        assert_eq!(recommend_chunk_size(1553, 1000, 1000), 1000);
    }

    proptest! {
        #[test]
        fn prop_recommendation_bounds(
            file_size in 0u64..=1 << 40,
            min in 1u64..=1 << 20,
            factor in 1u64..=256,
        ) {
            let max = min * factor;
            let size = recommend_chunk_size(file_size, min, max);
            prop_assert!(size >= min);
            prop_assert!(size <= max);
            prop_assert_eq!(size % min, 0);
            // Below 100 chunks unless saturated at max.
            if size != max {
                prop_assert!(file_size.div_ceil(size) < 100);
            }
        }
    }
}
