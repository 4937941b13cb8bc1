//! Chunk packing
//!
//! Pure timeline arithmetic: fixed windows for video-only content and
//! greedy packing of non-silent ranges for audio content. No I/O here so
//! every boundary case is unit-testable.

use crate::segment::{Chunk, TimeInterval};

/// Tolerance for float accumulation over interval durations
const EPS: f64 = 1e-9;

/// Partition `[0, duration)` into fixed windows of `min_split` seconds,
/// truncating the final window. Content shorter than one window yields a
/// single chunk covering the whole file.
pub fn fixed_windows(duration: f64, min_split: f64) -> Vec<Chunk> {
    if duration <= EPS {
        return Vec::new();
    }
    if duration <= min_split {
        return vec![Chunk::single(0.0, duration)];
    }
    let mut chunks = Vec::new();
    let mut current = 0.0;
    while current < duration - EPS {
        let stop = (current + min_split).min(duration);
        chunks.push(Chunk::single(current, stop));
        current = stop;
    }
    chunks
}

/// Shrink each silence run by `buffer` seconds on both sides so the
/// adjacent content keeps a little surrounding quiet. Runs too short to
/// shrink are elided whole.
pub fn trim_silences(silences: &[TimeInterval], buffer: f64) -> Vec<TimeInterval> {
    silences
        .iter()
        .map(|run| {
            let start = run.start_secs + buffer;
            let stop = run.stop_secs - buffer;
            if start < stop {
                TimeInterval::new(start, stop)
            } else {
                *run
            }
        })
        .collect()
}

/// Complement of the (sorted, disjoint) silence runs within `[0, duration)`
pub fn content_ranges(duration: f64, silences: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut ranges = Vec::new();
    let mut cursor = 0.0;
    for run in silences {
        if run.start_secs - cursor > EPS {
            ranges.push(TimeInterval::new(cursor, run.start_secs));
        }
        cursor = cursor.max(run.stop_secs);
    }
    if duration - cursor > EPS {
        ranges.push(TimeInterval::new(cursor, duration));
    }
    ranges
}

/// Greedily pack content ranges into chunks bounded by `min_split` seconds.
///
/// A range that overflows a partially-filled chunk is split at the
/// boundary so no content is dropped. A range that exceeds the bound on
/// its own is emitted whole as a single oversized chunk rather than cut
/// mid-utterance.
pub fn pack_ranges(ranges: &[TimeInterval], min_split: f64) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<TimeInterval> = Vec::new();
    let mut current_duration = 0.0;

    for range in ranges {
        let mut rest = *range;
        loop {
            let rest_duration = rest.duration();
            if rest_duration <= EPS {
                break;
            }
            if current_duration + rest_duration <= min_split + EPS {
                current.push(rest);
                current_duration += rest_duration;
                break;
            }
            if current.is_empty() {
                // Unbroken span longer than the bound: emit whole
                chunks.push(Chunk {
                    intervals: vec![rest],
                });
                break;
            }
            let room = min_split - current_duration;
            if room > EPS {
                let cut = rest.start_secs + room;
                current.push(TimeInterval::new(rest.start_secs, cut));
                rest.start_secs = cut;
            }
            chunks.push(Chunk {
                intervals: std::mem::take(&mut current),
            });
            current_duration = 0.0;
        }
    }
    if !current.is_empty() {
        chunks.push(Chunk { intervals: current });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPLIT: f64 = 6.0;

    fn iv(start: f64, stop: f64) -> TimeInterval {
        TimeInterval::new(start, stop)
    }

    fn total_duration(chunks: &[Chunk]) -> f64 {
        chunks.iter().map(Chunk::duration).sum()
    }

    fn assert_well_formed(chunks: &[Chunk]) {
        let mut cursor = f64::NEG_INFINITY;
        for chunk in chunks {
            assert!(!chunk.intervals.is_empty());
            for interval in &chunk.intervals {
                assert!(
                    interval.duration() > 0.0,
                    "zero-duration interval {interval:?}"
                );
                assert!(
                    interval.start_secs >= cursor - 1e-9,
                    "intervals out of order at {interval:?}"
                );
                cursor = interval.stop_secs;
            }
        }
    }

    #[test]
    fn test_short_content_is_one_chunk() {
        for duration in [0.5, 3.0, 5.99, 6.0] {
            let chunks = fixed_windows(duration, SPLIT);
            assert_eq!(chunks.len(), 1, "duration {duration}");
            assert_eq!(chunks[0].intervals[0], iv(0.0, duration));
        }
    }

    #[test]
    fn test_fixed_windows_truncate_tail() {
        let chunks = fixed_windows(14.0, SPLIT);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].intervals[0], iv(0.0, 6.0));
        assert_eq!(chunks[1].intervals[0], iv(6.0, 12.0));
        assert_eq!(chunks[2].intervals[0], iv(12.0, 14.0));
        assert_well_formed(&chunks);
    }

    #[test]
    fn test_fixed_windows_empty_duration() {
        assert!(fixed_windows(0.0, SPLIT).is_empty());
    }

    #[test]
    fn test_trim_silences_keeps_buffer_margin() {
        let trimmed = trim_silences(&[iv(2.0, 4.0)], 0.25);
        assert_eq!(trimmed, vec![iv(2.25, 3.75)]);
    }

    #[test]
    fn test_trim_silences_elides_short_runs_whole() {
        // A 0.4s run cannot give back 0.25s on each side
        let trimmed = trim_silences(&[iv(2.0, 2.4)], 0.25);
        assert_eq!(trimmed, vec![iv(2.0, 2.4)]);
    }

    #[test]
    fn test_content_ranges_complement() {
        let ranges = content_ranges(10.0, &[iv(2.0, 3.5), iv(7.0, 8.0)]);
        assert_eq!(ranges, vec![iv(0.0, 2.0), iv(3.5, 7.0), iv(8.0, 10.0)]);
    }

    #[test]
    fn test_content_ranges_silence_at_edges() {
        let ranges = content_ranges(10.0, &[iv(0.0, 1.0), iv(9.0, 10.0)]);
        assert_eq!(ranges, vec![iv(1.0, 9.0)]);
    }

    #[test]
    fn test_silence_interior_never_in_output() {
        let silences = trim_silences(&[iv(4.0, 6.0)], 0.25);
        let ranges = content_ranges(12.0, &silences);
        let chunks = pack_ranges(&ranges, SPLIT);
        for chunk in &chunks {
            for interval in &chunk.intervals {
                // The trimmed gap interior (4.25, 5.75) must not overlap
                assert!(
                    interval.stop_secs <= 4.25 + 1e-9 || interval.start_secs >= 5.75 - 1e-9,
                    "interval {interval:?} overlaps elided silence"
                );
            }
        }
        assert_well_formed(&chunks);
    }

    #[test]
    fn test_pack_accumulates_up_to_bound() {
        let ranges = vec![iv(0.0, 2.0), iv(3.0, 5.0), iv(6.0, 7.5)];
        let chunks = pack_ranges(&ranges, SPLIT);
        // 2 + 2 + 1.5 = 5.5 fits one chunk
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].intervals.len(), 3);
        assert!((chunks[0].duration() - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_pack_splits_overflow_at_boundary() {
        let ranges = vec![iv(0.0, 4.0), iv(5.0, 10.0)];
        let chunks = pack_ranges(&ranges, SPLIT);
        assert_eq!(chunks.len(), 2);
        // First chunk filled to exactly the bound: 4s + first 2s of the next range
        assert!((chunks[0].duration() - SPLIT).abs() < 1e-9);
        assert_eq!(chunks[0].intervals[1], iv(5.0, 7.0));
        // Remainder starts the next chunk
        assert_eq!(chunks[1].intervals, vec![iv(7.0, 10.0)]);
        // No content lost
        assert!((total_duration(&chunks) - 9.0).abs() < 1e-9);
        assert_well_formed(&chunks);
    }

    #[test]
    fn test_pack_emits_oversized_unbroken_span_whole() {
        let ranges = vec![iv(0.0, 9.0)];
        let chunks = pack_ranges(&ranges, SPLIT);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].intervals, vec![iv(0.0, 9.0)]);
        assert!(chunks[0].duration() > SPLIT);
    }

    #[test]
    fn test_pack_reconstructs_full_timeline() {
        let ranges = vec![
            iv(0.0, 1.5),
            iv(2.0, 6.5),
            iv(7.0, 8.0),
            iv(9.0, 16.0),
            iv(17.0, 17.5),
        ];
        let input_total: f64 = ranges.iter().map(TimeInterval::duration).sum();
        let chunks = pack_ranges(&ranges, SPLIT);
        assert!((total_duration(&chunks) - input_total).abs() < 1e-6);
        assert_well_formed(&chunks);
        // Only chunks made of a single unbroken overflow span may exceed the bound
        for chunk in &chunks {
            if chunk.duration() > SPLIT + 1e-9 {
                assert_eq!(chunk.intervals.len(), 1);
            }
        }
    }

    #[test]
    fn test_pack_empty_input() {
        assert!(pack_ranges(&[], SPLIT).is_empty());
    }
}
