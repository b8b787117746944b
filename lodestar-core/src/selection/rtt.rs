//! Exponentially Weighted Moving Average (EWMA) of round-trip time
//!
//! Every successful heartbeat yields one raw RTT sample. Selection compares
//! servers by the smoothed average so a single slow probe does not push a server
//! out of the latency window.

/// Weight given to the newest sample.
pub const RTT_ALPHA: f64 = 0.2;

/// Fold a new round-trip sample into the running average.
///
/// The first sample (no `current` average) becomes the average unchanged.
/// Afterwards the average moves a fifth of the way toward each new sample:
///
/// `average = 0.2 * sample + 0.8 * current`
///
/// `new_sample` is expected to be a non-negative millisecond duration; it is not
/// validated here.
pub fn update_average_round_trip_time(current: Option<f64>, new_sample: f64) -> f64 {
    match current {
        None => new_sample,
        Some(current) => RTT_ALPHA * new_sample + (1.0 - RTT_ALPHA) * current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_sample_is_taken_verbatim() {
        assert_eq!(update_average_round_trip_time(None, 42.5), 42.5);
    }

    #[test]
    fn test_spike_is_damped() {
        let avg = update_average_round_trip_time(Some(10.0), 110.0);
        assert!((avg - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_converges_toward_steady_sample() {
        let mut avg = None;
        for _ in 0..100 {
            avg = Some(update_average_round_trip_time(avg, 7.0));
        }
        assert!((avg.unwrap() - 7.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_no_history_returns_sample(sample in 0.0f64..1e6) {
            prop_assert_eq!(update_average_round_trip_time(None, sample), sample);
        }

        #[test]
        fn prop_weighted_average(current in 0.0f64..1e6, sample in 0.0f64..1e6) {
            let got = update_average_round_trip_time(Some(current), sample);
            let want = 0.2 * sample + 0.8 * current;
            prop_assert!((got - want).abs() <= 1e-9 * want.max(1.0));
        }

        /// The average always lies between the old average and the new sample.
        #[test]
        fn prop_bounded_by_inputs(current in 0.0f64..1e6, sample in 0.0f64..1e6) {
            let got = update_average_round_trip_time(Some(current), sample);
            let (lo, hi) = if current < sample { (current, sample) } else { (sample, current) };
            prop_assert!(got >= lo - 1e-9 && got <= hi + 1e-9);
        }
    }
}
