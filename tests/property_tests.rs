//! Property-based tests for anomaly classification and timestamp handling.

use aqi_sentinel::anomaly::{classify, AnomalyError};
use aqi_sentinel::handlers::predict::ReadingTimestamp;
use chrono::{NaiveDate, Timelike};
use proptest::prelude::*;

fn value() -> impl Strategy<Value = f64> {
    -1_000.0f64..1_000.0
}

fn interval() -> impl Strategy<Value = (f64, f64)> {
    (value(), 0.0f64..500.0).prop_map(|(lower, width)| (lower, lower + width))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn inside_interval_is_never_anomalous((lower, upper) in interval(), frac in 0.0f64..=1.0) {
        let actual = lower + (upper - lower) * frac;
        prop_assume!(actual >= lower && actual <= upper);
        let c = classify(actual, lower, upper).unwrap();
        prop_assert!(!c.is_anomaly);
        prop_assert_eq!(c.deviation, 0.0);
    }

    #[test]
    fn deviation_sign_matches_side((lower, upper) in interval(), actual in value()) {
        let c = classify(actual, lower, upper).unwrap();
        prop_assert_eq!(c.is_anomaly, actual < lower || actual > upper);
        if actual < lower {
            prop_assert!(c.deviation < 0.0);
            prop_assert_eq!(c.deviation, actual - lower);
        } else if actual > upper {
            prop_assert!(c.deviation > 0.0);
            prop_assert_eq!(c.deviation, actual - upper);
        }
    }

    #[test]
    fn bounds_are_inclusive((lower, upper) in interval()) {
        prop_assert!(!classify(lower, lower, upper).unwrap().is_anomaly);
        prop_assert!(!classify(upper, lower, upper).unwrap().is_anomaly);
    }

    #[test]
    fn inverted_interval_is_rejected(a in value(), b in value(), actual in value()) {
        prop_assume!(a != b);
        let (lower, upper) = if a > b { (a, b) } else { (b, a) };
        let is_inverted = matches!(
            classify(actual, lower, upper),
            Err(AnomalyError::InvertedInterval { .. })
        );
        prop_assert!(is_inverted);
    }

    #[test]
    fn offset_never_shifts_wall_clock(
        hour in 0u32..24,
        minute in 0u32..60,
        offset_hours in -12i32..=14,
    ) {
        let sign = if offset_hours < 0 { '-' } else { '+' };
        let text = format!(
            "2024-06-01T{:02}:{:02}:00{}{:02}:00",
            hour, minute, sign, offset_hours.abs()
        );
        let ts = ReadingTimestamp::parse(&text).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap();
        prop_assert_eq!(ts.wall_clock(), expected);
        prop_assert_eq!(ts.wall_clock().hour(), hour);
        prop_assert_eq!(ts.as_str(), text.as_str());
    }
}
