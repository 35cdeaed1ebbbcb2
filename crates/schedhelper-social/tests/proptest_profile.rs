//! Property tests for preference bit packing and notification names.

use proptest::prelude::*;
use schedhelper_social::{NotificationType, ScoreWeighting, TimeRange};

proptest! {
    #[test]
    fn test_time_range_round_trip(
        start_hour in 0u8..24,
        start_minute in 0u8..60,
        end_hour in 0u8..24,
        end_minute in 0u8..60,
    ) {
        let range = TimeRange { start_hour, start_minute, end_hour, end_minute };
        let packed = range.pack().unwrap();
        prop_assert!(packed >= 0);
        prop_assert_eq!(TimeRange::unpack(packed), range);
    }

    #[test]
    fn test_time_range_rejects_bad_minutes(minute in 60u8..=255) {
        let range = TimeRange { start_hour: 0, start_minute: minute, end_hour: 0, end_minute: 0 };
        prop_assert!(range.pack().is_err());
    }

    #[test]
    fn test_score_weighting_round_trip(scu_evals in 0u8..=100, rmp in 0u8..=100) {
        let weighting = ScoreWeighting { scu_evals, rmp };
        prop_assert_eq!(ScoreWeighting::unpack(weighting.pack().unwrap()), weighting);
    }

    #[test]
    fn test_score_weighting_rejects_over_100(scu_evals in 101u8..=255, rmp in 0u8..=100) {
        let weighting = ScoreWeighting { scu_evals, rmp };
        prop_assert!(weighting.pack().is_err());
    }

    #[test]
    fn test_notification_type_names(index in 0usize..NotificationType::ALL.len()) {
        let t = NotificationType::ALL[index];
        prop_assert_eq!(t.as_str().parse::<NotificationType>().unwrap(), t);
    }
}
