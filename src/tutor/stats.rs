//! Per-day practice statistics.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Speaking time and homework state for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub minutes_spoken: u32,
    /// Local calendar day, serialized as `YYYY-MM-DD`.
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homework_assigned: Option<String>,
    #[serde(default)]
    pub homework_completed: bool,
}

impl DailyStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            minutes_spoken: 0,
            date,
            homework_assigned: None,
            homework_completed: false,
        }
    }

    /// An assignment exists and has not been handed in.
    pub fn has_outstanding_homework(&self) -> bool {
        self.homework_assigned.is_some() && !self.homework_completed
    }
}

/// Carry `prev` over to `today`.
///
/// Same day: unchanged. New day: minutes reset, completion reset, and the
/// assignment survives only if it was still outstanding.
pub fn rolled_over(prev: &DailyStats, today: NaiveDate) -> DailyStats {
    if prev.date == today {
        return prev.clone();
    }
    DailyStats {
        minutes_spoken: 0,
        date: today,
        homework_assigned: if prev.homework_completed {
            None
        } else {
            prev.homework_assigned.clone()
        },
        homework_completed: false,
    }
}

/// Whole minutes credited for a session of `elapsed_ms`, rounded up.
pub fn elapsed_minutes(elapsed_ms: u64) -> u32 {
    u32::try_from(elapsed_ms.div_ceil(60_000)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn same_day_is_unchanged() {
        let stats = DailyStats {
            minutes_spoken: 12,
            date: day(1),
            homework_assigned: Some("X".into()),
            homework_completed: true,
        };
        assert_eq!(rolled_over(&stats, day(1)), stats);
    }

    #[test]
    fn rollover_preserves_pending_work() {
        let stats = DailyStats {
            minutes_spoken: 30,
            date: day(1),
            homework_assigned: Some("X".into()),
            homework_completed: false,
        };
        let next = rolled_over(&stats, day(2));
        assert_eq!(next.minutes_spoken, 0);
        assert_eq!(next.date, day(2));
        assert_eq!(next.homework_assigned.as_deref(), Some("X"));
        assert!(!next.homework_completed);
    }

    #[test]
    fn rollover_clears_completed_work() {
        let stats = DailyStats {
            minutes_spoken: 30,
            date: day(1),
            homework_assigned: Some("X".into()),
            homework_completed: true,
        };
        let next = rolled_over(&stats, day(2));
        assert_eq!(next.homework_assigned, None);
        assert!(!next.homework_completed);
    }

    #[test]
    fn elapsed_minutes_rounds_up() {
        assert_eq!(elapsed_minutes(0), 0);
        assert_eq!(elapsed_minutes(1), 1);
        assert_eq!(elapsed_minutes(60_000), 1);
        assert_eq!(elapsed_minutes(90_000), 2);
    }

    #[test]
    fn serializes_with_storage_field_names() {
        let stats = DailyStats {
            minutes_spoken: 5,
            date: day(9),
            homework_assigned: Some("Write a diary entry".into()),
            homework_completed: false,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["minutesSpoken"], 5);
        assert_eq!(json["date"], "2026-03-09");
        assert_eq!(json["homeworkAssigned"], "Write a diary entry");
        assert_eq!(json["homeworkCompleted"], false);
    }

    #[test]
    fn deserializes_record_without_homework_fields() {
        let stats: DailyStats =
            serde_json::from_str(r#"{"minutesSpoken": 3, "date": "2026-03-04"}"#).unwrap();
        assert_eq!(stats, DailyStats { minutes_spoken: 3, ..DailyStats::new(day(4)) });
    }
}
