use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const STALE_AFTER_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Running,
    Warning,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Running => "running",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(HealthStatus::Running),
            "warning" => Some(HealthStatus::Warning),
            "error" => Some(HealthStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub check_time: DateTime<Utc>,
    pub status: HealthStatus,
    pub data_update_time: Option<DateTime<Utc>>,
    pub last_prediction_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl HealthRecord {
    /// Record written after a successful daily update.
    pub fn after_update(now: DateTime<Utc>) -> Self {
        Self {
            check_time: now,
            status: HealthStatus::Running,
            data_update_time: Some(now),
            last_prediction_time: Some(now),
            error_message: None,
        }
    }

    /// Record written when a scheduled update fails. Update timestamps carry over from `latest`.
    pub fn failure(now: DateTime<Utc>, latest: Option<&HealthRecord>, message: impl Into<String>) -> Self {
        Self {
            check_time: now,
            status: HealthStatus::Error,
            data_update_time: latest.and_then(|r| r.data_update_time),
            last_prediction_time: latest.and_then(|r| r.last_prediction_time),
            error_message: Some(message.into()),
        }
    }
}

/// Derives the next health record from the previous one and today's recommendation count.
///
/// The first problem found wins the message: stale data, missing history, then no
/// recommendations for today. Update timestamps carry over from `latest`.
pub fn evaluate_health(
    latest: Option<&HealthRecord>,
    recommendations_today: i64,
    now: DateTime<Utc>,
) -> HealthRecord {
    let mut status = HealthStatus::Running;
    let mut error_message: Option<String> = None;

    match latest {
        Some(prev) => {
            if let Some(updated) = prev.data_update_time {
                let age = now - updated;
                if age > Duration::hours(STALE_AFTER_HOURS) {
                    status = HealthStatus::Warning;
                    let hours = age.num_minutes() as f64 / 60.0;
                    error_message = Some(format!("数据已过期 {hours:.1} 小时"));
                }
            }
        }
        None => {
            status = HealthStatus::Warning;
            error_message = Some("没有历史健康检查记录".to_string());
        }
    }

    if recommendations_today == 0 {
        status = HealthStatus::Warning;
        error_message.get_or_insert_with(|| "今日未生成推荐".to_string());
    }

    HealthRecord {
        check_time: now,
        status,
        data_update_time: latest.and_then(|r| r.data_update_time),
        last_prediction_time: latest.and_then(|r| r.last_prediction_time),
        error_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn fresh_data_with_recommendations_is_running() {
        let prev = HealthRecord::after_update(now() - Duration::hours(3));
        let next = evaluate_health(Some(&prev), 10, now());
        assert_eq!(next.status, HealthStatus::Running);
        assert_eq!(next.error_message, None);
        assert_eq!(next.data_update_time, prev.data_update_time);
    }

    #[test]
    fn stale_data_warns_first() {
        let prev = HealthRecord::after_update(now() - Duration::hours(30));
        let next = evaluate_health(Some(&prev), 0, now());
        assert_eq!(next.status, HealthStatus::Warning);
        assert_eq!(next.error_message.as_deref(), Some("数据已过期 30.0 小时"));
    }

    #[test]
    fn missing_history_warns() {
        let next = evaluate_health(None, 5, now());
        assert_eq!(next.status, HealthStatus::Warning);
        assert_eq!(next.error_message.as_deref(), Some("没有历史健康检查记录"));
        assert_eq!(next.data_update_time, None);
    }

    #[test]
    fn failure_keeps_previous_update_times() {
        let prev = HealthRecord::after_update(now() - Duration::hours(20));
        let next = HealthRecord::failure(now(), Some(&prev), "tushare daily request failed");
        assert_eq!(next.status, HealthStatus::Error);
        assert_eq!(next.data_update_time, prev.data_update_time);
        assert_eq!(next.error_message.as_deref(), Some("tushare daily request failed"));

        let first = HealthRecord::failure(now(), None, "boom");
        assert_eq!(first.data_update_time, None);
    }

    #[test]
    fn zero_recommendations_warns() {
        let prev = HealthRecord::after_update(now() - Duration::hours(1));
        let next = evaluate_health(Some(&prev), 0, now());
        assert_eq!(next.status, HealthStatus::Warning);
        assert_eq!(next.error_message.as_deref(), Some("今日未生成推荐"));
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [HealthStatus::Running, HealthStatus::Warning, HealthStatus::Error] {
            assert_eq!(HealthStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(HealthStatus::parse("bogus"), None);
    }
}
