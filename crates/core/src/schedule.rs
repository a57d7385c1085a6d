//! Declarative list of recurring tasks. The worker decides how to run them.

use serde::Serialize;

pub const DEFAULT_DAILY_UPDATE_CRON: &str = "0 0 2 * * *";
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 1200;
pub const SCHEDULE_TIMEZONE: &str = "Asia/Shanghai";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Six-field cron expression (with seconds), evaluated in [`SCHEDULE_TIMEZONE`].
    Cron(String),
    Interval { seconds: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    HealthCheck,
    DailyUpdate,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::HealthCheck => "health_check",
            TaskKind::DailyUpdate => "daily_update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub trigger: Trigger,
    pub kind: TaskKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub daily_update_cron: String,
    pub health_interval_secs: u64,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            daily_update_cron: DEFAULT_DAILY_UPDATE_CRON.to_string(),
            health_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
        }
    }
}

impl ScheduleOptions {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("SCHEDULE_DAILY_UPDATE_CRON") {
            let s = s.trim();
            if !s.is_empty() {
                anyhow::ensure!(
                    s.split_whitespace().count() == 6,
                    "SCHEDULE_DAILY_UPDATE_CRON must have 6 fields (sec min hour dom mon dow): {s}"
                );
                out.daily_update_cron = s.to_string();
            }
        }

        if let Some(secs) = crate::config::env_parse::<u64>("SCHEDULE_HEALTH_INTERVAL_SECS")? {
            anyhow::ensure!(secs >= 1, "SCHEDULE_HEALTH_INTERVAL_SECS must be >= 1");
            out.health_interval_secs = secs;
        }

        Ok(out)
    }
}

pub fn default_tasks(opts: &ScheduleOptions) -> Vec<TaskDefinition> {
    vec![
        TaskDefinition {
            name: "health_check",
            description: "系统健康检查",
            trigger: Trigger::Interval {
                seconds: opts.health_interval_secs,
            },
            kind: TaskKind::HealthCheck,
        },
        TaskDefinition {
            name: "full_data_update",
            description: "完整数据更新（每日）",
            trigger: Trigger::Cron(opts.daily_update_cron.clone()),
            kind: TaskKind::DailyUpdate,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_schedule_health_and_daily_update() {
        let tasks = default_tasks(&ScheduleOptions::default());
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].trigger, Trigger::Interval { seconds: 1200 });
        assert_eq!(tasks[1].trigger, Trigger::Cron("0 0 2 * * *".to_string()));
        assert_eq!(tasks[1].kind, TaskKind::DailyUpdate);
    }

    #[test]
    fn task_names_are_unique() {
        let tasks = default_tasks(&ScheduleOptions::default());
        let mut names: Vec<_> = tasks.iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tasks.len());
    }
}
