use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use jjob_core::{SchedulerError, SchedulerResult};

/// CRON表达式解析和下次触发时间计算
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    /// 解析CRON表达式
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { schedule })
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 计算距下一次执行的延迟，表达式已无后续触发点时返回None
    pub fn delay_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        let next = self.next_execution_time(now)?;
        let millis = (next - now).num_milliseconds().max(0) as u64;
        Some(Duration::from_millis(millis))
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Schedule::from_str(cron_expr).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
