//! 计划执行时间计算
//!
//! 根据目标的每日触发时间决定任务排在今天还是明天

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};

/// 计算计划执行时间（本地时间）
///
/// - 当前时刻不晚于触发时间：排在今天
/// - 已经过了触发时间：排在明天
/// - `run_now`：触发时间取当前时刻，总是今天
///
/// 结果精确到秒
pub fn compute_scheduled_time(trigger: NaiveTime, now: NaiveDateTime, run_now: bool) -> NaiveDateTime {
    let now = now.with_nanosecond(0).unwrap_or(now);
    let time_of_day = now.time();
    let trigger = if run_now {
        time_of_day
    } else {
        trigger.with_nanosecond(0).unwrap_or(trigger)
    };

    let date = if time_of_day <= trigger {
        now.date()
    } else {
        now.date().succ_opt().unwrap_or(now.date())
    };
    date.and_time(trigger)
}

/// 按本地时区计算计划执行时间并转换为 UTC
pub fn scheduled_time_utc(trigger: NaiveTime, now: DateTime<Local>, run_now: bool) -> DateTime<Utc> {
    let naive = compute_scheduled_time(trigger, now.naive_local(), run_now);
    // 夏令时切换造成的不存在时刻退回到当前时间
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or(now)
        .with_timezone(&Utc)
}
