//! 任务生命周期状态机与作业状态聚合

use renderfarm_core::{FarmError, FarmResult, JobStatus, TaskStatus};

/// 状态转换是否被允许
pub fn is_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    matches!(
        (from, to),
        (Queued, Processing)
            | (Queued, Canceled)
            | (Queued, Aborted)
            | (Processing, Processing)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Canceled)
            | (Processing, Aborted)
            | (Processing, Queued)
    )
}

/// 校验任务状态转换，不允许的转换返回 `InvalidTransition`
pub fn validate_transition(task_id: i64, from: TaskStatus, to: TaskStatus) -> FarmResult<()> {
    if is_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(FarmError::InvalidTransition {
            id: task_id,
            from,
            to,
        })
    }
}

/// Manager 上报可以触发的状态转换
///
/// 与完整转换表相比少了 queued -> processing：进入 processing 只能经由调度器领取。
pub fn is_report_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    from != TaskStatus::Queued && is_transition_allowed(from, to)
}

/// 校验 Manager 上报的状态转换
pub fn validate_report_transition(
    task_id: i64,
    from: TaskStatus,
    to: TaskStatus,
) -> FarmResult<()> {
    if is_report_allowed(from, to) {
        Ok(())
    } else {
        Err(FarmError::InvalidTransition {
            id: task_id,
            from,
            to,
        })
    }
}

/// 作业状态聚合策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStatusPolicy {
    /// 失败任务数达到该值时作业即视为失败
    pub failure_threshold: usize,
}

impl Default for JobStatusPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
        }
    }
}

impl JobStatusPolicy {
    pub fn new(failure_threshold: usize) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
        }
    }
}

/// 根据全部任务的状态计算作业状态
///
/// 规则按顺序匹配：
/// 1. 失败数达到阈值 → failed
/// 2. 全部任务不可再转换 → 有失败则 failed，有取消或中止则 canceled，否则 completed
/// 3. 有任务在处理或已完成 → active
/// 4. 其余 → queued
pub fn aggregate_job_status(statuses: &[TaskStatus], policy: &JobStatusPolicy) -> JobStatus {
    let failed = statuses
        .iter()
        .filter(|s| **s == TaskStatus::Failed)
        .count();
    if failed >= policy.failure_threshold.max(1) {
        return JobStatus::Failed;
    }

    if statuses.is_empty() {
        return JobStatus::Queued;
    }

    if statuses.iter().all(TaskStatus::is_final) {
        if failed > 0 {
            return JobStatus::Failed;
        }
        if statuses
            .iter()
            .any(|s| matches!(s, TaskStatus::Canceled | TaskStatus::Aborted))
        {
            return JobStatus::Canceled;
        }
        return JobStatus::Completed;
    }

    if statuses
        .iter()
        .any(|s| matches!(s, TaskStatus::Processing | TaskStatus::Completed))
    {
        return JobStatus::Active;
    }

    JobStatus::Queued
}
