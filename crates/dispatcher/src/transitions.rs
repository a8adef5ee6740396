use renderfarm_core::{
    models::{Task, TaskStatus, TaskUpdate},
    traits::TaskRepository,
    FarmResult,
};
use tracing::debug;

/// 条件更新失败后重新读取并校验的最大次数
pub(crate) const MAX_CAS_ATTEMPTS: usize = 3;

/// 将尚未结束的任务强制转入 `target`（取消或中止）
///
/// 返回 false 表示任务在此期间已进入不可再转换的状态或已被删除。
pub(crate) async fn settle_task(
    task_repo: &dyn TaskRepository,
    task: &Task,
    target: TaskStatus,
    log_line: &str,
) -> FarmResult<bool> {
    let mut current = task.status;

    for _ in 0..MAX_CAS_ATTEMPTS {
        if current.is_final() {
            return Ok(false);
        }

        let update = TaskUpdate::status(target).with_log(log_line);
        if task_repo.update_if_status(task.id, current, &update).await? {
            return Ok(true);
        }

        match task_repo.get_by_id(task.id).await? {
            Some(fresh) => {
                debug!("任务 {} 状态已变为 {}，重新尝试", task.id, fresh.status);
                current = fresh.status;
            }
            None => return Ok(false),
        }
    }

    Ok(false)
}
