use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use renderfarm_core::{
    config::DispatcherConfig,
    models::{Manager, ManagerStatus, Task, TaskStatus, TaskUpdate},
    traits::{ManagerRepository, TaskRepository},
    FarmResult,
};

use crate::job_status::JobStatusRefresher;

/// 孤儿任务恢复配置
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// processing 任务无任何上报超过该时长即视为孤儿
    pub orphan_timeout: chrono::Duration,
    /// 持有者离线且超过该时长未被看到时，任务重新排队
    pub offline_grace: chrono::Duration,
    pub scan_interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

impl From<&DispatcherConfig> for RecoveryConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            orphan_timeout: chrono::Duration::seconds(config.orphan_timeout_seconds),
            offline_grace: chrono::Duration::seconds(config.manager_offline_grace_seconds),
            scan_interval: Duration::from_secs(config.orphan_scan_interval_seconds),
        }
    }
}

/// 任务被判定为孤儿的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanReason {
    Stale { idle_seconds: i64 },
    HolderOffline { manager_id: i64 },
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanReason::Stale { idle_seconds } => {
                write!(f, "{idle_seconds} 秒内没有任何进度上报")
            }
            OrphanReason::HolderOffline { manager_id } => {
                write!(f, "持有者 Manager {manager_id} 已离线")
            }
        }
    }
}

/// 孤儿任务恢复
///
/// 持有者崩溃或失联后，其 processing 任务不会再有上报。定期扫描这类任务，
/// 以条件更新 processing -> queued 放回队列。
pub struct OrphanTaskRecovery {
    task_repo: Arc<dyn TaskRepository>,
    manager_repo: Arc<dyn ManagerRepository>,
    job_status: Arc<JobStatusRefresher>,
    config: RecoveryConfig,
    running: Arc<RwLock<bool>>,
}

impl OrphanTaskRecovery {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        manager_repo: Arc<dyn ManagerRepository>,
        job_status: Arc<JobStatusRefresher>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            task_repo,
            manager_repo,
            job_status,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    fn classify(
        &self,
        task: &Task,
        managers: &HashMap<i64, Manager>,
        now: DateTime<Utc>,
    ) -> Option<OrphanReason> {
        let last_activity = task.last_activity_at.unwrap_or(task.updated_at);
        let idle = now - last_activity;
        if idle > self.config.orphan_timeout {
            return Some(OrphanReason::Stale {
                idle_seconds: idle.num_seconds(),
            });
        }

        let manager = managers.get(&task.manager_id?)?;
        if manager.status != ManagerStatus::Offline {
            return None;
        }
        let unseen_for_long = match manager.last_seen {
            Some(seen) => now - seen > self.config.offline_grace,
            None => true,
        };
        unseen_for_long.then_some(OrphanReason::HolderOffline {
            manager_id: manager.id,
        })
    }

    pub async fn find_orphans(&self, now: DateTime<Utc>) -> FarmResult<Vec<(Task, OrphanReason)>> {
        let processing = self.task_repo.list_processing().await?;
        if processing.is_empty() {
            return Ok(Vec::new());
        }

        let managers: HashMap<i64, Manager> = self
            .manager_repo
            .list()
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        Ok(processing
            .into_iter()
            .filter_map(|task| {
                let reason = self.classify(&task, &managers, now)?;
                Some((task, reason))
            })
            .collect())
    }

    /// 扫描一轮并重新排队，返回被恢复的任务ID
    pub async fn recover_orphans(&self) -> FarmResult<Vec<i64>> {
        let mut recovered = Vec::new();

        for (task, reason) in self.find_orphans(Utc::now()).await? {
            if !self.requeue(&task, &reason).await? {
                continue;
            }
            if let Err(e) = self.job_status.refresh(task.job_id).await {
                warn!("刷新作业 {} 状态失败: {}", task.job_id, e);
            }
            recovered.push(task.id);
        }

        Ok(recovered)
    }

    /// 把扫描时看到的孤儿任务放回队列
    ///
    /// 前置条件是扫描时的状态、持有者和最后活动时间都未变；扫描之后
    /// 只要有一次上报，返回 false 且任务保持原样。
    pub async fn requeue(&self, task: &Task, reason: &OrphanReason) -> FarmResult<bool> {
        let update = TaskUpdate::status(TaskStatus::Queued)
            .with_log(format!("任务重新排队: {reason}\n"))
            .clearing_assignment()
            .held_by(task.worker.clone())
            .unchanged_since(task.last_activity_at);

        let requeued = self
            .task_repo
            .update_if_status(task.id, TaskStatus::Processing, &update)
            .await?;
        if requeued {
            warn!("孤儿任务 {} ({}) 重新排队: {}", task.id, task.name, reason);
        } else {
            debug!("任务 {} 在扫描后有新的上报，跳过重新排队", task.id);
        }
        Ok(requeued)
    }

    pub async fn start(&self) -> FarmResult<()> {
        *self.running.write().await = true;
        info!("启动孤儿任务恢复，扫描间隔 {:?}", self.config.scan_interval);

        loop {
            if !*self.running.read().await {
                info!("孤儿任务恢复已停止");
                break;
            }

            match self.recover_orphans().await {
                Ok(recovered) if !recovered.is_empty() => {
                    info!("本轮恢复了 {} 个孤儿任务", recovered.len());
                }
                Ok(_) => {}
                Err(e) => error!("孤儿任务扫描时出错: {}", e),
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}
