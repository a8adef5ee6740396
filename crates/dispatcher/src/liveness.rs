use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use renderfarm_core::{
    models::{Manager, Reachability},
    traits::ManagerRepository,
    FarmError, FarmResult,
};

/// 存活探测接口
///
/// 探测失败不是错误，结果以 `Reachability` 表示。
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, manager: &Manager) -> Reachability;
}

/// 通过 HTTP 访问Manager状态端点的探测器
///
/// 响应为 2xx 且正文是带 `status` 字段（不等于 `error`）的 JSON 时视为可达。
pub struct HttpLivenessProbe {
    client: reqwest::Client,
}

impl HttpLivenessProbe {
    pub fn new(timeout: Duration) -> FarmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| FarmError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn probe(&self, manager: &Manager) -> Reachability {
        let url = manager.probe_url();
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Reachability::Unreachable(format!("探测超时: {url}"));
            }
            Err(e) => return Reachability::Unreachable(format!("连接失败: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            return Reachability::Unreachable(format!("HTTP {status}"));
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return Reachability::Unreachable(format!("响应不是有效的JSON: {e}")),
        };

        match body.get("status").and_then(|s| s.as_str()) {
            None => Reachability::Unreachable("响应缺少status字段".to_string()),
            Some("error") => Reachability::Unreachable("Manager报告错误状态".to_string()),
            Some(_) => Reachability::Reachable,
        }
    }
}

/// 存活监控
///
/// 独立于派发路径，按固定间隔并发探测所有已注册的Manager。
pub struct LivenessMonitor {
    manager_repo: Arc<dyn ManagerRepository>,
    probe: Arc<dyn LivenessProbe>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl LivenessMonitor {
    pub fn new(
        manager_repo: Arc<dyn ManagerRepository>,
        probe: Arc<dyn LivenessProbe>,
        interval: Duration,
    ) -> Self {
        Self {
            manager_repo,
            probe,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 探测一轮并记录结果
    pub async fn check_all(&self) -> FarmResult<Vec<(i64, Reachability)>> {
        let managers = self.manager_repo.list().await?;
        if managers.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(managers.iter().map(|m| self.probe.probe(m))).await;
        let checked_at = Utc::now();

        let mut outcomes = Vec::with_capacity(managers.len());
        for (manager, reachability) in managers.iter().zip(results) {
            let status = reachability.status();
            if status != manager.status {
                match &reachability {
                    Reachability::Reachable => info!("Manager {} 恢复在线", manager.name),
                    Reachability::Unreachable(reason) => {
                        warn!("Manager {} 不可达: {}", manager.name, reason)
                    }
                }
            }

            if let Err(e) = self
                .manager_repo
                .record_probe(manager.id, status, reachability.reason(), checked_at)
                .await
            {
                error!("记录Manager {} 探测结果失败: {}", manager.id, e);
            }
            outcomes.push((manager.id, reachability));
        }

        debug!("完成 {} 个Manager的存活探测", outcomes.len());
        Ok(outcomes)
    }

    pub async fn start(&self) -> FarmResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("存活监控已在运行");
                return Ok(());
            }
            *running = true;
        }

        info!("启动Manager存活监控，间隔 {:?}", self.interval);
        loop {
            if !*self.running.read().await {
                info!("存活监控已停止");
                break;
            }

            if let Err(e) = self.check_all().await {
                error!("存活探测时出错: {}", e);
            }

            tokio::time::sleep(self.interval).await;
        }
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
