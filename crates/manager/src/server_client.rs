use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use renderfarm_core::{
    models::{Manager, ManagerRegistration, Task, TaskStatusReport},
    FarmError, FarmResult,
};

/// 服务器对状态上报的答复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Accepted,
    /// 任务已被取消、中止、重新排队或删除，应停止执行
    Rejected(StatusCode),
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// 服务器HTTP客户端
pub struct ServerClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl ServerClient {
    pub fn new(server_url: &str, timeout: Duration) -> FarmResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FarmError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            base_url: server_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register(&self, registration: &ManagerRegistration) -> FarmResult<Manager> {
        let url = format!("{}/api/managers", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(registration)
            .send()
            .await
            .map_err(|e| FarmError::Network(format!("连接服务器失败: {e}")))?;

        let manager: Manager = Self::unwrap_envelope(response).await?;
        info!(
            "已向服务器注册: {} (ID: {}, {}:{})",
            manager.name, manager.id, manager.host, manager.port
        );
        Ok(manager)
    }

    /// 轮询下一个任务，服务器返回 404 表示当前没有可执行任务
    pub async fn poll(
        &self,
        manager_id: i64,
        worker: &str,
        job_type: Option<&str>,
    ) -> FarmResult<Option<Task>> {
        let url = format!("{}/api/tasks", self.base_url);
        let mut query = vec![
            ("manager_id", manager_id.to_string()),
            ("worker", worker.to_string()),
        ];
        if let Some(job_type) = job_type {
            query.push(("job_type", job_type.to_string()));
        }

        let response = self
            .http_client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| FarmError::Network(format!("轮询任务失败: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("{} 没有可执行的任务", worker);
                Ok(None)
            }
            status if status.is_success() => {
                let task = response
                    .json::<Task>()
                    .await
                    .map_err(|e| FarmError::Serialization(format!("解析任务失败: {e}")))?;
                Ok(Some(task))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(FarmError::Network(format!("轮询任务失败: HTTP {status} - {body}")))
            }
        }
    }

    pub async fn report(
        &self,
        task_id: i64,
        report: &TaskStatusReport,
    ) -> FarmResult<ReportOutcome> {
        let url = format!("{}/api/tasks/{}", self.base_url, task_id);
        let response = self
            .http_client
            .patch(&url)
            .json(report)
            .send()
            .await
            .map_err(|e| FarmError::Network(format!("上报任务 {task_id} 状态失败: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(ReportOutcome::Accepted),
            status @ (StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY) => {
                warn!("服务器拒绝了任务 {} 的状态上报: HTTP {}", task_id, status);
                Ok(ReportOutcome::Rejected(status))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(FarmError::Network(format!(
                    "上报任务 {task_id} 状态失败: HTTP {status} - {body}"
                )))
            }
        }
    }

    async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response) -> FarmResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FarmError::Network(format!("HTTP {status} - {body}")));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| FarmError::Serialization(format!("解析服务器响应失败: {e}")))?;
        envelope
            .data
            .ok_or_else(|| FarmError::Serialization("服务器响应缺少data字段".to_string()))
    }
}
