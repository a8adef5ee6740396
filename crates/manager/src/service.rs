use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use renderfarm_core::{
    config::ManagerConfig,
    models::{ManagerCapacity, ManagerRegistration, Task, TaskStatus, TaskStatusReport},
    FarmError, FarmResult,
};
use renderfarm_domain::{
    resolve_placeholders, Platform, PlaceholderValues, TaskCompilerRegistry, ThumbnailGenerator,
};

use crate::runner::{RunOutcome, TaskRunner};
use crate::server_client::ServerClient;
use crate::status_endpoint::{status_router, SlotUsage};
use crate::storage::JobStorage;
use crate::thumbnail::ImageMagickThumbnailer;

const SERVER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 配置未指定名称时使用主机名
pub fn resolve_name(configured: &str) -> String {
    if !configured.trim().is_empty() {
        return configured.to_string();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "renderfarm-manager".to_string())
}

/// Manager服务
///
/// 启动后先向服务器注册，然后为每个Worker槽位运行一个独立的轮询循环。
/// 关闭信号通过 broadcast 发给状态端点和全部轮询循环。
pub struct ManagerService {
    config: ManagerConfig,
    name: String,
    client: Arc<ServerClient>,
    compilers: Arc<TaskCompilerRegistry>,
    storage: JobStorage,
    runner: TaskRunner,
    usage: SlotUsage,
    platform: Platform,
}

impl ManagerService {
    pub fn new(
        config: ManagerConfig,
        compilers: Arc<TaskCompilerRegistry>,
        thumbnails: Arc<dyn ThumbnailGenerator>,
    ) -> FarmResult<Self> {
        let name = resolve_name(&config.name);
        let client = Arc::new(ServerClient::new(&config.server_url, SERVER_REQUEST_TIMEOUT)?);
        let runner = TaskRunner::new(
            client.clone(),
            thumbnails,
            Duration::from_millis(config.progress_report_interval_ms),
        );
        let usage = SlotUsage::new(name.as_str(), config.worker_slots);

        Ok(Self {
            storage: JobStorage::new(&config.storage_dir),
            name,
            client,
            compilers,
            runner,
            usage,
            platform: Platform::current(),
            config,
        })
    }

    /// 使用 ImageMagick 缩略图与默认命令编译器
    pub fn from_config(config: ManagerConfig) -> FarmResult<Self> {
        let thumbnails = Arc::new(ImageMagickThumbnailer::new(
            &config.storage_dir,
            config.thumbnail_size,
        ));
        Self::new(config, Arc::new(TaskCompilerRegistry::with_defaults()), thumbnails)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> &SlotUsage {
        &self.usage
    }

    pub fn registration(&self) -> FarmResult<ManagerRegistration> {
        let port = self.config.listen_port().ok_or_else(|| {
            FarmError::Configuration(format!("绑定地址格式无效: {}", self.config.bind_address))
        })?;
        let capacity = if self.config.virtual_workers {
            ManagerCapacity::Virtual
        } else {
            ManagerCapacity::Fixed(self.config.worker_slots)
        };

        Ok(ManagerRegistration {
            name: self.name.clone(),
            host: self.config.advertise_host.clone(),
            port,
            capacity,
        })
    }

    /// 运行直到收到关闭信号
    pub async fn start(self: Arc<Self>, shutdown: broadcast::Sender<()>) -> FarmResult<()> {
        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|e| {
                FarmError::Network(format!("绑定状态端点 {} 失败: {e}", self.config.bind_address))
            })?;
        info!("Manager {} 状态端点监听 {}", self.name, self.config.bind_address);

        let router = status_router(self.usage.clone());
        let mut endpoint_shutdown = shutdown.subscribe();
        let endpoint = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = endpoint_shutdown.recv().await;
                })
                .await
        });

        let Some(manager_id) = self.register_until_ready(shutdown.subscribe()).await? else {
            info!("注册完成前收到关闭信号");
            return Ok(());
        };

        let slots = (0..self.config.worker_slots).map(|slot| {
            let service = self.clone();
            let shutdown = shutdown.subscribe();
            tokio::spawn(async move { service.run_slot(slot, manager_id, shutdown).await })
        });
        for result in join_all(slots).await {
            if let Err(e) = result {
                error!("轮询循环异常退出: {}", e);
            }
        }

        match endpoint.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("状态端点出错: {}", e),
            Err(e) => error!("状态端点任务异常退出: {}", e),
        }
        info!("Manager {} 已停止", self.name);
        Ok(())
    }

    async fn register_until_ready(
        &self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> FarmResult<Option<i64>> {
        let registration = self.registration()?;
        loop {
            match self.client.register(&registration).await {
                Ok(manager) => return Ok(Some(manager.id)),
                Err(e) => warn!("向 {} 注册失败，稍后重试: {}", self.client.base_url(), e),
            }

            tokio::select! {
                _ = shutdown.recv() => return Ok(None),
                _ = tokio::time::sleep(self.poll_delay()) => {}
            }
        }
    }

    async fn run_slot(&self, slot: u32, manager_id: i64, mut shutdown: broadcast::Receiver<()>) {
        let worker = format!("{}-{}", self.name, slot);
        info!("Worker槽位 {} 开始轮询", worker);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                worked = self.work_once(manager_id, &worker) => {
                    if worked {
                        continue;
                    }
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.poll_delay()) => {}
                    }
                }
            }
        }
        info!("Worker槽位 {} 已停止", worker);
    }

    /// 轮询并执行一个任务，没有拿到任务时返回 false
    pub async fn work_once(&self, manager_id: i64, worker: &str) -> bool {
        let task = match self
            .client
            .poll(manager_id, worker, self.config.job_types.as_deref())
            .await
        {
            Ok(Some(task)) => task,
            Ok(None) => return false,
            Err(e) => {
                warn!("{} 轮询任务失败: {}", worker, e);
                return false;
            }
        };

        info!("{} 领取任务 {} ({})", worker, task.id, task.name);
        let _slot = self.usage.occupy();
        match self.execute(&task).await {
            Ok(outcome) => debug!("任务 {} 结果: {:?}", task.id, outcome),
            Err(e) => error!("执行任务 {} 时出错: {}", task.id, e),
        }
        true
    }

    async fn execute(&self, task: &Task) -> FarmResult<RunOutcome> {
        let job_dir = self.storage.ensure_job_dir(task.job_id)?;
        let mut sink = self.storage.clone();
        let compiled = match self.compilers.compile(task, self.platform, &mut sink) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!("任务 {} 编译失败: {}", task.id, e);
                let report = TaskStatusReport::new(TaskStatus::Failed)
                    .with_log(format!("命令编译失败: {e}\n"))
                    .from_worker(task.worker.clone());
                self.client.report(task.id, &report).await?;
                return Ok(RunOutcome::Failed { exit_code: None });
            }
        };

        let command = resolve_placeholders(
            &compiled,
            &PlaceholderValues {
                job_path: job_dir.display().to_string(),
                output_path: self.config.output_dir.clone(),
                command: self.config.render_command.clone(),
            },
        );
        self.runner.run(task, &command).await
    }

    fn poll_delay(&self) -> Duration {
        let jitter = if self.config.poll_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.config.poll_jitter_ms)
        };
        Duration::from_secs(self.config.poll_interval_seconds) + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ManagerConfig {
        ManagerConfig {
            name: "node-a".to_string(),
            advertise_host: "10.0.0.5".to_string(),
            bind_address: "0.0.0.0:7788".to_string(),
            worker_slots: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_registration_advertises_fixed_capacity() {
        let service = ManagerService::from_config(config()).unwrap();
        let registration = service.registration().unwrap();
        assert_eq!(registration.name, "node-a");
        assert_eq!(registration.host, "10.0.0.5");
        assert_eq!(registration.port, 7788);
        assert_eq!(registration.capacity, ManagerCapacity::Fixed(3));
    }

    #[test]
    fn test_virtual_workers() {
        let service = ManagerService::from_config(ManagerConfig {
            virtual_workers: true,
            ..config()
        })
        .unwrap();
        assert!(service.registration().unwrap().capacity.is_virtual());
    }

    #[test]
    fn test_empty_name_falls_back_to_hostname() {
        assert_eq!(resolve_name("render-07"), "render-07");
        assert!(!resolve_name("  ").trim().is_empty());
    }

    #[test]
    fn test_poll_delay_stays_within_jitter() {
        let service = ManagerService::from_config(ManagerConfig {
            poll_interval_seconds: 1,
            poll_jitter_ms: 200,
            ..config()
        })
        .unwrap();
        for _ in 0..20 {
            let delay = service.poll_delay();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1200));
        }
    }
}
