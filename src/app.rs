use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use renderfarm_api::{create_app, AppState};
use renderfarm_core::AppConfig;
use renderfarm_dispatcher::{
    HttpLivenessProbe, JobStatusRefresher, LivenessMonitor, OrphanTaskRecovery, RecoveryConfig,
};
use renderfarm_domain::{JobCompilerRegistry, JobStatusPolicy};
use renderfarm_infrastructure::DatabaseManager;
use renderfarm_manager::ManagerService;

use crate::shutdown::ShutdownManager;

const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 服务器：HTTP API、任务派发、存活监控与孤儿任务恢复
    Server,
    /// 渲染节点上的 Manager
    Manager,
    /// 同一进程中运行服务器与 Manager
    All,
}

impl AppMode {
    pub fn parse(mode: &str, config: &AppConfig) -> Result<Self> {
        match mode {
            "server" => {
                if !config.api.enabled {
                    return Err(anyhow::anyhow!("API被禁用，无法以server模式运行"));
                }
                Ok(AppMode::Server)
            }
            "manager" => {
                if !config.manager.enabled {
                    return Err(anyhow::anyhow!("Manager模式被禁用，请检查配置"));
                }
                Ok(AppMode::Manager)
            }
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }

    fn runs_server(&self) -> bool {
        matches!(self, AppMode::Server | AppMode::All)
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        Self { config, mode }
    }

    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let run_manager = match self.mode {
            AppMode::Manager => true,
            AppMode::All => self.config.manager.enabled,
            AppMode::Server => false,
        };

        match (self.mode.runs_server(), run_manager) {
            (true, true) => {
                tokio::try_join!(self.run_server(&shutdown), self.run_manager(&shutdown))?;
            }
            (true, false) => self.run_server(&shutdown).await?,
            (false, _) => self.run_manager(&shutdown).await?,
        }

        info!("应用程序已停止");
        Ok(())
    }

    async fn run_server(&self, shutdown: &ShutdownManager) -> Result<()> {
        info!("启动渲染农场服务器");

        let database = DatabaseManager::connect_and_migrate(&self.config.database)
            .await
            .context("初始化数据库失败")?;
        let job_repo = database.job_repository();
        let task_repo = database.task_repository();
        let manager_repo = database.manager_repository();
        let dispatcher = &self.config.dispatcher;

        let state = AppState::assemble(
            job_repo.clone(),
            task_repo.clone(),
            manager_repo.clone(),
            Arc::new(JobCompilerRegistry::with_defaults()),
            dispatcher,
        );

        let probe = Arc::new(
            HttpLivenessProbe::new(Duration::from_millis(dispatcher.probe_timeout_ms))
                .context("创建存活探测器失败")?,
        );
        let liveness = Arc::new(LivenessMonitor::new(
            manager_repo.clone(),
            probe,
            Duration::from_secs(dispatcher.liveness_interval_seconds),
        ));
        let refresher = Arc::new(JobStatusRefresher::new(
            job_repo,
            task_repo.clone(),
            JobStatusPolicy::new(dispatcher.job_failure_threshold as usize),
        ));
        let recovery = Arc::new(OrphanTaskRecovery::new(
            task_repo,
            manager_repo,
            refresher,
            RecoveryConfig::from(dispatcher),
        ));

        let liveness_handle = spawn_loop("存活监控", {
            let liveness = liveness.clone();
            async move { liveness.start().await }
        });
        let recovery_handle = spawn_loop("孤儿任务恢复", {
            let recovery = recovery.clone();
            async move { recovery.start().await }
        });

        let app = create_app(state, &self.config.api);
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("HTTP API 监听 {}", self.config.api.bind_address);

        let mut shutdown_rx = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("HTTP API 收到关闭信号");
            })
            .await
            .context("HTTP API 运行失败")?;

        liveness.stop().await;
        recovery.stop().await;
        for (name, handle) in [("存活监控", liveness_handle), ("孤儿任务恢复", recovery_handle)] {
            if tokio::time::timeout(BACKGROUND_STOP_TIMEOUT, handle).await.is_err() {
                warn!("{} 未能在超时前停止", name);
            }
        }

        database.close().await;
        info!("渲染农场服务器已停止");
        Ok(())
    }

    async fn run_manager(&self, shutdown: &ShutdownManager) -> Result<()> {
        self.config
            .manager
            .validate()
            .context("Manager配置验证失败")?;

        let service = Arc::new(
            ManagerService::from_config(self.config.manager.clone())
                .context("创建Manager服务失败")?,
        );
        info!("启动Manager: {}", service.name());
        service
            .start(shutdown.sender())
            .await
            .context("Manager运行失败")
    }
}

fn spawn_loop<F>(name: &'static str, future: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = renderfarm_core::FarmResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = future.await {
            error!("{} 异常退出: {}", name, e);
        }
    })
}
