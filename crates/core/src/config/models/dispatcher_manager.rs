use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 领取冲突后重新查询候选的最大轮数
    pub claim_retry_limit: u32,
    /// 每轮查询的候选任务数量
    pub candidate_batch_size: u32,
    /// 被标记为离线的Manager轮询时不派发任务
    pub skip_offline_managers: bool,
    pub liveness_interval_seconds: u64,
    pub probe_timeout_ms: u64,
    /// processing 任务无活动超过该时长视为孤儿任务
    pub orphan_timeout_seconds: i64,
    pub orphan_scan_interval_seconds: u64,
    /// 持有者离线超过该时长后，其任务重新排队
    pub manager_offline_grace_seconds: i64,
    /// 失败任务数达到该阈值时作业判定为失败
    pub job_failure_threshold: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            claim_retry_limit: 5,
            candidate_batch_size: 8,
            skip_offline_managers: true,
            liveness_interval_seconds: 30,
            probe_timeout_ms: 500,
            orphan_timeout_seconds: 600,
            orphan_scan_interval_seconds: 60,
            manager_offline_grace_seconds: 120,
            job_failure_threshold: 1,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.claim_retry_limit == 0 {
            return Err(anyhow::anyhow!("领取重试次数必须大于0"));
        }

        if self.candidate_batch_size == 0 {
            return Err(anyhow::anyhow!("候选任务批量大小必须大于0"));
        }

        if self.liveness_interval_seconds == 0 {
            return Err(anyhow::anyhow!("存活探测间隔必须大于0"));
        }

        if self.probe_timeout_ms == 0 || self.probe_timeout_ms > 10_000 {
            return Err(anyhow::anyhow!(
                "探测超时时间必须在1-10000毫秒之间: {}",
                self.probe_timeout_ms
            ));
        }

        if self.orphan_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("孤儿任务超时时间必须大于0"));
        }

        if self.orphan_scan_interval_seconds == 0 {
            return Err(anyhow::anyhow!("孤儿任务扫描间隔必须大于0"));
        }

        if self.manager_offline_grace_seconds < 0 {
            return Err(anyhow::anyhow!("Manager离线宽限时间不能为负数"));
        }

        if self.job_failure_threshold == 0 {
            return Err(anyhow::anyhow!("作业失败阈值必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub enabled: bool,
    /// 为空时使用主机名
    pub name: String,
    pub server_url: String,
    /// 服务器探测本Manager时使用的地址
    pub advertise_host: String,
    /// 状态端点监听地址
    pub bind_address: String,
    pub worker_slots: u32,
    pub virtual_workers: bool,
    /// 轮询时的作业类型过滤
    pub job_types: Option<String>,
    pub poll_interval_seconds: u64,
    pub poll_jitter_ms: u64,
    pub progress_report_interval_ms: u64,
    pub storage_dir: String,
    pub output_dir: String,
    pub render_command: String,
    pub thumbnail_size: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: String::new(),
            server_url: "http://127.0.0.1:8080".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            bind_address: "0.0.0.0:7777".to_string(),
            worker_slots: 1,
            virtual_workers: false,
            job_types: None,
            poll_interval_seconds: 5,
            poll_jitter_ms: 500,
            progress_report_interval_ms: 2000,
            storage_dir: "storage".to_string(),
            output_dir: "output".to_string(),
            render_command: "blender".to_string(),
            thumbnail_size: 200,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(anyhow::anyhow!("服务器地址格式无效: {}", self.server_url));
        }

        if self.advertise_host.is_empty() {
            return Err(anyhow::anyhow!("对外地址不能为空"));
        }

        if self.listen_port().is_none() {
            return Err(anyhow::anyhow!(
                "绑定地址格式无效，应为 host:port: {}",
                self.bind_address
            ));
        }

        if self.worker_slots == 0 {
            return Err(anyhow::anyhow!("Worker槽位数必须大于0"));
        }

        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.progress_report_interval_ms == 0 {
            return Err(anyhow::anyhow!("进度上报间隔必须大于0"));
        }

        if self.storage_dir.is_empty() || self.output_dir.is_empty() {
            return Err(anyhow::anyhow!("存储目录和输出目录不能为空"));
        }

        if self.render_command.is_empty() {
            return Err(anyhow::anyhow!("渲染命令不能为空"));
        }

        Ok(())
    }

    /// 状态端点端口
    pub fn listen_port(&self) -> Option<u16> {
        self.bind_address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }
}
