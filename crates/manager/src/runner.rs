use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use renderfarm_core::{
    models::{Task, TaskActivity, TaskStatus, TaskStatusReport},
    FarmError, FarmResult,
};
use renderfarm_domain::{CompiledCommand, RenderOutputParser, ThumbnailGenerator};

use crate::server_client::{ReportOutcome, ServerClient};

/// 一次任务执行的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { exit_code: Option<i32> },
    /// 服务器拒绝了上报，进程已被终止
    Revoked,
}

/// 执行编译后的命令并上报进度
pub struct TaskRunner {
    client: Arc<ServerClient>,
    thumbnails: Arc<dyn ThumbnailGenerator>,
    report_interval: Duration,
}

impl TaskRunner {
    pub fn new(
        client: Arc<ServerClient>,
        thumbnails: Arc<dyn ThumbnailGenerator>,
        report_interval: Duration,
    ) -> Self {
        Self {
            client,
            thumbnails,
            report_interval,
        }
    }

    /// 执行任务直到进程退出或任务被撤销
    ///
    /// 标准输出逐行交给输出解析器，标准错误只写入日志。每个上报周期发送一次
    /// processing 上报，附带新增的日志与最新进度快照。缩略图在阻塞线程池中生成。
    /// 全部上报都带上任务的持有者名称。
    pub async fn run(&self, task: &Task, command: &CompiledCommand) -> FarmResult<RunOutcome> {
        let mut child = match spawn(command) {
            Ok(child) => child,
            Err(e) => {
                warn!("任务 {} 启动失败: {}", task.id, e);
                let report = TaskStatusReport::new(TaskStatus::Failed).with_log(format!("{e}\n"));
                return self.finish(task, report, RunOutcome::Failed { exit_code: None }).await;
            }
        };
        info!("任务 {} 开始执行: {}", task.id, command.argv.join(" "));

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FarmError::TaskExecution("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FarmError::TaskExecution("无法获取stderr".to_string()))?;
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();

        let mut parser = RenderOutputParser::new(task.id, self.thumbnails.as_ref());
        let mut pending_log = String::new();
        let mut ticker = tokio::time::interval(self.report_interval);
        ticker.tick().await;

        let (mut stdout_open, mut stderr_open) = (true, true);
        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => {
                        let outcome = parser.parse_line(&line);
                        if let Some(saved) = outcome.saved {
                            parser.record_thumbnail(self.thumbnail(saved, task.id).await);
                        }
                        pending_log.push_str(&line);
                        pending_log.push('\n');
                        if let Some(warning) = outcome.warning {
                            warn!("任务 {} 缺失资源: {}", task.id, warning);
                            pending_log.push_str(&format!("警告: {warning}\n"));
                        }
                    }
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!("读取任务 {} 标准输出失败: {}", task.id, e);
                        stdout_open = false;
                    }
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        pending_log.push_str(&line);
                        pending_log.push('\n');
                    }
                    _ => stderr_open = false,
                },
                _ = ticker.tick() => {
                    if self.send_progress(task, parser.activity(), &mut pending_log).await {
                        terminate(&mut child, task.id).await;
                        return Ok(RunOutcome::Revoked);
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| FarmError::TaskExecution(format!("等待进程结束失败: {e}")))?;
        let activity = parser.into_activity();

        let (report_status, outcome) = if status.success() {
            (TaskStatus::Completed, RunOutcome::Completed)
        } else {
            (
                TaskStatus::Failed,
                RunOutcome::Failed {
                    exit_code: status.code(),
                },
            )
        };
        pending_log.push_str(&format!("进程退出，退出码: {:?}\n", status.code()));

        let report = TaskStatusReport::new(report_status)
            .with_log(pending_log)
            .with_activity(activity);
        self.finish(task, report, outcome).await
    }

    async fn thumbnail(&self, source: PathBuf, task_id: i64) -> FarmResult<PathBuf> {
        let thumbnails = self.thumbnails.clone();
        tokio::task::spawn_blocking(move || thumbnails.generate(&source, task_id))
            .await
            .map_err(|e| FarmError::TaskExecution(format!("缩略图任务异常退出: {e}")))?
    }

    /// 返回 true 表示任务已被服务器撤销
    async fn send_progress(
        &self,
        task: &Task,
        activity: &TaskActivity,
        pending_log: &mut String,
    ) -> bool {
        let task_id = task.id;
        let mut report = TaskStatusReport::new(TaskStatus::Processing)
            .with_activity(activity.clone())
            .from_worker(task.worker.clone());
        if !pending_log.is_empty() {
            report = report.with_log(pending_log.clone());
        }

        match self.client.report(task_id, &report).await {
            Ok(ReportOutcome::Accepted) => {
                pending_log.clear();
                debug!("任务 {} 进度已上报", task_id);
                false
            }
            Ok(ReportOutcome::Rejected(status)) => {
                info!("任务 {} 已被服务器撤销 (HTTP {})，终止进程", task_id, status);
                true
            }
            Err(e) => {
                // 日志保留到下一次上报
                warn!("任务 {} 进度上报失败: {}", task_id, e);
                false
            }
        }
    }

    async fn finish(
        &self,
        task: &Task,
        report: TaskStatusReport,
        outcome: RunOutcome,
    ) -> FarmResult<RunOutcome> {
        let task_id = task.id;
        let report = report.from_worker(task.worker.clone());
        match self.client.report(task_id, &report).await? {
            ReportOutcome::Accepted => {
                info!("任务 {} 执行结束: {}", task_id, report.status);
                Ok(outcome)
            }
            ReportOutcome::Rejected(_) => Ok(RunOutcome::Revoked),
        }
    }
}

fn spawn(command: &CompiledCommand) -> FarmResult<Child> {
    let Some((program, args)) = command.argv.split_first() else {
        return Err(FarmError::TaskExecution("编译后的命令为空".to_string()));
    };
    if command.foreground {
        debug!("{} 需要图形界面环境", program);
    }

    Command::new(program)
        .args(args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FarmError::TaskExecution(format!("启动命令 {program} 失败: {e}")))
}

async fn terminate(child: &mut Child, task_id: i64) {
    if let Err(e) = child.kill().await {
        warn!("终止任务 {} 的进程失败: {}", task_id, e);
    }
}
