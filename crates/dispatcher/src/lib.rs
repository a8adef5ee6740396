//! 调度核心：任务派发、作业管理、状态上报、存活监控与孤儿任务恢复

pub mod job_service;
pub mod job_status;
pub mod liveness;
pub mod recovery;
pub mod scheduler;
pub mod status_service;

mod transitions;

pub use job_service::JobService;
pub use job_status::JobStatusRefresher;
pub use liveness::{HttpLivenessProbe, LivenessMonitor, LivenessProbe};
pub use recovery::{OrphanReason, OrphanTaskRecovery, RecoveryConfig};
pub use scheduler::{PollRequest, TaskDispatchService, TaskScheduler};
pub use status_service::TaskStatusService;
