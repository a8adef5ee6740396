pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::models::AppConfig;
pub use errors::*;
pub use models::{
    Job, JobStatus, Manager, ManagerCapacity, ManagerStatus, Reachability, Task, TaskActivity,
    TaskDraft, TaskStatus,
};

/// 统一的Result类型
pub type FarmResult<T> = std::result::Result<T, FarmError>;
