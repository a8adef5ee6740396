//! # Renderfarm Testing Utils
//!
//! 工作区内共享的测试工具：
//!
//! - **内存仓储**：`MockFarmStore` 同时实现作业、任务与Manager仓储接口
//! - **数据构造器**：作业、任务与Manager的测试数据
//! - **异步辅助**：条件等待与本地端口
//!
//! ```toml
//! [dev-dependencies]
//! renderfarm-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
