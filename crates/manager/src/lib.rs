//! 渲染农场 Manager
//!
//! 运行在渲染节点上的代理：向服务器注册自己，按Worker槽位并发轮询任务，
//! 把任务编译为本地命令并执行，解析渲染输出后周期性上报进度。

pub mod runner;
pub mod server_client;
pub mod service;
pub mod status_endpoint;
pub mod storage;
pub mod thumbnail;

pub use runner::{RunOutcome, TaskRunner};
pub use server_client::{ReportOutcome, ServerClient};
pub use service::ManagerService;
pub use status_endpoint::{status_router, SlotUsage};
pub use storage::JobStorage;
pub use thumbnail::ImageMagickThumbnailer;
