//! # Renderfarm API
//!
//! 渲染农场服务器的 HTTP 接口，基于 Axum 构建。
//!
//! ## API 端点
//!
//! ### 作业
//! - `POST /api/jobs` - 提交作业，返回作业及分解出的任务
//! - `GET /api/jobs` - 作业列表
//! - `GET /api/jobs/{id}` - 作业详情
//! - `DELETE /api/jobs/{id}` - 删除作业，返回被中止的任务ID
//! - `POST /api/jobs/{id}/cancel` - 取消作业
//!
//! ### 任务
//! - `GET /api/tasks?manager_id=&worker=&job_type=` - 轮询下一个任务，无任务时 404
//! - `GET /api/tasks/{id}` - 任务详情
//! - `PATCH /api/tasks/{id}` - 上报状态，有效转换返回 204，无效转换返回 422
//!
//! ### Manager
//! - `POST /api/managers` - 注册Manager
//! - `GET /api/managers` - Manager列表
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "success": true,
//!   "data": { "id": 1 },
//!   "message": null,
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! 轮询端点直接返回任务文档。错误统一为 `{"error": {message, type, code, timestamp}}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, timeout_layer, trace_layer};
use renderfarm_core::config::ApiConfig;

pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let app = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(timeout_layer(api_config.request_timeout_seconds))
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        app.layer(cors_layer())
    } else {
        app
    }
}
