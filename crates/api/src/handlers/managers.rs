use axum::{extract::State, response::IntoResponse, Json};
use renderfarm_core::models::ManagerRegistration;
use renderfarm_core::traits::ManagerRepository;
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// 注册Manager，按 (host, port) 去重
pub async fn register_manager(
    State(state): State<AppState>,
    Json(registration): Json<ManagerRegistration>,
) -> ApiResult<impl IntoResponse> {
    if registration.name.trim().is_empty() || registration.host.trim().is_empty() {
        return Err(ApiError::BadRequest("Manager名称和地址不能为空".to_string()));
    }

    let manager = state.managers.upsert(&registration).await?;
    info!(
        "Manager {} 已注册: {}:{} (ID: {})",
        manager.name, manager.host, manager.port, manager.id
    );
    Ok(success(manager))
}

pub async fn list_managers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.managers.list().await?))
}
