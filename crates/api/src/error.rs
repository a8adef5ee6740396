use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use renderfarm_core::FarmError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Farm(#[from] FarmError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Farm(e) if e.is_settings_error() => StatusCode::BAD_REQUEST,
            ApiError::Farm(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Farm(FarmError::InvalidTransition { .. })
            | ApiError::Farm(FarmError::NotTaskHolder { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Farm(FarmError::Serialization(_)) => StatusCode::BAD_REQUEST,
            ApiError::Farm(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Farm(FarmError::MissingSetting { .. }) => "MISSING_SETTING",
            ApiError::Farm(FarmError::InvalidSetting { .. }) => "INVALID_SETTING",
            ApiError::Farm(FarmError::UnknownJobType(_)) => "UNKNOWN_JOB_TYPE",
            ApiError::Farm(FarmError::UnknownTaskType(_)) => "UNKNOWN_TASK_TYPE",
            ApiError::Farm(FarmError::InvalidTransition { .. }) => "INVALID_TRANSITION",
            ApiError::Farm(FarmError::NotTaskHolder { .. }) => "NOT_TASK_HOLDER",
            ApiError::Farm(FarmError::JobNotFound { .. }) => "JOB_NOT_FOUND",
            ApiError::Farm(FarmError::TaskNotFound { .. }) => "TASK_NOT_FOUND",
            ApiError::Farm(FarmError::ManagerNotFound { .. }) => "MANAGER_NOT_FOUND",
            ApiError::Farm(FarmError::Serialization(_)) => "SERIALIZATION_ERROR",
            ApiError::Farm(_) => "INTERNAL_ERROR",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.error_type(),
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use renderfarm_core::models::TaskStatus;

    #[test]
    fn test_settings_errors_are_bad_request() {
        let error: ApiError = FarmError::missing_setting("frames").into();
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);

        let error: ApiError = FarmError::UnknownJobType("maya".to_string()).into();
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_transition_is_unprocessable() {
        let error: ApiError = FarmError::InvalidTransition {
            id: 1,
            from: TaskStatus::Completed,
            to: TaskStatus::Processing,
        }
        .into();
        assert_eq!(error.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let error: ApiError = FarmError::NotTaskHolder {
            id: 1,
            worker: "node-a-0".to_string(),
        }
        .into();
        assert_eq!(error.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_not_found_and_internal() {
        let error: ApiError = FarmError::TaskNotFound { id: 3 }.into();
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);

        let error: ApiError = FarmError::Internal("boom".to_string()).into();
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
