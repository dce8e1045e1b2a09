use axum::http::StatusCode;
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum GhostError {
    #[error("content must not be empty")]
    EmptyContent,

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("content exceeds maximum length")]
    ContentTooLong,

    #[error("invalid memory type: {0} (expected conversation, knowledge, project, context, or reference)")]
    InvalidMemoryType(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("AI not configured (set OPENAI_API_KEY or another provider key)")]
    AiNotConfigured,

    #[error("AI backend error: {0}")]
    AiBackend(String),

    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    #[error("tool not configured: {0}")]
    ToolNotConfigured(String),

    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GhostError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::ToolNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AiNotConfigured | Self::ToolNotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::AiBackend(_) | Self::ToolFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable code used when no operation-specific code applies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyContent
            | Self::EmptyQuery
            | Self::ContentTooLong
            | Self::InvalidMemoryType(_)
            | Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::AiNotConfigured => "AI_NOT_CONFIGURED",
            Self::AiBackend(_) => "AI_BACKEND_ERROR",
            Self::ToolNotFound(_) => "TOOL_NOT_FOUND",
            Self::ToolNotConfigured(_) => "TOOL_NOT_CONFIGURED",
            Self::ToolFailed(_) => "TOOL_EXECUTION_FAILED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl axum::response::IntoResponse for GhostError {
    fn into_response(self) -> axum::response::Response {
        ApiError::from(self).into_response()
    }
}

/// Error as seen by HTTP clients: the underlying failure plus the code
/// reported in the envelope.
#[derive(Debug)]
pub struct ApiError {
    pub code: &'static str,
    pub error: GhostError,
}

impl From<GhostError> for ApiError {
    fn from(error: GhostError) -> Self {
        Self { code: error.code(), error }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.error.status_code();
        let body = Json(serde_json::json!({
            "success": false,
            "error": { "code": self.code, "message": self.error.to_string() },
        }));
        (status, body).into_response()
    }
}

/// Attach an operation code to server-side failures. Client errors (4xx)
/// and missing configuration (503) keep their own code.
pub trait OrCode<T> {
    fn or_code(self, code: &'static str) -> Result<T, ApiError>;
}

impl<T, E: Into<GhostError>> OrCode<T> for Result<T, E> {
    fn or_code(self, code: &'static str) -> Result<T, ApiError> {
        self.map_err(|e| {
            let error = e.into();
            let status = error.status_code();
            if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
                ApiError { code, error }
            } else {
                ApiError::from(error)
            }
        })
    }
}
