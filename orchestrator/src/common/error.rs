//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! ルーティング・アドミッションの結果はすべてこの型で呼び出し側へ返す。
//! `NoEligibleTarget`（一時的・リトライ可能）と `NoCapableServers`
//! （モデルを提供する健全なサーバーが存在しない）は区別して報告する。

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::types::ServerModelKey;

/// Common layer error type
#[derive(Debug, Error)]
pub enum CommonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Orchestrator error type
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Common layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Key has never been observed
    #[error("No metrics recorded for {0}")]
    NotFound(ServerModelKey),

    /// Admission queue is at capacity
    #[error("Admission queue full for {0}")]
    QueueFull(ServerModelKey),

    /// Admission queue is paused by an administrator
    #[error("Admission queue paused for {0}")]
    QueuePaused(ServerModelKey),

    /// Circuit breaker rejects the target
    #[error("Circuit breaker open for {0}")]
    BreakerOpen(ServerModelKey),

    /// Candidates exist but every one was excluded by breaker or queue state
    #[error(
        "No eligible target for model {model} (breaker_open={breaker_open}, queue_full={queue_full}, queue_paused={queue_paused})"
    )]
    NoEligibleTarget {
        /// Requested model
        model: String,
        /// Candidates excluded by an open breaker
        breaker_open: usize,
        /// Candidates excluded by a full queue
        queue_full: usize,
        /// Candidates excluded by a paused queue
        queue_paused: usize,
    },

    /// No healthy server serves the model at all
    #[error("No capable servers for model: {0}")]
    NoCapableServers(String),

    /// Server is not registered
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// Conflict error (e.g., duplicate server id)
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl OrchestratorError {
    /// Returns a safe error message for external clients.
    ///
    /// Server ids and model names are omitted; use `Display` in server logs.
    pub fn external_message(&self) -> &'static str {
        match self {
            Self::Common(_) => "Request error",
            Self::NotFound(_) => "Not found",
            Self::QueueFull(_) => "Server is busy",
            Self::QueuePaused(_) => "Server is paused",
            Self::BreakerOpen(_) => "Server temporarily unavailable",
            Self::NoEligibleTarget { .. } => "No available servers",
            Self::NoCapableServers(_) => "Model not available",
            Self::ServerNotFound(_) => "Server not found",
            Self::Conflict(_) => "Resource conflict",
        }
    }

    /// Returns the OpenAI-compatible error type string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Common(_) => "invalid_request_error",
            Self::NotFound(_) => "not_found_error",
            Self::QueueFull(_) => "service_unavailable",
            Self::QueuePaused(_) => "service_unavailable",
            Self::BreakerOpen(_) => "service_unavailable",
            Self::NoEligibleTarget { .. } => "service_unavailable",
            Self::NoCapableServers(_) => "not_found_error",
            Self::ServerNotFound(_) => "not_found_error",
            Self::Conflict(_) => "invalid_request_error",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Common(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::QueuePaused(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoEligibleTarget { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoCapableServers(_) => StatusCode::NOT_FOUND,
            Self::ServerNotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    /// 時間を置いて再試行すれば成功しうるか
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull(_)
                | Self::QueuePaused(_)
                | Self::BreakerOpen(_)
                | Self::NoEligibleTarget { .. }
        )
    }

    /// Converts this error to an OpenAI-compatible error response.
    pub fn to_openai_error(&self) -> OpenAIErrorResponse {
        OpenAIErrorResponse {
            error: OpenAIErrorDetail {
                message: self.external_message().to_string(),
                error_type: self.error_type().to_string(),
                code: Some(self.status_code().as_u16().to_string()),
            },
        }
    }
}

/// OpenAI互換エラーレスポンス
///
/// # Example
///
/// ```json
/// {
///   "error": {
///     "message": "No available servers",
///     "type": "service_unavailable",
///     "code": "503"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct OpenAIErrorResponse {
    /// The error details
    pub error: OpenAIErrorDetail,
}

/// OpenAIエラー詳細
#[derive(Debug, Clone, Serialize)]
pub struct OpenAIErrorDetail {
    /// Human-readable error message
    pub message: String,
    /// Error type (e.g., "invalid_request_error", "server_error")
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error code (optional, typically HTTP status as string)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Result type alias (Common)
pub type CommonResult<T> = Result<T, CommonError>;

/// Result type alias (Orchestrator)
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
