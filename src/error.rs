use std::error::Error as StdError;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

/// 服务器错误类型
///
/// 认证核心的错误分类是协议的一部分：令牌校验失败必须能区分
/// Malformed / BadSignature / Expired / WrongType / Revoked 五种情况，
/// 锁定错误必须携带剩余秒数。所有错误都在请求边界可恢复。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerError {
    /// 内部错误
    Internal(String),
    /// 配置错误
    Configuration(String),
    /// 验证错误
    Validation(String),
    /// 错误请求
    BadRequest(String),
    /// 认证失败（凭据错误等通用场景）
    Unauthorized(String),
    /// 令牌无法解析/解码
    MalformedToken,
    /// 令牌签名不匹配（含算法声明不一致）
    BadSignature,
    /// 令牌已过期
    TokenExpired,
    /// 令牌类型不匹配（如用 refresh token 冒充 access token）
    WrongTokenType,
    /// 令牌已被撤销（在黑名单中）
    TokenRevoked,
    /// 账号被临时锁定（暴力破解防护）
    AccountLocked { remaining_seconds: u64 },
    /// 限流错误
    RateLimit(String),
    /// 用户已停用
    UserInactive,
    /// 用户未找到
    UserNotFound(String),
    /// 重复条目
    DuplicateEntry(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ServerError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ServerError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ServerError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            // 消息本身就是对外的提示文案（如 "Invalid email or password.
            // Attempt N of 5."），不再加前缀
            ServerError::Unauthorized(msg) => write!(f, "{}", msg),
            ServerError::MalformedToken => write!(f, "Malformed token"),
            ServerError::BadSignature => write!(f, "Invalid token signature"),
            ServerError::TokenExpired => write!(f, "Token has expired"),
            ServerError::WrongTokenType => write!(f, "Wrong token type"),
            ServerError::TokenRevoked => write!(f, "Token has been revoked"),
            ServerError::AccountLocked { remaining_seconds } => {
                // 向上取整到分钟，且下限为 1：窗口边界时刻剩余秒数为 0
                // 但仍处于锁定状态，不能显示 "0 minutes"
                let minutes = ((remaining_seconds + 59) / 60).max(1);
                write!(
                    f,
                    "Account temporarily locked. Try again in {} minute{}.",
                    minutes,
                    if minutes == 1 { "" } else { "s" }
                )
            }
            ServerError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ServerError::UserInactive => {
                write!(f, "User account is deactivated. Contact an administrator.")
            }
            ServerError::UserNotFound(id) => write!(f, "User not found: {}", id),
            ServerError::DuplicateEntry(msg) => write!(f, "Duplicate entry: {}", msg),
        }
    }
}

impl StdError for ServerError {}

impl ServerError {
    /// 判断是否属于令牌校验失败（五类之一）
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            ServerError::MalformedToken
                | ServerError::BadSignature
                | ServerError::TokenExpired
                | ServerError::WrongTokenType
                | ServerError::TokenRevoked
        )
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            ServerError::Unauthorized(_)
            | ServerError::MalformedToken
            | ServerError::BadSignature
            | ServerError::TokenExpired
            | ServerError::WrongTokenType
            | ServerError::TokenRevoked => StatusCode::UNAUTHORIZED,
            ServerError::UserInactive => StatusCode::FORBIDDEN,
            ServerError::Validation(_) | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::UserNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::DuplicateEntry(_) => StatusCode::CONFLICT,
            ServerError::AccountLocked { .. } | ServerError::RateLimit(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error_response = ErrorResponse::new(&self);
        (status_code, Json(error_response)).into_response()
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 内部错误
    Internal = 1000,
    /// 配置错误
    Configuration = 1001,
    /// 验证错误
    Validation = 1002,
    /// 错误请求
    BadRequest = 1003,
    /// 认证失败
    Unauthorized = 2000,
    /// 令牌格式错误
    MalformedToken = 2001,
    /// 令牌签名错误
    BadSignature = 2002,
    /// 令牌过期
    TokenExpired = 2003,
    /// 令牌类型错误
    WrongTokenType = 2004,
    /// 令牌已撤销
    TokenRevoked = 2005,
    /// 账号锁定
    AccountLocked = 3000,
    /// 限流
    RateLimit = 3001,
    /// 用户停用
    UserInactive = 4000,
    /// 用户未找到
    UserNotFound = 4001,
    /// 重复条目
    DuplicateEntry = 4002,
}

impl From<&ServerError> for ErrorCode {
    fn from(error: &ServerError) -> Self {
        match error {
            ServerError::Internal(_) => ErrorCode::Internal,
            ServerError::Configuration(_) => ErrorCode::Configuration,
            ServerError::Validation(_) => ErrorCode::Validation,
            ServerError::BadRequest(_) => ErrorCode::BadRequest,
            ServerError::Unauthorized(_) => ErrorCode::Unauthorized,
            ServerError::MalformedToken => ErrorCode::MalformedToken,
            ServerError::BadSignature => ErrorCode::BadSignature,
            ServerError::TokenExpired => ErrorCode::TokenExpired,
            ServerError::WrongTokenType => ErrorCode::WrongTokenType,
            ServerError::TokenRevoked => ErrorCode::TokenRevoked,
            ServerError::AccountLocked { .. } => ErrorCode::AccountLocked,
            ServerError::RateLimit(_) => ErrorCode::RateLimit,
            ServerError::UserInactive => ErrorCode::UserInactive,
            ServerError::UserNotFound(_) => ErrorCode::UserNotFound,
            ServerError::DuplicateEntry(_) => ErrorCode::DuplicateEntry,
        }
    }
}

/// 错误响应
///
/// message 只包含对用户安全的文案，绝不携带签名密钥、堆栈或原始异常文本。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 详细信息
    pub details: Option<String>,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(error: &ServerError) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: error.to_string(),
            details: None,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_message_rounds_up_to_minutes() {
        let err = ServerError::AccountLocked {
            remaining_seconds: 61,
        };
        assert_eq!(
            err.to_string(),
            "Account temporarily locked. Try again in 2 minutes."
        );

        let err = ServerError::AccountLocked {
            remaining_seconds: 30,
        };
        assert!(err.to_string().contains("1 minute."));

        // 窗口边界：剩余 0 秒但仍锁定，显示下限 1 分钟
        let err = ServerError::AccountLocked {
            remaining_seconds: 0,
        };
        assert!(err.to_string().contains("1 minute."));
    }

    #[test]
    fn test_unauthorized_message_is_verbatim() {
        let err = ServerError::Unauthorized("Invalid email or password. Attempt 2 of 5.".to_string());
        assert_eq!(err.to_string(), "Invalid email or password. Attempt 2 of 5.");
    }

    #[test]
    fn test_token_error_classification() {
        assert!(ServerError::TokenRevoked.is_token_error());
        assert!(ServerError::BadSignature.is_token_error());
        assert!(!ServerError::UserInactive.is_token_error());
    }

    #[test]
    fn test_error_code_mapping() {
        let err = ServerError::WrongTokenType;
        assert_eq!(ErrorCode::from(&err), ErrorCode::WrongTokenType);

        let resp = ErrorResponse::new(&err);
        assert_eq!(resp.message, "Wrong token type");
        assert!(resp.details.is_none());
    }
}
