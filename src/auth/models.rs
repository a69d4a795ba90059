use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 用户角色（单一角色标签，随 access token 下发）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    /// 管理员
    Admin,
    /// 销售经理
    Manager,
    /// 销售
    Sales,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Sales
    }
}

/// 令牌类型判别字段
///
/// access 与 refresh 互不通用：refresh token 冒充 access token（或反之）
/// 必须在校验阶段被拒绝，这个字段是强制约束而不是提示。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT Token Claims（固定类型结构，不使用动态 claim map）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// JWT 标准字段 - 签发者
    pub iss: String,
    /// JWT 标准字段 - 主题（用户邮箱，作为查找键）
    pub sub: String,
    /// JWT 标准字段 - 过期时间 (Unix timestamp)
    pub exp: i64,
    /// JWT 标准字段 - 签发时间
    pub iat: i64,
    /// JWT 标准字段 - JWT ID
    pub jti: String,

    /// 自定义字段 - 用户ID
    pub user_id: i64,
    /// 自定义字段 - 令牌类型（access / refresh）
    pub token_type: TokenType,
    /// 自定义字段 - 角色标签（refresh token 不携带）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
}

/// 用户账号（由外部用户目录提供，本核心不持久化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// 用户ID
    pub id: i64,
    /// 显示名称
    pub name: String,
    /// 邮箱（登录查找键）
    pub email: String,
    /// 密码哈希（bcrypt）
    pub password_hash: String,
    /// 角色
    pub role: UserRole,
    /// 是否启用
    pub active: bool,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

/// 用户公开信息（响应中返回，不包含密码哈希）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub active: bool,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            active: user.active,
        }
    }
}

/// 登录请求
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// 注册请求
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    /// 角色（缺省为 SALES）
    pub role: Option<UserRole>,
}

/// 刷新请求
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// 登录/注册/刷新成功后的令牌响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// 固定为 "Bearer"
    pub token_type: String,
    /// access token 有效期（秒）
    pub expires_in: i64,
    pub user: UserProfile,
}

impl LoginResponse {
    pub fn new(
        access_token: String,
        refresh_token: String,
        expires_in: i64,
        user: UserProfile,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
            user,
        }
    }
}

/// 统一响应信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 成功响应
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    /// 失败响应
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl ApiResponse<()> {
    /// 无数据的成功响应
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}
