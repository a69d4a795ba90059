//! 认证中间件
//!
//! 放行白名单路径，其余请求要求 Bearer access token。校验通过后把
//! 调用方身份塞进请求扩展，供下游 handler 使用。

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::auth::models::{TokenType, UserRole};
use crate::error::{Result, ServerError};
use crate::http::server::HttpServerState;

/// 无需携带 token 的路径前缀
const EXEMPT_PREFIXES: &[&str] = &[
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/refresh",
    "/api/health",
    "/api/docs",
];

/// 已认证的调用方身份（由认证中间件写入请求扩展）
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub role: Option<UserRole>,
    /// 原始 token，登出时用于吊销
    pub token: String,
}

/// 认证中间件
pub async fn auth_middleware(
    State(state): State<HttpServerState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let path = request.uri().path();
    if is_exempt(path) {
        return Ok(next.run(request).await);
    }

    let token = extract_bearer_token(&request)?;
    let claims = state.jwt.verify(&token, TokenType::Access)?;

    debug!("🔓 请求已认证: user_id={} path={}", claims.user_id, path);

    request.extensions_mut().insert(AuthUser {
        user_id: claims.user_id,
        email: claims.sub,
        role: claims.role,
        token,
    });

    Ok(next.run(request).await)
}

fn is_exempt(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// 从 Authorization 头提取 Bearer token
fn extract_bearer_token(request: &Request) -> Result<String> {
    let header = request
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ServerError::Unauthorized("缺少 Authorization 头".to_string()))?;

    match header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(ServerError::Unauthorized(
            "Authorization 头格式错误，应为 Bearer <token>".to_string(),
        )),
    }
}
