//! 认证路由处理器
//!
//! 登录前先过锁定检查，失败路径统一走 "Invalid email or password"
//! 文案（不泄露账号是否存在），成功路径无条件清零失败计数。

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use tracing::{info, warn};

use crate::auth::models::{
    ApiResponse, LoginRequest, LoginResponse, RefreshRequest, RegisterRequest, UserProfile,
    UserRole,
};
use crate::auth::password::{hash_password, verify_password};
use crate::error::{Result, ServerError};
use crate::http::middleware::AuthUser;
use crate::http::server::HttpServerState;
use crate::repository::UserDirectory;

/// POST /api/auth/login
pub async fn login(
    State(state): State<HttpServerState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let email = req.email.trim();
    if email.is_empty() || req.password.is_empty() {
        return Err(ServerError::Validation(
            "Email and password are required".to_string(),
        ));
    }

    // 锁定检查先于一切凭据校验：锁定期间连密码都不验
    if state.login_attempts.is_locked(email) {
        let remaining = state.login_attempts.remaining_lock_seconds(email);
        warn!("🔒 拒绝登录: 账号锁定中 email={} remaining={}s", email, remaining);
        return Err(ServerError::AccountLocked {
            remaining_seconds: remaining,
        });
    }

    let user = match state.users.find_by_email(email).await {
        Some(user) => user,
        None => return Err(record_failure(&state, email)),
    };

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(record_failure(&state, email));
    }

    if !user.active {
        warn!("拒绝登录: 用户已停用 email={}", email);
        return Err(ServerError::UserInactive);
    }

    state.login_attempts.login_succeeded(email);

    let access_token = state.jwt.issue_access_token(&user)?;
    let refresh_token = state.jwt.issue_refresh_token(&user)?;
    let response = LoginResponse::new(
        access_token,
        refresh_token,
        state.jwt.expires_in(),
        UserProfile::from(&user),
    );

    info!("✅ 登录成功: email={} user_id={}", email, user.id);
    Ok(Json(ApiResponse::success("Login successful", response)))
}

/// 记录一次失败并生成带尝试计数的 401
fn record_failure(state: &HttpServerState, email: &str) -> ServerError {
    state.login_attempts.login_failed(email);
    let count = state.login_attempts.attempt_count(email);
    let max = state.login_attempts.max_attempts();
    warn!("登录失败: email={} attempt={}/{}", email, count, max);
    ServerError::Unauthorized(format!(
        "Invalid email or password. Attempt {} of {}.",
        count, max
    ))
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<HttpServerState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let name = req.name.trim();
    let email = req.email.trim();

    if name.is_empty() {
        return Err(ServerError::Validation("Name is required".to_string()));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(ServerError::Validation(
            "A valid email is required".to_string(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ServerError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let role = req.role.unwrap_or(UserRole::Sales);
    let user = state.users.create(name, email, &password_hash, role)?;

    let access_token = state.jwt.issue_access_token(&user)?;
    let refresh_token = state.jwt.issue_refresh_token(&user)?;
    let response = LoginResponse::new(
        access_token,
        refresh_token,
        state.jwt.expires_in(),
        UserProfile::from(&user),
    );

    info!("✅ 注册成功: email={} user_id={}", email, user.id);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("User registered", response)),
    ))
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<HttpServerState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse> {
    let token = match req.refresh_token.as_deref() {
        Some(token) if !token.trim().is_empty() => token.trim().to_string(),
        _ => {
            return Err(ServerError::BadRequest(
                "Refresh token not provided".to_string(),
            ))
        }
    };

    let response = state.jwt.refresh(&token, state.users.as_ref()).await?;
    Ok(Json(ApiResponse::success("Token refreshed", response)))
}

/// POST /api/auth/logout
///
/// 把当前 access token 加入黑名单。幂等：重复登出不报错，但被
/// 撤销的 token 已经过不了认证中间件，实际只会到达一次。
pub async fn logout(
    State(state): State<HttpServerState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse> {
    state.jwt.revoke(&auth.token);
    info!("登出: user_id={}", auth.user_id);
    Ok(Json(ApiResponse::<()>::ok("Logout successful")))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<HttpServerState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse> {
    let user = state
        .users
        .find_by_email(&auth.email)
        .await
        .ok_or_else(|| ServerError::UserNotFound(auth.email.clone()))?;

    Ok(Json(ApiResponse::success(
        "Current user",
        UserProfile::from(&user),
    )))
}
