//! HTTP 服务器
//!
//! 组装路由和中间件：限流在最外层（认证失败的请求也计入配额），
//! 认证在内层，CORS 包在整体外面。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth::jwt_service::JwtService;
use crate::auth::login_attempts::LoginAttemptService;
use crate::auth::token_revocation::TokenRevocationService;
use crate::config::ServerConfig;
use crate::http::middleware::{auth_middleware, rate_limit_middleware};
use crate::http::routes::create_routes;
use crate::infra::spawn_maintenance;
use crate::repository::InMemoryUserRepository;
use crate::security::RateLimiter;

/// HTTP 层共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub jwt: Arc<JwtService>,
    pub revocation: Arc<TokenRevocationService>,
    pub login_attempts: Arc<LoginAttemptService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub users: Arc<InMemoryUserRepository>,
}

impl HttpServerState {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_users(config, Arc::new(InMemoryUserRepository::new()))
    }

    /// 用外部用户仓库构建状态（测试和嵌入场景）
    pub fn with_users(config: &ServerConfig, users: Arc<InMemoryUserRepository>) -> Self {
        let revocation = Arc::new(TokenRevocationService::new());
        let jwt = Arc::new(JwtService::new(&config.jwt, Arc::clone(&revocation)));
        let login_attempts = Arc::new(LoginAttemptService::new(&config.security));
        let rate_limiter = Arc::new(RateLimiter::new(&config.security));

        Self {
            jwt,
            revocation,
            login_attempts,
            rate_limiter,
            users,
        }
    }
}

/// 组装完整应用（路由 + 中间件栈）
pub fn create_app(state: HttpServerState) -> Router {
    create_routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// CRM 认证服务器
pub struct CrmHttpServer {
    config: ServerConfig,
    state: HttpServerState,
}

impl CrmHttpServer {
    pub fn new(config: ServerConfig) -> Self {
        let state = HttpServerState::new(&config);
        Self { config, state }
    }

    pub fn state(&self) -> &HttpServerState {
        &self.state
    }

    /// 启动服务器（绑定端口并一直服务到进程退出）
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        // 后台周期清扫：黑名单、登录记录、限流桶
        spawn_maintenance(
            Arc::clone(&self.state.revocation),
            Arc::clone(&self.state.login_attempts),
            Arc::clone(&self.state.rate_limiter),
            self.config.security.sweep_interval_secs,
        );

        let app = create_app(self.state);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("🚀 HTTP 服务器启动: http://{}", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::auth::models::UserRole;
    use crate::config::SecurityConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.jwt.secret = "test-secret-key-at-least-32-chars".to_string();
        config
    }

    fn seeded_app(config: &ServerConfig) -> Router {
        let users = Arc::new(InMemoryUserRepository::new());
        users
            .create(
                "Alice",
                "alice@example.com",
                &hash_password("secret123").unwrap(),
                UserRole::Manager,
            )
            .unwrap();
        create_app(HttpServerState::with_users(config, users))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn login_body() -> Value {
        json!({"email": "alice@example.com", "password": "secret123"})
    }

    async fn login_tokens(app: &Router) -> (String, String) {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/auth/login", login_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        (
            body["data"]["accessToken"].as_str().unwrap().to_string(),
            body["data"]["refreshToken"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_health_is_open_and_carries_quota_headers() {
        let app = seeded_app(&test_config());

        let response = app.oneshot(get_request("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("X-Rate-Limit-Limit").unwrap(),
            "100"
        );
        assert_eq!(
            response.headers().get("X-Rate-Limit-Remaining").unwrap(),
            "99"
        );

        let body = body_json(response).await;
        assert_eq!(body["status"], "UP");
    }

    #[tokio::test]
    async fn test_login_then_me() {
        let app = seeded_app(&test_config());
        let (access_token, _) = login_tokens(&app).await;

        let request = Request::builder()
            .method("GET")
            .uri("/api/auth/me")
            .header("Authorization", format!("Bearer {}", access_token))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["data"]["email"], "alice@example.com");
        assert_eq!(body["data"]["role"], "MANAGER");
    }

    #[tokio::test]
    async fn test_me_requires_token() {
        let app = seeded_app(&test_config());

        let response = app
            .clone()
            .oneshot(get_request("/api/auth/me"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("GET")
            .uri("/api/auth/me")
            .header("Authorization", "Bearer not.a.token")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_failed_logins_lock_the_account() {
        let app = seeded_app(&test_config());
        let bad = json!({"email": "alice@example.com", "password": "wrong"});

        for attempt in 1..=5 {
            let response = app
                .clone()
                .oneshot(json_request("POST", "/api/auth/login", bad.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

            let body = body_json(response).await;
            assert!(body["message"]
                .as_str()
                .unwrap()
                .contains(&format!("Attempt {} of 5", attempt)));
        }

        // 锁定后连正确密码也被拒
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/auth/login", login_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert!(body["message"].as_str().unwrap().contains("locked"));
    }

    #[tokio::test]
    async fn test_unknown_user_gets_same_message() {
        let app = seeded_app(&test_config());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                json!({"email": "nobody@example.com", "password": "whatever"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid email or password"));
    }

    #[tokio::test]
    async fn test_logout_revokes_access_token() {
        let app = seeded_app(&test_config());
        let (access_token, _) = login_tokens(&app).await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/logout")
            .header("Authorization", format!("Bearer {}", access_token))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // 同一个 token 不能再用
        let request = Request::builder()
            .method("GET")
            .uri("/api/auth/me")
            .header("Authorization", format!("Bearer {}", access_token))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Token has been revoked");
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_replay() {
        let app = seeded_app(&test_config());
        let (_, refresh_token) = login_tokens(&app).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/refresh",
                json!({"refreshToken": refresh_token}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_ne!(body["data"]["refreshToken"], refresh_token);

        // 旧 refresh token 已被消费
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/refresh",
                json!({"refreshToken": refresh_token}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_without_token_is_bad_request() {
        let app = seeded_app(&test_config());

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/auth/refresh", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let app = seeded_app(&test_config());
        let (access_token, _) = login_tokens(&app).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/refresh",
                json!({"refreshToken": access_token}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Wrong token type");
    }

    #[tokio::test]
    async fn test_register_returns_token_pair() {
        let app = seeded_app(&test_config());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                json!({"name": "Bob", "email": "bob@example.com", "password": "longenough"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert!(body["data"]["accessToken"].as_str().is_some());
        assert_eq!(body["data"]["user"]["role"], "SALES");

        // 重复邮箱
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                json!({"name": "Bob", "email": "bob@example.com", "password": "longenough"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_over_quota() {
        let mut config = test_config();
        config.security = SecurityConfig {
            rate_limit_per_minute: 3,
            ..SecurityConfig::default()
        };
        let app = seeded_app(&config);

        for _ in 0..3 {
            let response = app.clone().oneshot(get_request("/api/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(get_request("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get("X-Rate-Limit-Retry-After-Seconds")
                .unwrap(),
            "60"
        );

        let body = body_json(response).await;
        assert_eq!(body["error"], "Too many requests");
        assert_eq!(body["retryAfter"], 60);
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_client_ip() {
        let mut config = test_config();
        config.security = SecurityConfig {
            rate_limit_per_minute: 1,
            ..SecurityConfig::default()
        };
        let app = seeded_app(&config);

        let from = |ip: &str| {
            Request::builder()
                .method("GET")
                .uri("/api/health")
                .header("X-Forwarded-For", ip.to_string())
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(
            app.clone().oneshot(from("203.0.113.1")).await.unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            app.clone().oneshot(from("203.0.113.2")).await.unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            app.clone().oneshot(from("203.0.113.1")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
