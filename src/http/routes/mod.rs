// HTTP 路由注册

pub mod auth;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::http::server::HttpServerState;

/// 组装全部路由
pub fn create_routes() -> Router<HttpServerState> {
    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/health", get(health::health))
}
