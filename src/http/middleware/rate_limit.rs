//! 限流中间件
//!
//! 在认证之前按来源 IP 做准入控制：无论请求最终认证成败，洪峰都
//! 先在这里被挡住。放行的响应带上配额头，拒绝时返回 429。

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::warn;

use crate::http::server::HttpServerState;
use crate::security::ANONYMOUS_KEY;

/// 限流拒绝后建议客户端等待的秒数
const RETRY_AFTER_SECONDS: u64 = 60;

/// 限流中间件
pub async fn rate_limit_middleware(
    State(state): State<HttpServerState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer);

    if state.rate_limiter.try_acquire(&ip) {
        let limit = state.rate_limiter.limit();
        let remaining = state.rate_limiter.remaining(&ip);

        let mut response = next.run(request).await;
        let headers = response.headers_mut();
        headers.insert("X-Rate-Limit-Limit", header_value(limit));
        headers.insert("X-Rate-Limit-Remaining", header_value(remaining));
        response
    } else {
        warn!("⛔ 请求被限流: ip={}", ip);

        let limit = state.rate_limiter.limit();
        let body = json!({
            "error": "Too many requests",
            "message": format!(
                "Rate limit exceeded. Maximum {} requests per minute. Try again in {} seconds.",
                limit, RETRY_AFTER_SECONDS
            ),
            "retryAfter": RETRY_AFTER_SECONDS,
        });

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert("X-Rate-Limit-Limit", header_value(limit));
        headers.insert(
            "X-Rate-Limit-Retry-After-Seconds",
            header_value(RETRY_AFTER_SECONDS),
        );
        response
    }
}

/// 提取客户端来源键
///
/// 优先级：X-Forwarded-For 第一段（逗号分隔、去空白）→ X-Real-IP →
/// 传输层对端地址。全部缺失或为空时落到共享匿名键，绝不报错。
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("X-Real-IP").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| ANONYMOUS_KEY.to_string())
}

fn header_value<T: ToString>(value: T) -> HeaderValue {
    // 数字转头部值不会失败
    HeaderValue::from_str(&value.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_takes_first_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1, 10.0.0.2"),
        );
        headers.insert("X-Real-IP", HeaderValue::from_static("10.9.9.9"));

        assert_eq!(client_ip(&headers, None), "203.0.113.9");
    }

    #[test]
    fn test_real_ip_when_no_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", HeaderValue::from_static("203.0.113.7"));

        assert_eq!(client_ip(&headers, None), "203.0.113.7");
    }

    #[test]
    fn test_falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.4:51234".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.4");
    }

    #[test]
    fn test_anonymous_when_nothing_available() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("  ,10.0.0.1"));

        // 第一段为空白时不回退到后续段，而是继续走 X-Real-IP / peer
        assert_eq!(client_ip(&headers, None), ANONYMOUS_KEY);
    }
}
