//! 安全模块 - 请求准入控制
//!
//! 按来源 IP 做令牌桶限流，与身份无关：无论认证成败，请求洪峰都
//! 先在这里被挡住。

pub mod rate_limiter;

pub use rate_limiter::{RateLimiter, ANONYMOUS_KEY};
