// HTTP 中间件 - 限流在外层，认证在内层

pub mod auth;
pub mod rate_limit;

pub use auth::{auth_middleware, AuthUser};
pub use rate_limit::rate_limit_middleware;
