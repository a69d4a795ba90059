pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod infra;
pub mod logging;
pub mod repository;
pub mod security;

pub use auth::{JwtService, LoginAttemptService, TokenRevocationService};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use http::{CrmHttpServer, HttpServerState};
pub use repository::{InMemoryUserRepository, UserDirectory};
pub use security::RateLimiter;
