// 认证模块 - 提供JWT签发、验证、撤销和登录防爆破功能

pub mod jwt_service;
pub mod login_attempts;
pub mod models;
pub mod password;
pub mod token_revocation;

// 重新导出主要类型
pub use jwt_service::JwtService;
pub use login_attempts::LoginAttemptService;
pub use models::{
    ApiResponse, LoginRequest, LoginResponse, RefreshRequest, RegisterRequest, TokenClaims,
    TokenType, User, UserProfile, UserRole,
};
pub use password::{hash_password, verify_password, PASSWORD_COST};
pub use token_revocation::TokenRevocationService;
