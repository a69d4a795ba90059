use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::{Result, ServerError};

/// 密码加密成本（默认值 12，平衡安全和性能）
pub const PASSWORD_COST: u32 = DEFAULT_COST;

/// 加密密码
///
/// 使用 bcrypt 将明文密码加密为 60 字符的哈希值（自带随机 salt）。
pub fn hash_password(password: &str) -> Result<String> {
    hash(password, PASSWORD_COST)
        .map_err(|e| ServerError::Internal(format!("密码加密失败: {}", e)))
}

/// 验证密码
///
/// 比较明文密码和存储的哈希值是否匹配（bcrypt 内部为常数时间比较）。
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    verify(password, hash)
        .map_err(|e| ServerError::Internal(format!("密码验证失败: {}", e)))
}
