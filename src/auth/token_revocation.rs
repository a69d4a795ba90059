use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::debug;

use crate::auth::models::TokenClaims;

/// Token 撤销服务（黑名单）
///
/// 记录被显式撤销的令牌：结构合法且未过期的令牌一旦进入黑名单，
/// 校验时一律拒绝。条目只需要活到令牌自身的过期时间，之后由
/// 外部调度器触发的 sweep 清理。
pub struct TokenRevocationService {
    /// 黑名单：原始令牌字符串 -> 撤销时间
    blacklist: DashMap<String, DateTime<Utc>>,
}

impl TokenRevocationService {
    /// 创建新的撤销服务
    pub fn new() -> Self {
        Self {
            blacklist: DashMap::new(),
        }
    }

    /// 将令牌加入黑名单（幂等：重复加入是 no-op）
    pub fn add(&self, token: &str) {
        self.blacklist
            .entry(token.to_string())
            .or_insert_with(Utc::now);
    }

    /// 检查令牌是否已被撤销
    pub fn contains(&self, token: &str) -> bool {
        self.blacklist.contains_key(token)
    }

    /// 清理已过期的黑名单条目
    ///
    /// 按令牌内嵌的 exp 判断：过期后的令牌无论签名是否有效都不可能
    /// 再通过校验，条目失去意义。这里只解码 claims 不验签——解不出
    /// exp 的畸形条目视为立即过期，一并清掉。返回清理数量。
    pub fn sweep(&self) -> usize {
        let now = Utc::now().timestamp();
        let before = self.blacklist.len();

        self.blacklist
            .retain(|token, _revoked_at| match embedded_expiry(token) {
                Some(exp) => exp > now,
                None => false,
            });

        let removed = before - self.blacklist.len();
        if removed > 0 {
            debug!("🧹 黑名单清理: 移除 {} 个过期条目", removed);
        }
        removed
    }

    /// 获取黑名单大小
    pub fn len(&self) -> usize {
        self.blacklist.len()
    }

    /// 黑名单是否为空
    pub fn is_empty(&self) -> bool {
        self.blacklist.is_empty()
    }
}

impl Default for TokenRevocationService {
    fn default() -> Self {
        Self::new()
    }
}

/// 提取令牌内嵌的过期时间（不验签）
///
/// 黑名单清扫不关心签名有效性，只关心这个令牌还有没有可能通过
/// 正常校验，所以这里显式关闭签名校验。
fn embedded_expiry(token: &str) -> Option<i64> {
    let mut validation = Validation::new(Algorithm::HS512);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims.exp)
}
