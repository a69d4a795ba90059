use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::models::{LoginResponse, TokenClaims, TokenType, User, UserProfile};
use crate::auth::token_revocation::TokenRevocationService;
use crate::config::JwtConfig;
use crate::error::{Result, ServerError};
use crate::repository::UserDirectory;

/// JWT 签发和验证服务（信任根）
///
/// 所有凭据都由这里的进程级对称密钥签发（HS512）。校验时算法被固定
/// 在 Validation 中：头部声称其他算法的令牌直接拒绝，杜绝算法混淆。
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: i64,
    refresh_ttl: i64,
    revocation: Arc<TokenRevocationService>,
}

impl JwtService {
    /// 创建 JWT 服务（HS512 对称加密）
    pub fn new(config: &JwtConfig, revocation: Arc<TokenRevocationService>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: config.access_token_ttl_secs,
            refresh_ttl: config.refresh_token_ttl_secs,
            revocation,
        }
    }

    /// 签发 access token（有效期默认 24 小时）
    pub fn issue_access_token(&self, user: &User) -> Result<String> {
        self.issue(user, TokenType::Access, self.access_ttl, Some(user.role))
    }

    /// 签发 refresh token（有效期默认 7 天，不携带角色）
    pub fn issue_refresh_token(&self, user: &User) -> Result<String> {
        self.issue(user, TokenType::Refresh, self.refresh_ttl, None)
    }

    fn issue(
        &self,
        user: &User,
        token_type: TokenType,
        ttl: i64,
        role: Option<crate::auth::models::UserRole>,
    ) -> Result<String> {
        let now = Utc::now().timestamp();

        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: user.email.clone(),
            exp: now + ttl,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            user_id: user.id,
            token_type,
            role,
        };

        let header = Header::new(Algorithm::HS512);
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| ServerError::Internal(format!("JWT 签发失败: {}", e)))
    }

    /// 验证令牌
    ///
    /// 失败时精确返回五类之一：MalformedToken / BadSignature /
    /// TokenExpired / WrongTokenType / TokenRevoked。除黑名单查询外
    /// 无副作用，可重复调用。
    pub fn verify(&self, token: &str, expected_type: TokenType) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.set_issuer(&[&self.issuer]);
        // 单进程单密钥，不存在节点间时钟偏差，过期判定精确到秒
        validation.leeway = 0;

        let token_data = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(map_jwt_error)?;

        // 黑名单优先于类型检查：被撤销的令牌无论怎么用都报 Revoked
        if self.revocation.contains(token) {
            return Err(ServerError::TokenRevoked);
        }

        if token_data.claims.token_type != expected_type {
            return Err(ServerError::WrongTokenType);
        }

        Ok(token_data.claims)
    }

    /// 撤销令牌（幂等）
    ///
    /// 结构不合法或签名不对的令牌本来就不可能通过校验，没有可撤销
    /// 的东西，直接 no-op。已过期的令牌允许入黑名单，sweep 会回收。
    pub fn revoke(&self, token: &str) {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;
        validation.validate_exp = false;

        match decode::<TokenClaims>(token, &self.decoding_key, &validation) {
            Ok(_) => {
                self.revocation.add(token);
                debug!("令牌已加入黑名单");
            }
            Err(_) => {
                debug!("撤销请求忽略：令牌结构或签名无效");
            }
        }
    }

    /// 用 refresh token 换取新的令牌对
    ///
    /// 策略：rotate-on-use。旧 refresh token 验证通过后立即撤销
    /// （单次使用，重放报 TokenRevoked），返回新的 access + refresh。
    pub async fn refresh(
        &self,
        refresh_token: &str,
        directory: &dyn UserDirectory,
    ) -> Result<LoginResponse> {
        let claims = self.verify(refresh_token, TokenType::Refresh)?;

        let user = directory
            .find_by_email(&claims.sub)
            .await
            .ok_or_else(|| ServerError::UserNotFound(claims.sub.clone()))?;

        if !user.active {
            warn!("拒绝刷新: 用户已停用 email={}", user.email);
            return Err(ServerError::UserInactive);
        }

        // 先撤销旧令牌，再签发新令牌：即使签发失败，旧令牌也已作废
        self.revocation.add(refresh_token);

        let access_token = self.issue_access_token(&user)?;
        let new_refresh_token = self.issue_refresh_token(&user)?;

        debug!("令牌刷新成功: email={}", user.email);

        Ok(LoginResponse::new(
            access_token,
            new_refresh_token,
            self.access_ttl,
            UserProfile::from(&user),
        ))
    }

    /// access token 有效期（秒）
    pub fn expires_in(&self) -> i64 {
        self.access_ttl
    }
}

/// 把 jsonwebtoken 的错误映射到本核心的分类
///
/// 未识别的解码失败一律按 MalformedToken 处理（fail closed），
/// 绝不因为错误无法分类就放行。
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> ServerError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => ServerError::TokenExpired,
        ErrorKind::InvalidSignature => ServerError::BadSignature,
        // 头部声明了非预期算法：按签名问题拒绝（算法混淆防护）
        ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => ServerError::BadSignature,
        _ => ServerError::MalformedToken,
    }
}
