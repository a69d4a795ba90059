use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub host: String,
    /// HTTP 服务端口
    pub port: u16,
    /// 日志级别
    pub log_level: String,
    /// 日志格式
    pub log_format: Option<String>,
    /// JWT 配置
    pub jwt: JwtConfig,
    /// 安全防护配置
    pub security: SecurityConfig,
}

/// JWT 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// JWT 签名密钥（HS512 对称密钥，进程内唯一）
    pub secret: String,
    /// Access token 有效期（秒，默认 24 小时）
    pub access_token_ttl_secs: i64,
    /// Refresh token 有效期（秒，默认 7 天）
    pub refresh_token_ttl_secs: i64,
    /// 签发者
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "change-me-in-production".to_string(),
            access_token_ttl_secs: 86_400,      // 24 hours
            refresh_token_ttl_secs: 604_800,    // 7 days
            issuer: "nakacrm".to_string(),
        }
    }
}

/// 安全防护配置（登录防爆破 + IP 限流）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// 触发锁定的最大失败次数
    pub max_login_attempts: u32,
    /// 锁定窗口（秒，默认 15 分钟）
    pub lockout_window_secs: i64,
    /// 每个 IP 每分钟的请求上限（同时作为桶容量）
    pub rate_limit_per_minute: u32,
    /// 限流桶空闲回收 TTL（秒，默认 1 小时）
    pub rate_bucket_ttl_secs: u64,
    /// 周期清扫间隔（秒，默认 1 小时）
    pub sweep_interval_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 5,
            lockout_window_secs: 900, // 15 minutes
            rate_limit_per_minute: 100,
            rate_bucket_ttl_secs: 3600,
            sweep_interval_secs: 3600,
        }
    }
}

impl SecurityConfig {
    /// 锁定窗口
    pub fn lockout_window(&self) -> Duration {
        Duration::from_secs(self.lockout_window_secs.max(0) as u64)
    }

    /// 稳态补充速率（令牌/秒），100/min ≈ 1.67/s
    pub fn refill_rate_per_sec(&self) -> f64 {
        self.rate_limit_per_minute as f64 / 60.0
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: None,
            jwt: JwtConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// 创建新的服务器配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        Ok(toml_config.into())
    }

    /// 从环境变量合并配置
    pub fn merge_from_env(&mut self) {
        if let Ok(host) = env::var("NAKACRM_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("NAKACRM_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(level) = env::var("NAKACRM_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            self.jwt.secret = secret;
        }
        if let Ok(ttl) = env::var("JWT_ACCESS_TTL_SECS") {
            if let Ok(ttl) = ttl.parse() {
                self.jwt.access_token_ttl_secs = ttl;
            }
        }
        if let Ok(ttl) = env::var("JWT_REFRESH_TTL_SECS") {
            if let Ok(ttl) = ttl.parse() {
                self.jwt.refresh_token_ttl_secs = ttl;
            }
        }
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(level) = cli.get_log_level() {
            self.log_level = level;
        }
        if let Some(format) = cli.get_log_format() {
            self.log_format = Some(format);
        }
        if let Some(secret) = &cli.jwt_secret {
            self.jwt.secret = secret.clone();
        }
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if let Some(path) = &cli.config_file {
            info!("📄 加载配置文件: {}", path);
            Self::from_toml_file(path)?
        } else if Path::new("config.toml").exists() {
            info!("📄 加载配置文件: config.toml");
            Self::from_toml_file("config.toml")?
        } else {
            Self::default()
        };

        config.merge_from_env();
        config.merge_from_cli(cli);
        config.validate()?;

        Ok(config)
    }

    /// 校验配置的基本合法性
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.jwt.secret.is_empty(), "jwt.secret 不能为空");
        anyhow::ensure!(
            self.jwt.access_token_ttl_secs > 0,
            "jwt.access_token_ttl_secs 必须为正数"
        );
        anyhow::ensure!(
            self.jwt.refresh_token_ttl_secs > 0,
            "jwt.refresh_token_ttl_secs 必须为正数"
        );
        anyhow::ensure!(
            self.security.max_login_attempts > 0,
            "security.max_login_attempts 必须为正数"
        );
        anyhow::ensure!(
            self.security.rate_limit_per_minute > 0,
            "security.rate_limit_per_minute 必须为正数"
        );
        Ok(())
    }
}

// === TOML 配置镜像结构 ===
// 配置文件中所有字段都是可选的，缺省时落回默认值。

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    jwt: Option<TomlJwtConfig>,
    security: Option<TomlSecurityConfig>,
    logging: Option<TomlLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlServerConfig {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TomlJwtConfig {
    secret: Option<String>,
    access_token_ttl_secs: Option<i64>,
    refresh_token_ttl_secs: Option<i64>,
    issuer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlSecurityConfig {
    max_login_attempts: Option<u32>,
    lockout_window_secs: Option<i64>,
    rate_limit_per_minute: Option<u32>,
    rate_bucket_ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlLoggingConfig {
    level: Option<String>,
    format: Option<String>,
}

impl From<TomlConfig> for ServerConfig {
    fn from(toml: TomlConfig) -> Self {
        let mut config = ServerConfig::default();

        if let Some(server) = toml.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
        }

        if let Some(jwt) = toml.jwt {
            if let Some(secret) = jwt.secret {
                config.jwt.secret = secret;
            }
            if let Some(ttl) = jwt.access_token_ttl_secs {
                config.jwt.access_token_ttl_secs = ttl;
            }
            if let Some(ttl) = jwt.refresh_token_ttl_secs {
                config.jwt.refresh_token_ttl_secs = ttl;
            }
            if let Some(issuer) = jwt.issuer {
                config.jwt.issuer = issuer;
            }
        }

        if let Some(security) = toml.security {
            if let Some(max) = security.max_login_attempts {
                config.security.max_login_attempts = max;
            }
            if let Some(window) = security.lockout_window_secs {
                config.security.lockout_window_secs = window;
            }
            if let Some(limit) = security.rate_limit_per_minute {
                config.security.rate_limit_per_minute = limit;
            }
            if let Some(ttl) = security.rate_bucket_ttl_secs {
                config.security.rate_bucket_ttl_secs = ttl;
            }
            if let Some(interval) = security.sweep_interval_secs {
                config.security.sweep_interval_secs = interval;
            }
        }

        if let Some(logging) = toml.logging {
            if let Some(level) = logging.level {
                config.log_level = level;
            }
            if let Some(format) = logging.format {
                config.log_format = Some(format);
            }
        }

        config
    }
}

/// 默认配置文件内容（generate-config 子命令使用）
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# NakaCRM Server 配置文件
# 此文件由 nakacrm generate-config 生成

[server]
host = "0.0.0.0"
port = 8080

[jwt]
# 生产环境务必替换，或通过 JWT_SECRET 环境变量注入
secret = "change-me-in-production"
access_token_ttl_secs = 86400      # 24 小时
refresh_token_ttl_secs = 604800    # 7 天
issuer = "nakacrm"

[security]
max_login_attempts = 5
lockout_window_secs = 900          # 15 分钟
rate_limit_per_minute = 100
rate_bucket_ttl_secs = 3600        # 1 小时
sweep_interval_secs = 3600         # 1 小时

[logging]
level = "info"
format = "compact"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt.access_token_ttl_secs, 86_400);
        assert_eq!(config.jwt.refresh_token_ttl_secs, 604_800);
        assert_eq!(config.security.max_login_attempts, 5);
        assert_eq!(config.security.lockout_window_secs, 900);
        assert_eq!(config.security.rate_limit_per_minute, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_refill_rate() {
        let security = SecurityConfig::default();
        // 100/min ≈ 1.67/s
        assert!((security.refill_rate_per_sec() - 1.6666).abs() < 0.01);
    }

    #[test]
    fn test_parse_default_template() {
        let toml_config: TomlConfig = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        let config: ServerConfig = toml_config.into();
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt.issuer, "nakacrm");
        assert_eq!(config.security.rate_bucket_ttl_secs, 3600);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [security]
            max_login_attempts = 3
            "#,
        )
        .unwrap();
        let config: ServerConfig = toml_config.into();
        assert_eq!(config.security.max_login_attempts, 3);
        assert_eq!(config.security.lockout_window_secs, 900);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let mut config = ServerConfig::default();
        config.jwt.secret = String::new();
        assert!(config.validate().is_err());
    }
}
