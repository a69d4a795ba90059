use anyhow::{Context, Result};
use nakacrm::{
    cli::Cli,
    config::{ServerConfig, DEFAULT_CONFIG_TEMPLATE},
    logging, CrmHttpServer,
};
use std::fs;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            nakacrm::cli::Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            nakacrm::cli::Commands::ValidateConfig { path } => {
                return validate_config(path);
            }
            nakacrm::cli::Commands::ShowConfig => {
                return show_config(&cli);
            }
        }
    }

    // 合并日志配置（优先级：CLI > 默认值）
    let log_level = cli.get_log_level().unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format();

    logging::init_logging(&log_level, log_format.as_deref(), cli.quiet)?;

    tracing::info!("🚀 NakaCRM Server starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ServerConfig::load(&cli).context("加载配置失败")?;

    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    // 显示配置信息
    tracing::info!("📊 Server Configuration:");
    tracing::info!("  - Host: {}", config.host);
    tracing::info!("  - Port: {}", config.port);
    tracing::info!("  - JWT Issuer: {}", config.jwt.issuer);
    tracing::info!(
        "  - Access Token TTL: {}s",
        config.jwt.access_token_ttl_secs
    );
    tracing::info!(
        "  - Refresh Token TTL: {}s",
        config.jwt.refresh_token_ttl_secs
    );
    tracing::info!(
        "  - Login Lockout: {} attempts / {}s",
        config.security.max_login_attempts,
        config.security.lockout_window_secs
    );
    tracing::info!(
        "  - Rate Limit: {}/min per IP",
        config.security.rate_limit_per_minute
    );
    tracing::info!("  - Sweep Interval: {}s", config.security.sweep_interval_secs);
    tracing::info!("  - Log Level: {}", config.log_level);
    tracing::info!(
        "  - Log Format: {}",
        log_format.as_deref().unwrap_or("compact")
    );

    if config.jwt.secret == "change-me-in-production" {
        tracing::warn!("⚠️  正在使用默认 JWT 密钥，请通过 JWT_SECRET 或配置文件替换");
    }

    // 运行服务器
    let server = CrmHttpServer::new(config);
    if let Err(e) = server.run().await {
        tracing::error!("❌ 服务器运行失败: {}", e);
        tracing::error!("💡 服务器将退出");
        process::exit(1);
    }

    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = ServerConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;
    config.validate()?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Host: {}", config.host);
    println!("  - Port: {}", config.port);
    println!("  - JWT Issuer: {}", config.jwt.issuer);
    println!(
        "  - Login Lockout: {} attempts / {}s",
        config.security.max_login_attempts, config.security.lockout_window_secs
    );
    println!(
        "  - Rate Limit: {}/min per IP",
        config.security.rate_limit_per_minute
    );

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    // 初始化基本日志（用于显示配置）
    logging::init_logging("info", None, false)?;

    let config = ServerConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
