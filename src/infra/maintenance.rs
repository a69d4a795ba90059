//! 后台周期清扫
//!
//! 黑名单、登录失败记录、限流桶都只做惰性或外部触发的回收，这里的
//! 定时任务是唯一的主动清扫入口。三个 sweep 都是有界操作，放在同一
//! 个任务里顺序执行即可。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::login_attempts::LoginAttemptService;
use crate::auth::token_revocation::TokenRevocationService;
use crate::security::RateLimiter;

/// 启动周期清扫任务
pub fn spawn_maintenance(
    revocation: Arc<TokenRevocationService>,
    login_attempts: Arc<LoginAttemptService>,
    rate_limiter: Arc<RateLimiter>,
    interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // 第一个 tick 立即到期，先吞掉，避免启动即清扫
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let revoked = revocation.sweep();
            let attempts = login_attempts.sweep();
            let buckets = rate_limiter.sweep();

            if revoked + attempts + buckets > 0 {
                info!(
                    "🧹 周期清扫完成: 黑名单 {} 条, 登录记录 {} 条, 限流桶 {} 个",
                    revoked, attempts, buckets
                );
            }
        }
    })
}
