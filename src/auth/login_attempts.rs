use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::SecurityConfig;

/// 单个登录键的失败记录
#[derive(Debug, Clone)]
struct LoginAttempt {
    /// 窗口内的失败次数
    attempts: u32,
    /// 最后一次失败时间
    last_attempt: DateTime<Utc>,
}

/// 登录尝试控制服务（暴力破解防护）
///
/// 按身份键（邮箱）统计失败次数：达到上限后在锁定窗口内拒绝登录，
/// 窗口过后惰性解锁，登录成功无条件清零。记录的内存回收依赖外部
/// 调度器触发的 sweep。
pub struct LoginAttemptService {
    /// 失败记录：身份键 -> 记录
    attempts: DashMap<String, LoginAttempt>,
    /// 触发锁定的失败次数上限
    max_attempts: u32,
    /// 锁定窗口
    lockout_window: Duration,
}

impl LoginAttemptService {
    /// 创建服务（默认 5 次失败 / 15 分钟窗口）
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            attempts: DashMap::new(),
            max_attempts: config.max_login_attempts,
            lockout_window: Duration::seconds(config.lockout_window_secs),
        }
    }

    /// 记录一次登录失败
    pub fn login_failed(&self, key: &str) {
        self.login_failed_at(key, Utc::now());
    }

    fn login_failed_at(&self, key: &str, now: DateTime<Utc>) {
        let mut entry = self
            .attempts
            .entry(key.to_string())
            .or_insert_with(|| LoginAttempt {
                attempts: 0,
                last_attempt: now,
            });
        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_attempt = now;

        if entry.attempts >= self.max_attempts {
            warn!(
                "🔒 登录键已锁定: key={}, attempts={}",
                key, entry.attempts
            );
        }
    }

    /// 记录一次登录成功：无条件清除记录（即使当前处于锁定状态）
    pub fn login_succeeded(&self, key: &str) {
        if self.attempts.remove(key).is_some() {
            debug!("登录成功，清除失败记录: key={}", key);
        }
    }

    /// 是否处于锁定状态
    ///
    /// 锁定条件：失败次数达到上限 且 距最后一次失败的时间未超出窗口。
    /// 窗口边界取闭区间（elapsed == window 仍算锁定），避免边界时刻
    /// 的重试在不同线程间判定不一致。窗口已过的记录惰性清除。
    pub fn is_locked(&self, key: &str) -> bool {
        self.is_locked_at(key, Utc::now())
    }

    fn is_locked_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let expired = match self.attempts.get(key) {
            None => return false,
            Some(entry) => {
                if entry.attempts < self.max_attempts {
                    return false;
                }
                let elapsed = now - entry.last_attempt;
                if elapsed <= self.lockout_window {
                    return true;
                }
                true // 已达上限但窗口已过
            }
        };

        // 锁定窗口已过：记录不再有意义，顺手清掉（sweep 仍负责兜底）
        if expired {
            self.attempts
                .remove_if(key, |_, entry| now - entry.last_attempt > self.lockout_window);
        }
        false
    }

    /// 剩余锁定秒数（未锁定时返回 0）
    pub fn remaining_lock_seconds(&self, key: &str) -> u64 {
        self.remaining_lock_seconds_at(key, Utc::now())
    }

    fn remaining_lock_seconds_at(&self, key: &str, now: DateTime<Utc>) -> u64 {
        match self.attempts.get(key) {
            None => 0,
            Some(entry) => {
                if entry.attempts < self.max_attempts {
                    return 0;
                }
                let remaining = self.lockout_window - (now - entry.last_attempt);
                remaining.num_seconds().max(0) as u64
            }
        }
    }

    /// 当前失败次数（无记录时返回 0），用于 "第 N 次，共 5 次" 提示
    pub fn attempt_count(&self, key: &str) -> u32 {
        self.attempts.get(key).map(|e| e.attempts).unwrap_or(0)
    }

    /// 失败次数上限
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 清理窗口已过的记录，返回清理数量
    ///
    /// 对于再也没有重试过的键，惰性解锁永远不会触达，必须靠周期
    /// 清扫来约束内存。
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.attempts.len();
        self.attempts
            .retain(|_, entry| now - entry.last_attempt <= self.lockout_window);
        let removed = before - self.attempts.len();
        if removed > 0 {
            debug!("🧹 登录记录清理: 移除 {} 个过期记录", removed);
        }
        removed
    }

    /// 当前记录数
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// 是否没有任何记录
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
