/// 按来源 IP 的请求限流器
///
/// 核心特性：
/// 1. token bucket：容量即突发上限，稳态按速率补充（默认 100/分钟）
/// 2. sharded bucket 存储，不同 key 互不竞争
/// 3. 额外维护一个仅用于响应头的请求计数（advisory，不参与准入判定）
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::SecurityConfig;

/// 未知/畸形来源统一落到的共享匿名键
pub const ANONYMOUS_KEY: &str = "anonymous";

/// 令牌桶（单个来源）
#[derive(Debug)]
struct TokenBucket {
    /// 当前令牌数
    tokens: f64,
    /// 桶容量
    capacity: f64,
    /// 每秒补充速率
    refill_rate: f64,
    /// 最后补充时间
    last_refill: Instant,
    /// 请求计数（仅用于 X-Rate-Limit-Remaining，不是准入依据）
    request_count: u64,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
            request_count: 0,
        }
    }

    /// 尝试消耗一个令牌；拒绝时不扣减、不计数
    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.request_count += 1;
            true
        } else {
            false
        }
    }

    /// 按流逝时间比例补充令牌，上限为容量（绝不超填）
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// 分片桶存储（减少锁竞争）
const SHARD_COUNT: usize = 16;

struct ShardedBuckets {
    shards: [Mutex<HashMap<String, TokenBucket>>; SHARD_COUNT],
}

impl ShardedBuckets {
    fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(HashMap::new())),
        }
    }

    fn shard_for(&self, key: &str) -> &Mutex<HashMap<String, TokenBucket>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }
}

/// IP 限流器
pub struct RateLimiter {
    buckets: ShardedBuckets,
    /// 每分钟请求上限（同时作为桶容量）
    limit: u32,
    /// 每秒补充速率
    refill_rate: f64,
    /// 空闲桶回收 TTL
    bucket_ttl: Duration,
}

impl RateLimiter {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            buckets: ShardedBuckets::new(),
            limit: config.rate_limit_per_minute,
            refill_rate: config.refill_rate_per_sec(),
            bucket_ttl: Duration::from_secs(config.rate_bucket_ttl_secs),
        }
    }

    /// 尝试准入一次请求
    ///
    /// 首次见到的 key 惰性创建满容量的桶（entry API 保证并发首访
    /// 只产生一个桶）。返回 true 表示放行。不会 panic。
    pub fn try_acquire(&self, key: &str) -> bool {
        let key = normalize_key(key);
        let shard = self.buckets.shard_for(key);
        let mut buckets = shard.lock();

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.limit as f64, self.refill_rate));

        bucket.try_consume()
    }

    /// 配置的请求上限（X-Rate-Limit-Limit）
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// advisory 剩余配额（X-Rate-Limit-Remaining）
    ///
    /// 基于请求计数而非桶内令牌：突发场景下与真实剩余容量可能漂移，
    /// 只作为给客户端的参考值，准入完全由令牌桶决定。
    pub fn remaining(&self, key: &str) -> u32 {
        let key = normalize_key(key);
        let shard = self.buckets.shard_for(key);
        let buckets = shard.lock();

        match buckets.get(key) {
            Some(bucket) => {
                let count = bucket.request_count.min(u64::from(self.limit));
                self.limit - count as u32
            }
            None => self.limit,
        }
    }

    /// 回收空闲超过 TTL 的桶，返回回收数量
    ///
    /// 一次性来源和已放弃的客户端不会再触发 refill，必须周期清扫
    /// 才能约束内存。
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        let now = Instant::now();

        for shard in &self.buckets.shards {
            let mut buckets = shard.lock();
            let before = buckets.len();
            buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < self.bucket_ttl);
            removed += before - buckets.len();
        }

        if removed > 0 {
            debug!("🧹 限流桶清理: 移除 {} 个空闲桶", removed);
        }
        removed
    }

    /// 当前桶数量
    pub fn bucket_count(&self) -> usize {
        self.buckets
            .shards
            .iter()
            .map(|shard| shard.lock().len())
            .sum()
    }
}

/// 空白来源键统一折叠到共享匿名键
fn normalize_key(key: &str) -> &str {
    let key = key.trim();
    if key.is_empty() {
        ANONYMOUS_KEY
    } else {
        key
    }
}
