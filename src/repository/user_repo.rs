use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::auth::models::{User, UserRole};
use crate::error::{Result, ServerError};

/// 用户目录（principal 查找协作方）
///
/// 认证核心只在签发和刷新时通过这个接口按邮箱查找用户，自己不
/// 持久化任何账号数据。生产部署把它接到真正的用户存储上。
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 按邮箱查找用户
    async fn find_by_email(&self, email: &str) -> Option<User>;
}

/// 内存用户仓库
///
/// 进程内的 UserDirectory 实现，用于独立部署和测试。
pub struct InMemoryUserRepository {
    /// email -> User
    users: DashMap<String, User>,
    next_id: AtomicI64,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// 创建用户（邮箱唯一，重复时报 DuplicateEntry）
    pub fn create(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: UserRole,
    ) -> Result<User> {
        match self.users.entry(email.to_string()) {
            Entry::Occupied(_) => Err(ServerError::DuplicateEntry(format!(
                "邮箱已注册: {}",
                email
            ))),
            Entry::Vacant(vacant) => {
                let user = User {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    name: name.to_string(),
                    email: email.to_string(),
                    password_hash: password_hash.to_string(),
                    role,
                    active: true,
                    created_at: Utc::now(),
                };
                vacant.insert(user.clone());
                Ok(user)
            }
        }
    }

    /// 启用/停用用户
    pub fn set_active(&self, email: &str, active: bool) -> bool {
        match self.users.get_mut(email) {
            Some(mut user) => {
                user.active = active;
                true
            }
            None => false,
        }
    }

    /// 用户数量
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Option<User> {
        self.users.get(email).map(|user| user.clone())
    }
}
