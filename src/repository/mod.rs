// 仓库模块 - 用户查找协作方接口及内存实现

pub mod user_repo;

pub use user_repo::{InMemoryUserRepository, UserDirectory};
