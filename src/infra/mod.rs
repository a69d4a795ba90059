// 基础设施模块 - 后台任务

pub mod maintenance;

pub use maintenance::spawn_maintenance;
