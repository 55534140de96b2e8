// ==========================================
// 机组排班核心 - 配置层
// ==========================================
// 职责: 系统配置管理
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod grace_profile;
pub mod planning_config_trait;
pub mod settings;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use grace_profile::{DurationSpec, DurationUnit, GraceRule};
pub use planning_config_trait::PlanningConfigReader;
pub use settings::PlanningSettings;
