// ==========================================
// 机组排班核心 - API 层
// ==========================================
// 职责: 对外业务操作, 装配仓储与引擎
// ==========================================

pub mod eligibility_api;
pub mod error;
pub mod renewal_api;

// 重导出核心类型
pub use eligibility_api::EligibilityApi;
pub use error::{ApiError, ApiResult};
pub use renewal_api::{GenerationReport, RenewalApi, UtilizationRow};
