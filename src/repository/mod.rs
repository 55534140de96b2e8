// ==========================================
// 机组排班核心 - 仓储层
// ==========================================
// 职责: 数据访问, 不含业务逻辑
// 连接: 同一数据库的仓储共享 Arc<Mutex<Connection>>
// ==========================================

pub mod artifact_repo;
pub mod capacity_ledger_repo;
pub mod error;
pub mod history_repo;
pub mod leave_request_repo;
pub mod renewal_plan_repo;
pub mod subject_repo;

// 重导出核心仓储
pub use artifact_repo::ArtifactRepository;
pub use capacity_ledger_repo::CapacityLedgerRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use history_repo::HistoryEventRepository;
pub use leave_request_repo::LeaveRequestRepository;
pub use renewal_plan_repo::{PlanRetirement, RenewalPlanRepository};
pub use subject_repo::SubjectRepository;
