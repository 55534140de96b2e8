// ==========================================
// 机组排班核心 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod capacity;
pub mod crew;
pub mod history;
pub mod period;
pub mod renewal;
pub mod types;

// 重导出核心类型
pub use capacity::{CapacityConstraint, LedgerEntry, LedgerKey, ReserveOutcome};
pub use crew::{CrewSnapshot, CrewView, Decision, LeaveRequest, OverrideAuthorization, Subject};
pub use history::{HistoryEvent, HistoryEventType};
pub use period::{Period, YearRollover};
pub use renewal::{Diagnostic, PendingArtifact, RenewalPlan, RenewalWindow};
pub use types::{DecisionOutcome, DiagnosticKind, LeaveStatus, PlanStatus};
