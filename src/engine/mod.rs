// ==========================================
// 机组排班核心 - 引擎层
// ==========================================
// 职责: 实现排程与准入规则, 不拼 SQL
// 红线: Engine 不拼 SQL, 所有裁决必须输出 reason
// ==========================================

pub mod capacity_ledger;
pub mod crew_lock;
pub mod crew_snapshot;
pub mod eligibility;
pub mod eligibility_core;
pub mod error;
pub mod events;
pub mod grace_policy;
pub mod period_calendar;
pub mod renewal_allocator;
pub mod urgency;

// 重导出核心引擎
pub use capacity_ledger::{CapacityLedger, DEFAULT_CAPACITY_PER_PERIOD};
pub use crew_lock::{CrewLockGuard, CrewLockRegistry, LockPolicy};
pub use crew_snapshot::CrewSnapshotCalculator;
pub use eligibility::{CrewRoster, EligibilityEngine};
pub use eligibility_core::{Contender, EligibilityCore, EvaluationInput, REASON_INSUFFICIENT_CREW};
pub use error::{PlanningError, PlanningResult};
pub use events::{HistorySink, NoOpHistorySink, OptionalHistorySink};
pub use grace_policy::GracePolicy;
pub use period_calendar::{PeriodCalendar, PeriodRange};
pub use renewal_allocator::{AllocationOutcome, RenewalAllocator, DEFAULT_WORKER_BATCH_SIZE};
pub use urgency::UrgencyScorer;
