// ==========================================
// 机组排班核心 - 核心库
// ==========================================
// 职责: 资质复训排程 (RenewalAllocator) + 请假准入 (EligibilityEngine)
// 技术栈: Rust + SQLite
// 系统定位: 排程/准入核心, 存储/展示/通知均为外部协作方
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 外部协作方的 SQLite 实现
pub mod repository;

// 引擎层 - 排程与准入规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 对外操作
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::types::{DecisionOutcome, DiagnosticKind, LeaveStatus, PlanStatus};

pub use domain::{
    CrewSnapshot, Decision, Diagnostic, HistoryEvent, LeaveRequest, LedgerEntry, PendingArtifact,
    Period, RenewalPlan, RenewalWindow, Subject, YearRollover,
};

pub use engine::{
    CapacityLedger, CrewLockRegistry, CrewSnapshotCalculator, EligibilityCore, EligibilityEngine,
    GracePolicy, PeriodCalendar, PlanningError, RenewalAllocator, UrgencyScorer,
};

pub use api::{ApiError, EligibilityApi, RenewalApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "机组排班核心";

// 数据库版本
pub const DB_VERSION: &str = "v0.1";
