// ==========================================
// 机组排班核心 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 复训计划状态 (Renewal Plan Status)
// ==========================================
// 红线: 计划只能由重排(取代)或取消改变,不得静默覆盖
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Planned,   // 已排程
    Confirmed, // 已确认
    Cancelled, // 已取消
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Planned => write!(f, "PLANNED"),
            PlanStatus::Confirmed => write!(f, "CONFIRMED"),
            PlanStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl PlanStatus {
    /// 从字符串解析状态（未知值返回 None）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PLANNED" => Some(PlanStatus::Planned),
            "CONFIRMED" => Some(PlanStatus::Confirmed),
            "CANCELLED" => Some(PlanStatus::Cancelled),
            _ => None,
        }
    }

    /// 是否仍占用产能台账
    pub fn holds_capacity(&self) -> bool {
        matches!(self, PlanStatus::Planned | PlanStatus::Confirmed)
    }
}

// ==========================================
// 请假申请状态 (Leave Status)
// ==========================================
// 状态机: PENDING → {APPROVED, DENIED, CONFLICT}
// CONFLICT 仅允许由批量回放 (replay) 再次裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveStatus {
    Pending,  // 待审
    Approved, // 批准
    Denied,   // 拒绝
    Conflict, // 冲突待裁决
}

impl fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaveStatus::Pending => write!(f, "PENDING"),
            LeaveStatus::Approved => write!(f, "APPROVED"),
            LeaveStatus::Denied => write!(f, "DENIED"),
            LeaveStatus::Conflict => write!(f, "CONFLICT"),
        }
    }
}

impl LeaveStatus {
    /// 从字符串解析状态（未知值返回 None）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Some(LeaveStatus::Pending),
            "APPROVED" => Some(LeaveStatus::Approved),
            "DENIED" => Some(LeaveStatus::Denied),
            "CONFLICT" => Some(LeaveStatus::Conflict),
            _ => None,
        }
    }

    /// 未裁决（参与冲突集合）
    pub fn is_unresolved(&self) -> bool {
        matches!(self, LeaveStatus::Pending | LeaveStatus::Conflict)
    }
}

// ==========================================
// 准入裁决结果 (Decision Outcome)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Approved,
    Denied,
    Conflict,
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionOutcome::Approved => write!(f, "APPROVED"),
            DecisionOutcome::Denied => write!(f, "DENIED"),
            DecisionOutcome::Conflict => write!(f, "CONFLICT"),
        }
    }
}

impl From<DecisionOutcome> for LeaveStatus {
    fn from(outcome: DecisionOutcome) -> Self {
        match outcome {
            DecisionOutcome::Approved => LeaveStatus::Approved,
            DecisionOutcome::Denied => LeaveStatus::Denied,
            DecisionOutcome::Conflict => LeaveStatus::Conflict,
        }
    }
}

// ==========================================
// 排程诊断类型 (Diagnostic Kind)
// ==========================================
// 单条失败只进入诊断列表,不中断批次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticKind {
    UnknownCategory,  // 未配置的资质类别
    HorizonExceeded,  // 窗口完全落在排程视界之外
    BeforeAnchor,     // 窗口完全早于周期锚点
    AlreadyConfirmed, // 已有已确认计划,不再重排
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::UnknownCategory => write!(f, "UNKNOWN_CATEGORY"),
            DiagnosticKind::HorizonExceeded => write!(f, "HORIZON_EXCEEDED"),
            DiagnosticKind::BeforeAnchor => write!(f, "BEFORE_ANCHOR"),
            DiagnosticKind::AlreadyConfirmed => write!(f, "ALREADY_CONFIRMED"),
        }
    }
}
