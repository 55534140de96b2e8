// ==========================================
// 机组排班核心 - 机组人员与请假领域模型
// ==========================================
// 红线: 批准请假不得使某职级在岗人数低于最低配员
// seniority_number 越小越资深
// ==========================================

use crate::domain::types::{DecisionOutcome, LeaveStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Subject - 机组人员 (外部只读)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub rank: String,
    pub seniority_number: i64,
    pub active: bool,
}

// ==========================================
// LeaveRequest - 请假申请
// ==========================================
// 由外部以 PENDING 创建, 仅 EligibilityEngine 可迁移状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub request_id: String,
    pub subject_id: String,
    pub rank: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: LeaveStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub conflict_with: Vec<String>,
    pub decision_reason: Option<String>,
}

impl LeaveRequest {
    /// 新建 PENDING 申请
    pub fn pending(
        request_id: impl Into<String>,
        subject: &Subject,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            subject_id: subject.id.clone(),
            rank: subject.rank.clone(),
            start_date,
            end_date,
            status: LeaveStatus::Pending,
            decided_at: None,
            conflict_with: Vec::new(),
            decision_reason: None,
        }
    }

    /// 与闭区间 [start, end] 是否重叠
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && start <= self.end_date
    }
}

// ==========================================
// CrewView - 单次一致性读取的机组视图
// ==========================================
// 同一职级的人员 + 已批准请假 + 已确认复训占用日
// 由仓储在一次读取内构造, 避免混合提交前后的状态
#[derive(Debug, Clone, Default)]
pub struct CrewView {
    pub subjects: Vec<Subject>,
    pub approved_leaves: Vec<LeaveRequest>,
    pub unresolved_requests: Vec<LeaveRequest>,
    pub confirmed_renewals: Vec<(String, NaiveDate)>, // (subject_id, planned_date)
}

// ==========================================
// CrewSnapshot - 在岗快照 (派生, 不持久化)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewSnapshot {
    pub rank: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub total_active: u32,
    pub committed: u32,
    pub available: u32,
}

// ==========================================
// OverrideAuthorization - 人工授权越权批准
// ==========================================
// 外部显式授权动作, 不会自动触发
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideAuthorization {
    pub authorized_by: String,
    pub reason: String,
}

// ==========================================
// Decision - 准入裁决
// ==========================================
// DENIED/CONFLICT 是预期结果, 不是错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub request_id: Option<String>,
    pub subject_id: String,
    pub rank: String,
    pub outcome: DecisionOutcome,
    pub reason: String,
    pub snapshot: CrewSnapshot,
    pub remaining_if_approved: i64,
    pub minimum_crew: u32,
    pub conflict_with: Vec<String>,
    pub override_applied: bool,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        self.outcome == DecisionOutcome::Approved
    }
}
