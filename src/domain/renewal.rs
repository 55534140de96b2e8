// ==========================================
// 机组排班核心 - 资质复训领域模型
// ==========================================
// 红线: window_start <= planned_date <= window_end
// 红线: 计划不得静默覆盖, 取代必须记录历史事件
// ==========================================

use crate::domain::types::{DiagnosticKind, PlanStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// PendingArtifact - 待复训资质 (外部只读输入)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingArtifact {
    pub subject_id: String,
    pub category: String,
    pub expiry_date: NaiveDate,
}

impl PendingArtifact {
    pub fn new(subject_id: impl Into<String>, category: impl Into<String>, expiry_date: NaiveDate) -> Self {
        Self {
            subject_id: subject_id.into(),
            category: category.into(),
            expiry_date,
        }
    }
}

// ==========================================
// RenewalWindow - 复训窗口
// ==========================================
// 仅用于排程建议, 不代表合规判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalWindow {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
}

impl RenewalWindow {
    /// 将日期钳制到窗口内
    pub fn clamp(&self, date: NaiveDate) -> NaiveDate {
        self.window_start.max(date.min(self.window_end))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.window_start <= date && date <= self.window_end
    }
}

// ==========================================
// RenewalPlan - 复训计划
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalPlan {
    // ===== 主键 =====
    pub plan_id: String,

    // ===== 来源资质 =====
    pub subject_id: String,
    pub category: String,
    pub original_expiry: NaiveDate,

    // ===== 窗口与落位 =====
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub planned_period: String, // 周期代码
    pub planned_date: NaiveDate,

    // ===== 展示与风险 =====
    pub priority: u32,  // 紧迫度分值, 仅用于展示/排序
    pub overflow: bool, // 产能超限软标记

    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

impl RenewalPlan {
    pub fn window(&self) -> RenewalWindow {
        RenewalWindow {
            window_start: self.window_start,
            window_end: self.window_end,
        }
    }

    /// 用于幂等比较的业务键 (不含 plan_id / created_at)
    pub fn allocation_key(&self) -> (String, String, NaiveDate, String, NaiveDate, u32, bool) {
        (
            self.subject_id.clone(),
            self.category.clone(),
            self.original_expiry,
            self.planned_period.clone(),
            self.planned_date,
            self.priority,
            self.overflow,
        )
    }
}

// ==========================================
// Diagnostic - 排程诊断
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub subject_id: String,
    pub category: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn for_artifact(artifact: &PendingArtifact, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            subject_id: artifact.subject_id.clone(),
            category: artifact.category.clone(),
            kind,
            message: message.into(),
        }
    }
}
