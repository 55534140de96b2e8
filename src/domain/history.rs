// ==========================================
// 机组排班核心 - 历史事件领域模型
// ==========================================
// 红线: 计划取代/取消、准入裁决都必须产生历史事件
// 用途: 交由外部审计协作方存储
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

// ==========================================
// HistoryEvent - 历史事件
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: String,
    pub event_type: HistoryEventType,
    pub entity_type: String, // RENEWAL_PLAN / LEAVE_REQUEST
    pub entity_id: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: String,
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

impl HistoryEvent {
    pub fn new(
        event_type: HistoryEventType,
        entity_type: &str,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.into(),
            occurred_at: Utc::now(),
            actor: actor.into(),
            payload_json: None,
            detail: None,
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload_json = Some(payload);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// 实体类型常量
pub const ENTITY_RENEWAL_PLAN: &str = "RENEWAL_PLAN";
pub const ENTITY_LEAVE_REQUEST: &str = "LEAVE_REQUEST";

// ==========================================
// HistoryEventType - 事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEventType {
    PlanCreated,    // 新建复训计划
    PlanSuperseded, // 重排取代旧计划
    PlanConfirmed,  // 计划确认
    PlanCancelled,  // 计划取消
    LeaveDecided,   // 请假裁决
    LeaveOverride,  // 授权越权批准
}

impl HistoryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryEventType::PlanCreated => "PLAN_CREATED",
            HistoryEventType::PlanSuperseded => "PLAN_SUPERSEDED",
            HistoryEventType::PlanConfirmed => "PLAN_CONFIRMED",
            HistoryEventType::PlanCancelled => "PLAN_CANCELLED",
            HistoryEventType::LeaveDecided => "LEAVE_DECIDED",
            HistoryEventType::LeaveOverride => "LEAVE_OVERRIDE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLAN_CREATED" => Some(HistoryEventType::PlanCreated),
            "PLAN_SUPERSEDED" => Some(HistoryEventType::PlanSuperseded),
            "PLAN_CONFIRMED" => Some(HistoryEventType::PlanConfirmed),
            "PLAN_CANCELLED" => Some(HistoryEventType::PlanCancelled),
            "LEAVE_DECIDED" => Some(HistoryEventType::LeaveDecided),
            "LEAVE_OVERRIDE" => Some(HistoryEventType::LeaveOverride),
            _ => None,
        }
    }
}

impl fmt::Display for HistoryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
