// ==========================================
// 机组排班核心 - 请假准入 API
// ==========================================
// 职责: 请假申请登记、准入试算、裁决提交、冲突重放
// 红线: 授权越权批准必须带授权人与理由
// ==========================================

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, PlanningConfigReader};
use crate::domain::crew::{Decision, LeaveRequest, OverrideAuthorization};
use crate::domain::types::LeaveStatus;
use crate::engine::crew_lock::CrewLockRegistry;
use crate::engine::eligibility::{CrewRoster, EligibilityEngine};
use crate::engine::error::PlanningError;
use crate::engine::events::OptionalHistorySink;
use crate::repository::{HistoryEventRepository, LeaveRequestRepository};

// ==========================================
// EligibilityApi - 请假准入 API
// ==========================================

/// 请假准入API
///
/// 职责：
/// 1. 登记 PENDING 申请
/// 2. 试算 / 裁决 / 按资历重放
/// 3. 授权越权批准的入参校验
pub struct EligibilityApi {
    leave_repo: Arc<LeaveRequestRepository>,
    engine: EligibilityEngine<LeaveRequestRepository, ConfigManager>,
}

impl EligibilityApi {
    /// # 参数
    /// - locks: 准入锁注册表, 同一进程内多个 API 实例必须共享
    pub fn new(
        leave_repo: Arc<LeaveRequestRepository>,
        config: Arc<ConfigManager>,
        locks: Arc<CrewLockRegistry>,
        history: OptionalHistorySink,
    ) -> Self {
        let engine = EligibilityEngine::new(leave_repo.clone(), config, locks).with_history(history);
        Self { leave_repo, engine }
    }

    /// 基于共享连接装配, 锁策略取自配置
    pub async fn from_connection(conn: Arc<Mutex<Connection>>) -> ApiResult<Self> {
        let config = ConfigManager::from_connection(conn.clone())
            .map_err(|e| ApiError::DatabaseConnectionError(e.to_string()))?;
        let policy = config
            .get_lock_policy()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        let history = Arc::new(HistoryEventRepository::from_connection(conn.clone()));

        Ok(Self::new(
            Arc::new(LeaveRequestRepository::from_connection(conn)),
            Arc::new(config),
            Arc::new(CrewLockRegistry::new(policy)),
            OptionalHistorySink::with_sink(history),
        ))
    }

    /// 登记请假申请 (PENDING)
    ///
    /// request_id 为空时生成 UUID
    pub fn submit_request(
        &self,
        request_id: Option<&str>,
        subject_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ApiResult<LeaveRequest> {
        if start >= end {
            return Err(PlanningError::InvalidDateRange { start, end }.into());
        }
        let subject = self
            .leave_repo
            .find_subject(subject_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Subject(id={})不存在", subject_id)))?;
        if !subject.active {
            return Err(ApiError::BusinessRuleViolation(format!(
                "人员已停用, 不可申请: {}",
                subject_id
            )));
        }

        let request_id = match request_id {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let request = LeaveRequest::pending(request_id, &subject, start, end);
        self.leave_repo.insert(&request)?;

        info!(request_id = %request.request_id, subject_id = %subject_id, "请假申请已登记");
        Ok(request)
    }

    /// 准入试算 (不提交)
    pub async fn check_leave_eligibility(
        &self,
        subject_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        exclude_request_id: Option<&str>,
    ) -> ApiResult<Decision> {
        Ok(self
            .engine
            .check(subject_id, start, end, exclude_request_id)
            .await?)
    }

    /// 裁决并提交
    ///
    /// # 返回
    /// - Ok(Decision): APPROVED / DENIED / CONFLICT
    /// - Err(ApiError::ConcurrencyConflict): 锁重试耗尽, 调用方可稍后重试
    pub async fn decide_request(
        &self,
        request_id: &str,
        override_auth: Option<&OverrideAuthorization>,
    ) -> ApiResult<Decision> {
        if request_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("申请ID不能为空".to_string()));
        }
        if let Some(auth) = override_auth {
            if auth.authorized_by.trim().is_empty() || auth.reason.trim().is_empty() {
                return Err(ApiError::InvalidInput(
                    "越权批准必须提供授权人与理由".to_string(),
                ));
            }
        }

        Ok(self.engine.decide(request_id, override_auth).await?)
    }

    /// 按资历重放职级内全部未决申请
    pub async fn replay_conflicts(&self, rank: &str) -> ApiResult<Vec<Decision>> {
        if rank.trim().is_empty() {
            return Err(ApiError::InvalidInput("职级不能为空".to_string()));
        }
        Ok(self.engine.replay_rank(rank).await?)
    }

    pub fn list_requests(&self, rank: &str, status: Option<LeaveStatus>) -> ApiResult<Vec<LeaveRequest>> {
        Ok(self.leave_repo.list_by_rank(rank, status)?)
    }

    pub fn get_request(&self, request_id: &str) -> ApiResult<LeaveRequest> {
        self.leave_repo
            .find_request(request_id)?
            .ok_or_else(|| ApiError::NotFound(format!("LeaveRequest(id={})不存在", request_id)))
    }
}
