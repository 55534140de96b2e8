// ==========================================
// 机组排班核心 - 请假准入引擎
// ==========================================
// 红线: 批准请假不得使职级在岗人数低于最低配员 (除非显式授权)
// 红线: 读取快照 → 裁决 → 提交 必须在同一临界区内完成
// ==========================================
// 状态机: PENDING → {APPROVED, DENIED, CONFLICT}
// CONFLICT 仍属未决, 只能由 replay_rank 按资历重新裁决
// ==========================================

use crate::config::PlanningConfigReader;
use crate::domain::crew::{CrewView, Decision, LeaveRequest, OverrideAuthorization, Subject};
use crate::domain::history::{HistoryEvent, HistoryEventType, ENTITY_LEAVE_REQUEST};
use crate::domain::types::LeaveStatus;
use crate::engine::crew_lock::CrewLockRegistry;
use crate::engine::crew_snapshot::CrewSnapshotCalculator;
use crate::engine::eligibility_core::{Contender, EligibilityCore, EvaluationInput};
use crate::engine::error::{PlanningError, PlanningResult};
use crate::engine::events::OptionalHistorySink;
use crate::repository::error::RepositoryError;
use chrono::{NaiveDate, Utc};
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, info, instrument};

// ==========================================
// CrewRoster Trait - 机组数据出入口
// ==========================================
// 实现者: LeaveRequestRepository
pub trait CrewRoster: Send + Sync {
    /// 查询人员
    fn find_subject(&self, subject_id: &str) -> Result<Option<Subject>, RepositoryError>;

    /// 查询请假申请
    fn find_request(&self, request_id: &str) -> Result<Option<LeaveRequest>, RepositoryError>;

    /// 单次一致性读取: 职级人员 + 与区间重叠的已批准/未决申请
    fn load_crew_view(
        &self,
        rank: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CrewView, RepositoryError>;

    /// 提交裁决
    ///
    /// # 返回
    /// - Ok(true): 已提交
    /// - Ok(false): 申请已不处于未决状态, 未提交
    fn commit_decision(&self, decision: &Decision) -> Result<bool, RepositoryError>;

    /// 职级全部未决申请 (按资历升序)
    fn unresolved_by_seniority(&self, rank: &str) -> Result<Vec<LeaveRequest>, RepositoryError>;
}

/// 裁决入口: 交互裁决不得重新裁决 CONFLICT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecideMode {
    Interactive,
    Replay,
}

fn config_error(e: Box<dyn Error>) -> PlanningError {
    PlanningError::Config(e.to_string())
}

// ==========================================
// EligibilityEngine - 请假准入引擎
// ==========================================
pub struct EligibilityEngine<R, C>
where
    R: CrewRoster,
    C: PlanningConfigReader,
{
    roster: Arc<R>,
    config: Arc<C>,
    locks: Arc<CrewLockRegistry>,
    history: OptionalHistorySink,
}

impl<R, C> EligibilityEngine<R, C>
where
    R: CrewRoster,
    C: PlanningConfigReader,
{
    /// 创建新的 EligibilityEngine 实例
    ///
    /// # 参数
    /// - roster: 机组数据出入口
    /// - config: 配置读取器
    /// - locks: 准入锁注册表 (同一进程内的引擎实例应共享)
    pub fn new(roster: Arc<R>, config: Arc<C>, locks: Arc<CrewLockRegistry>) -> Self {
        Self {
            roster,
            config,
            locks,
            history: OptionalHistorySink::none(),
        }
    }

    pub fn with_history(mut self, history: OptionalHistorySink) -> Self {
        self.history = history;
        self
    }

    /// 试算准入 (不提交)
    ///
    /// # 参数
    /// - subject_id: 申请人
    /// - start/end: 请假区间 (闭区间, start 必须早于 end)
    /// - exclude_request_id: 重新评估已存在的申请时排除其自身
    #[instrument(skip(self), fields(subject_id = %subject_id))]
    pub async fn check(
        &self,
        subject_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        exclude_request_id: Option<&str>,
    ) -> PlanningResult<Decision> {
        validate_range(start, end)?;
        let subject = self.active_subject(subject_id)?;
        let minimum = self.minimum_crew(&subject.rank).await?;
        let calculator = self.snapshot_calculator().await?;

        let view = self.roster.load_crew_view(&subject.rank, start, end)?;
        let decision = evaluate(
            &calculator,
            &view,
            &subject,
            exclude_request_id,
            start,
            end,
            minimum,
            None,
        );

        debug!(
            outcome = %decision.outcome,
            available = decision.snapshot.available,
            "准入试算完成"
        );
        Ok(decision)
    }

    /// 裁决并提交一条 PENDING 申请
    ///
    /// # 返回
    /// - Ok(Decision): APPROVED / DENIED / CONFLICT 均为正常结果
    /// - Err(Validation): 申请已裁决, 或处于 CONFLICT (需走 replay_rank)
    /// - Err(ConcurrencyConflict): 锁重试耗尽
    #[instrument(skip(self, override_auth), fields(request_id = %request_id))]
    pub async fn decide(
        &self,
        request_id: &str,
        override_auth: Option<&OverrideAuthorization>,
    ) -> PlanningResult<Decision> {
        self.decide_with(request_id, override_auth, DecideMode::Interactive)
            .await
    }

    async fn decide_with(
        &self,
        request_id: &str,
        override_auth: Option<&OverrideAuthorization>,
        mode: DecideMode,
    ) -> PlanningResult<Decision> {
        let request = self
            .roster
            .find_request(request_id)?
            .ok_or_else(|| PlanningError::NotFound {
                entity: "LeaveRequest".to_string(),
                id: request_id.to_string(),
            })?;

        if !request.status.is_unresolved() {
            return Err(PlanningError::Validation(format!(
                "申请已裁决: request_id={}, status={}",
                request_id, request.status
            )));
        }
        if request.status == LeaveStatus::Conflict && mode == DecideMode::Interactive {
            return Err(PlanningError::Validation(format!(
                "冲突申请只能通过重放裁决: request_id={}",
                request_id
            )));
        }
        validate_range(request.start_date, request.end_date)?;

        let subject = self.active_subject(&request.subject_id)?;
        let minimum = self.minimum_crew(&request.rank).await?;
        let calculator = self.snapshot_calculator().await?;

        // === 临界区: 读取 → 裁决 → 提交 ===
        let guard = self
            .locks
            .acquire(&request.rank, request.start_date, request.end_date)
            .await?;

        let view = self
            .roster
            .load_crew_view(&request.rank, request.start_date, request.end_date)?;
        let decision = evaluate(
            &calculator,
            &view,
            &subject,
            Some(request_id),
            request.start_date,
            request.end_date,
            minimum,
            override_auth,
        );

        if !self.roster.commit_decision(&decision)? {
            return Err(PlanningError::Validation(format!(
                "申请已被其他操作裁决: request_id={}",
                request_id
            )));
        }
        drop(guard);

        info!(
            rank = %decision.rank,
            outcome = %decision.outcome,
            remaining = decision.remaining_if_approved,
            minimum = decision.minimum_crew,
            override_applied = decision.override_applied,
            "请假裁决已提交"
        );

        self.record_history(&decision, override_auth);
        Ok(decision)
    }

    /// 按资历重放职级内全部未决申请
    ///
    /// # 返回
    /// - 本次重放产生的裁决 (资历升序)
    #[instrument(skip(self))]
    pub async fn replay_rank(&self, rank: &str) -> PlanningResult<Vec<Decision>> {
        let queue = self.roster.unresolved_by_seniority(rank)?;
        let mut decisions = Vec::with_capacity(queue.len());

        for request in queue {
            match self
                .decide_with(&request.request_id, None, DecideMode::Replay)
                .await
            {
                Ok(decision) => decisions.push(decision),
                // 重放期间被其他操作裁决的申请直接跳过
                Err(PlanningError::Validation(msg)) => {
                    debug!(request_id = %request.request_id, reason = %msg, "重放跳过");
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            rank = %rank,
            replayed = decisions.len(),
            approved = decisions.iter().filter(|d| d.is_approved()).count(),
            "冲突重放完成"
        );
        Ok(decisions)
    }

    fn active_subject(&self, subject_id: &str) -> PlanningResult<Subject> {
        let subject = self
            .roster
            .find_subject(subject_id)?
            .ok_or_else(|| PlanningError::Validation(format!("未知人员: {}", subject_id)))?;

        if !subject.active {
            return Err(PlanningError::Validation(format!("人员不在职: {}", subject_id)));
        }
        Ok(subject)
    }

    async fn minimum_crew(&self, rank: &str) -> PlanningResult<u32> {
        self.config
            .get_minimum_crew(rank)
            .await
            .map_err(config_error)?
            .ok_or_else(|| PlanningError::MissingRankMinimum(rank.to_string()))
    }

    async fn snapshot_calculator(&self) -> PlanningResult<CrewSnapshotCalculator> {
        let flag = self
            .config
            .get_renewals_remove_from_duty()
            .await
            .map_err(config_error)?;
        Ok(CrewSnapshotCalculator::new(flag))
    }

    fn record_history(&self, decision: &Decision, override_auth: Option<&OverrideAuthorization>) {
        let Some(request_id) = decision.request_id.as_deref() else {
            return;
        };

        let (event_type, actor) = match override_auth {
            Some(auth) if decision.override_applied => {
                (HistoryEventType::LeaveOverride, auth.authorized_by.as_str())
            }
            _ => (HistoryEventType::LeaveDecided, "system"),
        };

        let mut event = HistoryEvent::new(event_type, ENTITY_LEAVE_REQUEST, request_id, actor)
            .with_detail(decision.reason.clone());
        if let Ok(payload) = serde_json::to_value(decision) {
            event = event.with_payload(payload);
        }
        self.history.record_or_warn(event);
    }
}

fn validate_range(start: NaiveDate, end: NaiveDate) -> PlanningResult<()> {
    if start >= end {
        return Err(PlanningError::InvalidDateRange { start, end });
    }
    Ok(())
}

/// 基于同一视图计算快照并裁决
#[allow(clippy::too_many_arguments)]
fn evaluate(
    calculator: &CrewSnapshotCalculator,
    view: &CrewView,
    subject: &Subject,
    request_id: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
    minimum_crew: u32,
    override_auth: Option<&OverrideAuthorization>,
) -> Decision {
    let snapshot = calculator.snapshot(view, &subject.rank, start, end, request_id);
    let contenders = contenders_of(view, subject, request_id, start, end);

    EligibilityCore::evaluate(&EvaluationInput {
        request_id,
        subject_id: &subject.id,
        seniority_number: subject.seniority_number,
        snapshot,
        minimum_crew,
        contenders: &contenders,
        override_auth,
        decided_at: Utc::now(),
    })
}

/// 竞争者: 同职级、区间重叠、在职的其他人员的未决申请
fn contenders_of(
    view: &CrewView,
    subject: &Subject,
    request_id: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<Contender> {
    let mut contenders: Vec<Contender> = view
        .unresolved_requests
        .iter()
        .filter(|r| r.rank == subject.rank && r.subject_id != subject.id)
        .filter(|r| request_id.map_or(true, |id| r.request_id != id))
        .filter(|r| r.status.is_unresolved() && r.overlaps(start, end))
        .filter_map(|r| {
            view.subjects
                .iter()
                .find(|s| s.id == r.subject_id && s.active)
                .map(|s| Contender {
                    request_id: r.request_id.clone(),
                    subject_id: s.id.clone(),
                    seniority_number: s.seniority_number,
                })
        })
        .collect();

    EligibilityCore::sort_by_seniority(&mut contenders);
    contenders
}
