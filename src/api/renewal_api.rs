// ==========================================
// 机组排班核心 - 复训排程 API
// ==========================================
// 职责: 生成复训计划、计划确认/取消、产能利用率查询
// 红线: 计划写入与台账写入同一事务提交
// 红线: 旧计划被取代/清空必须产生历史事件
// ==========================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, PlanningSettings};
use crate::domain::capacity::CapacityConstraint;
use crate::domain::history::{HistoryEvent, HistoryEventType, ENTITY_RENEWAL_PLAN};
use crate::domain::renewal::{Diagnostic, PendingArtifact, RenewalPlan};
use crate::domain::types::{DiagnosticKind, PlanStatus};
use crate::engine::capacity_ledger::CapacityLedger;
use crate::engine::error::PlanningError;
use crate::engine::events::OptionalHistorySink;
use crate::engine::renewal_allocator::AllocationOutcome;
use crate::repository::renewal_plan_repo::PlanRetirement;
use crate::repository::{
    ArtifactRepository, CapacityLedgerRepository, HistoryEventRepository, RenewalPlanRepository,
};

const ACTOR_SYSTEM: &str = "system";

type PlanKey = (String, String); // (subject_id, category)

// ==========================================
// DTO
// ==========================================

/// 排程生成结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationReport {
    pub plans: Vec<RenewalPlan>,
    pub diagnostics: Vec<Diagnostic>,
    /// 被新计划取代的旧 PLANNED 计划
    pub superseded_plan_ids: Vec<String>,
    /// clear_existing 清空的旧 PLANNED 计划
    pub cleared_plan_ids: Vec<String>,
    /// 是否因取消提前结束
    pub cancelled: bool,
}

impl GenerationReport {
    pub fn overflow_count(&self) -> usize {
        self.plans.iter().filter(|p| p.overflow).count()
    }
}

/// 周期×类别的利用率行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationRow {
    pub period_code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub category: String,
    pub capacity: u32,
    pub reserved: u32,
    pub utilization: f64,
    pub overflow: bool,
}

/// 分配方式
enum AllocationMode {
    /// 顺序分配, 结果可复现
    Sequential,
    /// 分组并发, 可取消
    Partitioned(Arc<AtomicBool>),
}

// ==========================================
// RenewalApi - 复训排程 API
// ==========================================

/// 复训排程API
///
/// 职责：
/// 1. 生成复训计划（取代/清空旧计划）
/// 2. 计划确认、取消（释放台账）
/// 3. 产能利用率查询与周期专属产能设置
pub struct RenewalApi {
    config: Arc<ConfigManager>,
    artifact_repo: Arc<ArtifactRepository>,
    plan_repo: Arc<RenewalPlanRepository>,
    ledger_repo: Arc<CapacityLedgerRepository>,
    history: OptionalHistorySink,
}

impl RenewalApi {
    pub fn new(
        config: Arc<ConfigManager>,
        artifact_repo: Arc<ArtifactRepository>,
        plan_repo: Arc<RenewalPlanRepository>,
        ledger_repo: Arc<CapacityLedgerRepository>,
        history: OptionalHistorySink,
    ) -> Self {
        Self {
            config,
            artifact_repo,
            plan_repo,
            ledger_repo,
            history,
        }
    }

    /// 基于共享连接装配 (历史事件写入同库)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ApiResult<Self> {
        let config = ConfigManager::from_connection(conn.clone())
            .map_err(|e| ApiError::DatabaseConnectionError(e.to_string()))?;
        let history = Arc::new(HistoryEventRepository::from_connection(conn.clone()));

        Ok(Self::new(
            Arc::new(config),
            Arc::new(ArtifactRepository::from_connection(conn.clone())),
            Arc::new(RenewalPlanRepository::from_connection(conn.clone())),
            Arc::new(CapacityLedgerRepository::from_connection(conn)),
            OptionalHistorySink::with_sink(history),
        ))
    }

    async fn settings(&self) -> ApiResult<PlanningSettings> {
        Ok(PlanningSettings::load(self.config.as_ref()).await?)
    }

    // ==========================================
    // 排程生成
    // ==========================================

    /// 生成复训计划（顺序分配, 相同输入结果一致）
    ///
    /// # 参数
    /// - horizon_months: 排程视界（月）
    /// - categories: 类别过滤（空 = 全部）
    /// - clear_existing: 先清空范围内的 PLANNED 计划与台账占用
    /// - today: 视界起点与紧迫度基准日
    ///
    /// # 返回
    /// - Ok(GenerationReport): 新计划 + 诊断（单条失败不终止批次）
    /// - Err(ApiError::ConfigError): 配置错误, 台账不变
    pub async fn generate_renewal_plan(
        &self,
        horizon_months: u32,
        categories: &[String],
        clear_existing: bool,
        today: NaiveDate,
    ) -> ApiResult<GenerationReport> {
        self.run_generation(horizon_months, categories, clear_existing, today, AllocationMode::Sequential)
            .await
    }

    /// 分组并发生成复训计划
    ///
    /// cancel 置位后停止分配, 已完成部分与台账一并提交
    pub async fn generate_renewal_plan_partitioned(
        &self,
        horizon_months: u32,
        categories: &[String],
        clear_existing: bool,
        today: NaiveDate,
        cancel: Arc<AtomicBool>,
    ) -> ApiResult<GenerationReport> {
        self.run_generation(
            horizon_months,
            categories,
            clear_existing,
            today,
            AllocationMode::Partitioned(cancel),
        )
        .await
    }

    #[instrument(skip(self, categories, mode), fields(categories = categories.len()))]
    async fn run_generation(
        &self,
        horizon_months: u32,
        categories: &[String],
        clear_existing: bool,
        today: NaiveDate,
        mode: AllocationMode,
    ) -> ApiResult<GenerationReport> {
        if horizon_months == 0 {
            return Err(ApiError::InvalidInput("排程视界必须大于 0 个月".to_string()));
        }

        let settings = self.settings().await?;
        let allocator = settings.allocator();
        let filter = (!categories.is_empty()).then_some(categories);
        let in_scope = |category: &str| filter.map_or(true, |cs| cs.iter().any(|c| c == category));

        let artifacts = self.artifact_repo.list_pending(None, filter)?;
        let planned = self.plan_repo.list_by_status(Some(PlanStatus::Planned))?;
        let confirmed = self.plan_repo.list_by_status(Some(PlanStatus::Confirmed))?;

        let ledger = Arc::new(CapacityLedger::from_entries(
            settings.default_capacity,
            settings.category_capacity.clone(),
            self.ledger_repo.load_entries()?,
        ));

        // === 已确认的资质不重排 ===
        let confirmed_keys: HashSet<PlanKey> = confirmed
            .iter()
            .map(|p| (p.subject_id.clone(), p.category.clone()))
            .collect();
        let mut diagnostics = Vec::new();
        let mut to_allocate: Vec<PendingArtifact> = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            if confirmed_keys.contains(&(artifact.subject_id.clone(), artifact.category.clone())) {
                diagnostics.push(Diagnostic::for_artifact(
                    &artifact,
                    DiagnosticKind::AlreadyConfirmed,
                    "已存在 CONFIRMED 计划, 跳过重排",
                ));
            } else {
                to_allocate.push(artifact);
            }
        }

        // === 清空 or 取代 ===
        let mut retired: Vec<PlanRetirement> = Vec::new();
        let mut cleared_plan_ids = Vec::new();
        let mut prior: HashMap<PlanKey, RenewalPlan> = HashMap::new();

        if clear_existing {
            for plan in planned.iter().filter(|p| in_scope(&p.category)) {
                retired.push(PlanRetirement {
                    plan_id: plan.plan_id.clone(),
                    from: PlanStatus::Planned,
                });
                cleared_plan_ids.push(plan.plan_id.clone());
            }
            ledger.clear_reservations(filter)?;
            // 已确认计划继续占用台账
            for plan in confirmed.iter().filter(|p| in_scope(&p.category)) {
                ledger.reserve(&plan.planned_period, &plan.category, 1)?;
            }
        } else {
            let pending_keys: HashSet<PlanKey> = to_allocate
                .iter()
                .map(|a| (a.subject_id.clone(), a.category.clone()))
                .collect();
            for plan in planned {
                let key = (plan.subject_id.clone(), plan.category.clone());
                if pending_keys.contains(&key) {
                    ledger.release(&plan.planned_period, &plan.category, 1)?;
                    prior.insert(key, plan);
                }
            }
        }

        // === 分配 ===
        let outcome: AllocationOutcome = match mode {
            AllocationMode::Sequential => {
                allocator.allocate(&to_allocate, horizon_months, None, &ledger, today)?
            }
            AllocationMode::Partitioned(cancel) => {
                allocator
                    .allocate_partitioned(
                        &to_allocate,
                        horizon_months,
                        None,
                        ledger.clone(),
                        today,
                        settings.worker_batch_size,
                        cancel,
                    )
                    .await?
            }
        };

        // === 取代: 有新计划的旧计划退役, 其余恢复占用 ===
        let mut superseded: Vec<(String, String)> = Vec::new(); // (old, new)
        for plan in &outcome.plans {
            if let Some(old) = prior.remove(&(plan.subject_id.clone(), plan.category.clone())) {
                retired.push(PlanRetirement {
                    plan_id: old.plan_id.clone(),
                    from: PlanStatus::Planned,
                });
                superseded.push((old.plan_id, plan.plan_id.clone()));
            }
        }
        for old in prior.values() {
            ledger.reserve(&old.planned_period, &old.category, 1)?;
        }

        // === 单事务提交 ===
        self.plan_repo
            .commit_allocation(&retired, &outcome.plans, &ledger.entries()?)?;

        self.record_generation_history(&outcome.plans, &superseded, &cleared_plan_ids);

        diagnostics.extend(outcome.diagnostics);
        let report = GenerationReport {
            plans: outcome.plans,
            diagnostics,
            superseded_plan_ids: superseded.into_iter().map(|(old, _)| old).collect(),
            cleared_plan_ids,
            cancelled: outcome.cancelled,
        };

        info!(
            planned = report.plans.len(),
            overflow = report.overflow_count(),
            diagnostics = report.diagnostics.len(),
            superseded = report.superseded_plan_ids.len(),
            cleared = report.cleared_plan_ids.len(),
            cancelled = report.cancelled,
            "复训计划已提交"
        );
        Ok(report)
    }

    fn record_generation_history(
        &self,
        plans: &[RenewalPlan],
        superseded: &[(String, String)],
        cleared: &[String],
    ) {
        for plan_id in cleared {
            self.history.record_or_warn(
                HistoryEvent::new(HistoryEventType::PlanCancelled, ENTITY_RENEWAL_PLAN, plan_id.clone(), ACTOR_SYSTEM)
                    .with_detail("clear_existing"),
            );
        }
        for (old, new) in superseded {
            self.history.record_or_warn(
                HistoryEvent::new(HistoryEventType::PlanSuperseded, ENTITY_RENEWAL_PLAN, old.clone(), ACTOR_SYSTEM)
                    .with_payload(serde_json::json!({ "superseded_by": new })),
            );
        }
        for plan in plans {
            let mut event =
                HistoryEvent::new(HistoryEventType::PlanCreated, ENTITY_RENEWAL_PLAN, plan.plan_id.clone(), ACTOR_SYSTEM);
            match serde_json::to_value(plan) {
                Ok(payload) => event = event.with_payload(payload),
                Err(e) => warn!(plan_id = %plan.plan_id, error = %e, "计划序列化失败"),
            }
            if plan.overflow {
                event = event.with_detail("capacity overflow");
            }
            self.history.record_or_warn(event);
        }
    }

    // ==========================================
    // 计划生命周期
    // ==========================================

    pub fn list_plans(&self, status: Option<PlanStatus>) -> ApiResult<Vec<RenewalPlan>> {
        Ok(self.plan_repo.list_by_status(status)?)
    }

    fn find_plan(&self, plan_id: &str) -> ApiResult<RenewalPlan> {
        if plan_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("计划ID不能为空".to_string()));
        }
        self.plan_repo
            .find_by_id(plan_id)?
            .ok_or_else(|| ApiError::NotFound(format!("RenewalPlan(id={})不存在", plan_id)))
    }

    /// 确认计划 (PLANNED → CONFIRMED)
    pub fn confirm_plan(&self, plan_id: &str, actor: &str) -> ApiResult<RenewalPlan> {
        let plan = self.find_plan(plan_id)?;
        if plan.status != PlanStatus::Planned {
            return Err(ApiError::InvalidStateTransition {
                from: plan.status.to_string(),
                to: PlanStatus::Confirmed.to_string(),
            });
        }

        self.plan_repo.confirm(plan_id)?;
        self.history.record_or_warn(HistoryEvent::new(
            HistoryEventType::PlanConfirmed,
            ENTITY_RENEWAL_PLAN,
            plan_id,
            actor,
        ));
        info!(plan_id = %plan_id, actor = %actor, "复训计划已确认");
        self.find_plan(plan_id)
    }

    /// 取消计划 (PLANNED/CONFIRMED → CANCELLED), 同事务释放台账单位
    pub fn cancel_plan(&self, plan_id: &str, actor: &str, reason: &str) -> ApiResult<RenewalPlan> {
        let plan = self.find_plan(plan_id)?;
        if !plan.status.holds_capacity() {
            return Err(ApiError::InvalidStateTransition {
                from: plan.status.to_string(),
                to: PlanStatus::Cancelled.to_string(),
            });
        }

        self.plan_repo.cancel(&plan)?;
        self.history.record_or_warn(
            HistoryEvent::new(HistoryEventType::PlanCancelled, ENTITY_RENEWAL_PLAN, plan_id, actor)
                .with_detail(reason),
        );
        info!(plan_id = %plan_id, actor = %actor, "复训计划已取消");
        self.find_plan(plan_id)
    }

    // ==========================================
    // 产能查询
    // ==========================================

    /// 周期×类别利用率 reserved / capacity
    pub async fn get_utilization(&self, period_code: &str, category: &str) -> ApiResult<f64> {
        let settings = self.settings().await?;
        settings.calendar.period_by_code(period_code)?;
        Self::ensure_category(&settings, category)?;

        let utilization = match self.ledger_repo.find(period_code, category)? {
            Some(entry) => entry.utilization(),
            None => settings.new_ledger().utilization(period_code, category)?,
        };
        Ok(utilization)
    }

    /// 区间内逐周期利用率报表
    pub async fn utilization_report(
        &self,
        category: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ApiResult<Vec<UtilizationRow>> {
        if start > end {
            return Err(PlanningError::InvalidDateRange { start, end }.into());
        }
        let settings = self.settings().await?;
        Self::ensure_category(&settings, category)?;

        let ledger = CapacityLedger::from_entries(
            settings.default_capacity,
            settings.category_capacity.clone(),
            self.ledger_repo.load_entries()?,
        );

        let mut rows = Vec::new();
        for period in settings.calendar.periods_in_range(start, end)? {
            let (capacity, reserved, overflow) = match ledger.entry(&period.code, category)? {
                Some(entry) => (entry.capacity, entry.reserved, entry.overflow),
                None => (ledger.default_capacity_for(category), 0, false),
            };
            rows.push(UtilizationRow {
                utilization: ledger.utilization(&period.code, category)?,
                period_code: period.code,
                start_date: period.start_date,
                end_date: period.end_date,
                category: category.to_string(),
                capacity,
                reserved,
                overflow,
            });
        }
        Ok(rows)
    }

    /// 设置周期×类别专属产能
    pub async fn set_period_capacity(&self, period_code: &str, category: &str, capacity: u32) -> ApiResult<()> {
        let settings = self.settings().await?;
        settings.calendar.period_by_code(period_code)?;
        self.ledger_repo.set_capacity(period_code, category, capacity)?;
        info!(period = %period_code, category = %category, capacity, "周期专属产能已设置");
        Ok(())
    }

    fn ensure_category(settings: &PlanningSettings, category: &str) -> ApiResult<()> {
        if settings.grace_policy.knows(category) || settings.category_capacity.contains_key(category) {
            Ok(())
        } else {
            Err(PlanningError::UnknownCategory(category.to_string()).into())
        }
    }
}
