// ==========================================
// 机组排班核心 - 复训排程分配引擎
// ==========================================
// 职责: 将待复训资质按负载均衡分配到排班周期
// 输入: 待复训资质 + 宽限策略 + 产能台账 + 周期日历
// 输出: RenewalPlan 列表 + 诊断列表
// ==========================================
// 规则 (逐条, 按到期日升序):
// 1) 宽限策略计算窗口
// 2) 候选周期 = [max(window_start, anchor, today), min(window_end, horizon_end)]
//    窗口已整体早于 today → HORIZON_EXCEEDED
// 3) 选利用率最低的周期, 平局取起始日最早者
// 4) 占用 1 个单位, 记录 overflow
// 5) planned_date = clamp(period_start, max(window_start, today), window_end)
// 6) priority = 紧迫度分值 (仅展示用)
// 红线: 单条失败只进诊断, 不中断批次
// ==========================================

use crate::domain::period::Period;
use crate::domain::renewal::{Diagnostic, PendingArtifact, RenewalPlan};
use crate::domain::types::{DiagnosticKind, PlanStatus};
use crate::engine::capacity_ledger::CapacityLedger;
use crate::engine::error::{PlanningError, PlanningResult};
use crate::engine::grace_policy::GracePolicy;
use crate::engine::period_calendar::PeriodCalendar;
use crate::engine::urgency::UrgencyScorer;
use chrono::{Months, NaiveDate, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 默认并发分组大小
pub const DEFAULT_WORKER_BATCH_SIZE: usize = 10;

// ==========================================
// AllocationOutcome - 分配结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct AllocationOutcome {
    pub plans: Vec<RenewalPlan>,
    pub diagnostics: Vec<Diagnostic>,
    /// 是否因取消而提前结束（已产生的计划与台账保持一致）
    pub cancelled: bool,
}

/// 单条资质的处理结果
#[derive(Debug, Clone)]
enum ArtifactOutcome {
    Planned(RenewalPlan),
    Skipped(Diagnostic),
}

// ==========================================
// RenewalAllocator - 复训分配引擎
// ==========================================
#[derive(Debug, Clone)]
pub struct RenewalAllocator {
    calendar: PeriodCalendar,
    grace_policy: GracePolicy,
    scorer: UrgencyScorer,
}

impl RenewalAllocator {
    pub fn new(calendar: PeriodCalendar, grace_policy: GracePolicy) -> Self {
        Self {
            calendar,
            grace_policy,
            scorer: UrgencyScorer::new(),
        }
    }

    pub fn calendar(&self) -> &PeriodCalendar {
        &self.calendar
    }

    pub fn grace_policy(&self) -> &GracePolicy {
        &self.grace_policy
    }

    /// 视界终点 = today + horizon_months（月末自动收敛）
    pub fn horizon_end(today: NaiveDate, horizon_months: u32) -> PlanningResult<NaiveDate> {
        today
            .checked_add_months(Months::new(horizon_months))
            .ok_or_else(|| PlanningError::Validation(format!("视界月数溢出: {}", horizon_months)))
    }

    /// 过滤类别并按 (到期日, subject_id, category) 升序排列
    ///
    /// 空过滤列表视为不过滤
    pub fn prepare(artifacts: &[PendingArtifact], category_filter: Option<&[String]>) -> Vec<PendingArtifact> {
        let mut selected: Vec<PendingArtifact> = artifacts
            .iter()
            .filter(|a| match category_filter {
                Some(categories) if !categories.is_empty() => categories.contains(&a.category),
                _ => true,
            })
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            a.expiry_date
                .cmp(&b.expiry_date)
                .then_with(|| a.subject_id.cmp(&b.subject_id))
                .then_with(|| a.category.cmp(&b.category))
        });
        selected
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 顺序分配（结果可复现）
    ///
    /// 相同的 (资质, 台账状态, 视界, today) 产生相同的计划序列
    #[instrument(skip(self, artifacts, category_filter, ledger), fields(
        artifact_count = artifacts.len(),
        horizon_months = horizon_months
    ))]
    pub fn allocate(
        &self,
        artifacts: &[PendingArtifact],
        horizon_months: u32,
        category_filter: Option<&[String]>,
        ledger: &CapacityLedger,
        today: NaiveDate,
    ) -> PlanningResult<AllocationOutcome> {
        let horizon_end = Self::horizon_end(today, horizon_months)?;
        let ordered = Self::prepare(artifacts, category_filter);

        let mut outcome = AllocationOutcome::default();
        for artifact in &ordered {
            match self.allocate_one(artifact, horizon_end, ledger, today)? {
                ArtifactOutcome::Planned(plan) => outcome.plans.push(plan),
                ArtifactOutcome::Skipped(diagnostic) => outcome.diagnostics.push(diagnostic),
            }
        }

        info!(
            planned = outcome.plans.len(),
            skipped = outcome.diagnostics.len(),
            overflow = outcome.plans.iter().filter(|p| p.overflow).count(),
            horizon_end = %horizon_end,
            "复训排程完成"
        );
        Ok(outcome)
    }

    /// 分组并发分配
    ///
    /// 排序后按 batch_size 切分, 各组在阻塞线程池并发执行, 共享同一台账。
    /// 台账的"选择+占用"是原子的, 不会丢失或重复计数; 但周期选择依赖占用时刻的台账状态,
    /// 因此仅 batch_size >= 资质数时与顺序分配结果一致。
    /// cancel 置位后各组在下一条资质前停止, 已完成部分保持一致。
    #[allow(clippy::too_many_arguments)]
    pub async fn allocate_partitioned(
        &self,
        artifacts: &[PendingArtifact],
        horizon_months: u32,
        category_filter: Option<&[String]>,
        ledger: Arc<CapacityLedger>,
        today: NaiveDate,
        batch_size: usize,
        cancel: Arc<AtomicBool>,
    ) -> PlanningResult<AllocationOutcome> {
        let horizon_end = Self::horizon_end(today, horizon_months)?;
        let ordered = Self::prepare(artifacts, category_filter);
        let batch_size = batch_size.max(1);
        let allocator = Arc::new(self.clone());

        let tasks = ordered
            .chunks(batch_size)
            .enumerate()
            .map(|(batch_no, chunk)| {
                let allocator = allocator.clone();
                let ledger = ledger.clone();
                let cancel = cancel.clone();
                let base = batch_no * batch_size;
                let chunk = chunk.to_vec();
                tokio::task::spawn_blocking(move || -> PlanningResult<(Vec<(usize, ArtifactOutcome)>, bool)> {
                    let mut results = Vec::with_capacity(chunk.len());
                    for (offset, artifact) in chunk.iter().enumerate() {
                        if cancel.load(Ordering::Acquire) {
                            debug!(batch_no, "批次已取消, 停止处理");
                            return Ok((results, true));
                        }
                        let outcome = allocator.allocate_one(artifact, horizon_end, &ledger, today)?;
                        results.push((base + offset, outcome));
                    }
                    Ok((results, false))
                })
            })
            .collect::<Vec<_>>();

        let mut merged: Vec<(usize, ArtifactOutcome)> = Vec::with_capacity(ordered.len());
        let mut cancelled = false;
        for joined in join_all(tasks).await {
            let (results, batch_cancelled) =
                joined.map_err(|e| PlanningError::Internal(format!("分配任务异常: {}", e)))??;
            cancelled |= batch_cancelled;
            merged.extend(results);
        }
        merged.sort_by_key(|(position, _)| *position);

        let mut outcome = AllocationOutcome {
            cancelled,
            ..AllocationOutcome::default()
        };
        for (_, item) in merged {
            match item {
                ArtifactOutcome::Planned(plan) => outcome.plans.push(plan),
                ArtifactOutcome::Skipped(diagnostic) => outcome.diagnostics.push(diagnostic),
            }
        }

        if cancelled {
            warn!(planned = outcome.plans.len(), "复训排程被取消, 返回已完成部分");
        } else {
            info!(
                planned = outcome.plans.len(),
                skipped = outcome.diagnostics.len(),
                batch_size,
                "复训排程完成 (分组并发)"
            );
        }
        Ok(outcome)
    }

    /// 单条资质分配
    fn allocate_one(
        &self,
        artifact: &PendingArtifact,
        horizon_end: NaiveDate,
        ledger: &CapacityLedger,
        today: NaiveDate,
    ) -> PlanningResult<ArtifactOutcome> {
        // 1. 窗口
        let window = match self.grace_policy.window_for(&artifact.category, artifact.expiry_date) {
            Ok(window) => window,
            Err(err @ PlanningError::UnknownCategory(_)) => {
                debug!(subject_id = %artifact.subject_id, category = %artifact.category, "未配置类别, 跳过");
                return Ok(ArtifactOutcome::Skipped(Diagnostic::for_artifact(
                    artifact,
                    DiagnosticKind::UnknownCategory,
                    err.to_string(),
                )));
            }
            Err(err) => return Err(err),
        };

        // 2. 候选周期
        if window.window_start > horizon_end {
            let err = PlanningError::HorizonExceeded {
                window_start: window.window_start,
                horizon_end,
            };
            return Ok(ArtifactOutcome::Skipped(Diagnostic::for_artifact(
                artifact,
                DiagnosticKind::HorizonExceeded,
                err.to_string(),
            )));
        }
        let anchor = self.calendar.anchor();
        if window.window_end < anchor {
            let err = PlanningError::BeforeAnchor {
                date: window.window_end,
                anchor,
            };
            return Ok(ArtifactOutcome::Skipped(Diagnostic::for_artifact(
                artifact,
                DiagnosticKind::BeforeAnchor,
                err.to_string(),
            )));
        }

        if window.window_end < today {
            debug!(subject_id = %artifact.subject_id, window_end = %window.window_end, "窗口已过, 跳过");
            return Ok(ArtifactOutcome::Skipped(Diagnostic::for_artifact(
                artifact,
                DiagnosticKind::HorizonExceeded,
                format!("窗口已过: window_end={} 早于 today={}", window.window_end, today),
            )));
        }

        let range_start = window.window_start.max(anchor).max(today);
        let range_end = window.window_end.min(horizon_end);
        let candidates: Vec<Period> = self.calendar.periods_in_range(range_start, range_end)?.collect();

        // 3 + 4. 选择并占用
        let Some((period, reserve)) = ledger.reserve_least_utilized(&candidates, &artifact.category)? else {
            let err = PlanningError::HorizonExceeded {
                window_start: window.window_start,
                horizon_end,
            };
            return Ok(ArtifactOutcome::Skipped(Diagnostic::for_artifact(
                artifact,
                DiagnosticKind::HorizonExceeded,
                err.to_string(),
            )));
        };

        // 5. 落位日期钳制到窗口内, 且不早于 today
        let planned_date = window.clamp(period.start_date).max(today);

        debug!(
            subject_id = %artifact.subject_id,
            category = %artifact.category,
            period = %period.code,
            planned_date = %planned_date,
            overflow = reserve.overflow,
            "资质已分配"
        );

        Ok(ArtifactOutcome::Planned(RenewalPlan {
            plan_id: uuid::Uuid::new_v4().to_string(),
            subject_id: artifact.subject_id.clone(),
            category: artifact.category.clone(),
            original_expiry: artifact.expiry_date,
            window_start: window.window_start,
            window_end: window.window_end,
            planned_period: period.code,
            planned_date,
            priority: self.scorer.score(artifact.expiry_date, today),
            overflow: reserve.overflow,
            status: PlanStatus::Planned,
            created_at: Utc::now(),
        }))
    }
}

// ==========================================
// 测试模块
// ==========================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::grace_profile::{DurationSpec, GraceRule};
    use crate::domain::period::YearRollover;
    use std::collections::HashMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn allocator() -> RenewalAllocator {
        let calendar = PeriodCalendar::new(d(2025, 1, 1), 28, YearRollover::CalendarYear).unwrap();
        let policy = GracePolicy::default()
            .with_rule("Medical", GraceRule::new(DurationSpec::days(90), DurationSpec::days(28)))
            .with_rule("Ground", GraceRule::new(DurationSpec::days(7), DurationSpec::days(7)));
        RenewalAllocator::new(calendar, policy)
    }

    #[test]
    fn test_unknown_category_is_diagnostic_not_error() {
        let allocator = allocator();
        let ledger = CapacityLedger::new(10, HashMap::new());
        let artifacts = vec![
            PendingArtifact::new("P1", "Line", d(2025, 11, 15)),
            PendingArtifact::new("P2", "Ground", d(2025, 11, 15)),
        ];
        let outcome = allocator.allocate(&artifacts, 6, None, &ledger, d(2025, 10, 1)).unwrap();
        assert_eq!(outcome.plans.len(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::UnknownCategory);
    }

    #[test]
    fn test_horizon_exceeded() {
        let allocator = allocator();
        let ledger = CapacityLedger::new(10, HashMap::new());
        let artifacts = vec![PendingArtifact::new("P1", "Ground", d(2026, 6, 1))];
        let outcome = allocator.allocate(&artifacts, 1, None, &ledger, d(2025, 10, 1)).unwrap();
        assert!(outcome.plans.is_empty());
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::HorizonExceeded);
        assert_eq!(ledger.total_reserved(None).unwrap(), 0);
    }

    #[test]
    fn test_window_before_anchor() {
        let allocator = allocator();
        let ledger = CapacityLedger::new(10, HashMap::new());
        let artifacts = vec![PendingArtifact::new("P1", "Ground", d(2024, 6, 1))];
        let outcome = allocator.allocate(&artifacts, 1, None, &ledger, d(2025, 10, 1)).unwrap();
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::BeforeAnchor);
    }

    #[test]
    fn test_window_partly_in_past_starts_at_today() {
        let allocator = allocator();
        let ledger = CapacityLedger::new(10, HashMap::new());
        // 窗口 2025-11-03 ~ 2026-03-01, today 落在 RP14/2025 (2025-12-31 起)
        let artifacts = vec![PendingArtifact::new("P1", "Medical", d(2026, 2, 1))];
        let today = d(2026, 1, 1);
        let outcome = allocator.allocate(&artifacts, 6, None, &ledger, today).unwrap();

        assert!(outcome.diagnostics.is_empty());
        let plan = &outcome.plans[0];
        assert_eq!(plan.planned_period, "RP14/2025");
        assert_eq!(plan.planned_date, today);
        assert!(plan.window().contains(plan.planned_date));
    }

    #[test]
    fn test_window_entirely_in_past_is_skipped() {
        let allocator = allocator();
        let ledger = CapacityLedger::new(10, HashMap::new());
        // 窗口 2025-06-03 ~ 2025-09-29
        let artifacts = vec![
            PendingArtifact::new("P1", "Medical", d(2025, 9, 1)),
            PendingArtifact::new("P2", "Medical", d(2026, 2, 1)),
        ];
        let outcome = allocator.allocate(&artifacts, 6, None, &ledger, d(2026, 1, 1)).unwrap();

        assert_eq!(outcome.plans.len(), 1);
        assert_eq!(outcome.plans[0].subject_id, "P2");
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].subject_id, "P1");
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::HorizonExceeded);
        assert_eq!(ledger.total_reserved(None).unwrap(), 1);
    }

    #[test]
    fn test_earlier_expiry_never_planned_later() {
        let allocator = allocator();
        let ledger = CapacityLedger::new(50, HashMap::new());
        let artifacts = vec![
            PendingArtifact::new("P3", "Medical", d(2026, 4, 20)),
            PendingArtifact::new("P1", "Medical", d(2026, 1, 10)),
            PendingArtifact::new("P2", "Medical", d(2026, 2, 15)),
        ];
        let outcome = allocator.allocate(&artifacts, 9, None, &ledger, d(2025, 11, 1)).unwrap();
        assert_eq!(outcome.plans.len(), 3);

        let start_of = |subject: &str| {
            let plan = outcome.plans.iter().find(|p| p.subject_id == subject).unwrap();
            allocator.calendar().period_by_code(&plan.planned_period).unwrap().start_date
        };
        assert!(start_of("P1") <= start_of("P2"));
        assert!(start_of("P2") <= start_of("P3"));
    }

    #[test]
    fn test_planned_date_is_clamped_into_window() {
        let allocator = allocator();
        let ledger = CapacityLedger::new(10, HashMap::new());
        // 窗口 2025-12-01 ~ 2026-03-29, 首个候选周期 RP12/2025 起始于 2025-11-05
        let artifacts = vec![PendingArtifact::new("P1", "Medical", d(2026, 3, 1))];
        let outcome = allocator.allocate(&artifacts, 6, None, &ledger, d(2025, 11, 1)).unwrap();
        let plan = &outcome.plans[0];
        assert_eq!(plan.planned_period, "RP12/2025");
        assert_eq!(plan.planned_date, d(2025, 12, 1));
        assert!(plan.window().contains(plan.planned_date));
    }

    #[test]
    fn test_category_filter() {
        let allocator = allocator();
        let ledger = CapacityLedger::new(10, HashMap::new());
        let artifacts = vec![
            PendingArtifact::new("P1", "Medical", d(2026, 1, 15)),
            PendingArtifact::new("P2", "Ground", d(2025, 11, 15)),
        ];
        let filter = vec!["Ground".to_string()];
        let outcome = allocator
            .allocate(&artifacts, 6, Some(&filter), &ledger, d(2025, 10, 1))
            .unwrap();
        assert_eq!(outcome.plans.len(), 1);
        assert_eq!(outcome.plans[0].category, "Ground");
    }

    #[test]
    fn test_horizon_end_month_arithmetic() {
        assert_eq!(RenewalAllocator::horizon_end(d(2025, 1, 31), 1).unwrap(), d(2025, 2, 28));
        assert_eq!(RenewalAllocator::horizon_end(d(2025, 10, 1), 0).unwrap(), d(2025, 10, 1));
    }
}
