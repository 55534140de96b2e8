// ==========================================
// 机组排班核心 - 启动期配置装配
// ==========================================
// 职责: 一次性读取并校验配置, 构造周期日历 / 宽限策略 / 产能台账
// 红线: 校验失败返回配置错误, 不产生任何台账变更
// ==========================================

use crate::config::grace_profile::GraceRule;
use crate::config::planning_config_trait::PlanningConfigReader;
use crate::engine::capacity_ledger::CapacityLedger;
use crate::engine::crew_lock::LockPolicy;
use crate::engine::error::{PlanningError, PlanningResult};
use crate::engine::grace_policy::GracePolicy;
use crate::engine::period_calendar::PeriodCalendar;
use crate::engine::renewal_allocator::RenewalAllocator;
use std::collections::HashMap;

// ==========================================
// PlanningSettings - 已校验的配置集合
// ==========================================
#[derive(Debug, Clone)]
pub struct PlanningSettings {
    pub calendar: PeriodCalendar,
    pub grace_policy: GracePolicy,
    pub default_capacity: u32,
    pub category_capacity: HashMap<String, u32>,
    pub minimum_by_rank: HashMap<String, u32>,
    pub renewals_remove_from_duty: bool,
    pub worker_batch_size: usize,
    pub lock_policy: LockPolicy,
}

impl PlanningSettings {
    /// 从配置读取器装配
    ///
    /// # 校验
    /// - period.length_days > 0
    /// - 宽限时长不为负 (DurationSpec 已在反序列化时保证)
    /// - 类别产能与最低配员的键不为空
    pub async fn load<C: PlanningConfigReader + ?Sized>(reader: &C) -> PlanningResult<Self> {
        let anchor = reader.get_period_anchor_date().await.map_err(config_error)?;
        let length_days = reader.get_period_length_days().await.map_err(config_error)?;
        let rollover = reader.get_year_rollover().await.map_err(config_error)?;
        let calendar = PeriodCalendar::new(anchor, length_days, rollover)?;

        let rules: HashMap<String, GraceRule> = reader.get_grace_rules().await.map_err(config_error)?;
        ensure_named_keys("grace.policy", rules.keys())?;

        let default_capacity = reader.get_default_capacity().await.map_err(config_error)?;
        let category_capacity = reader.get_category_capacity().await.map_err(config_error)?;
        ensure_named_keys("capacity.by_category", category_capacity.keys())?;

        let minimum_by_rank = reader.get_minimum_crew_table().await.map_err(config_error)?;
        ensure_named_keys("crew.minimum_by_rank", minimum_by_rank.keys())?;

        let renewals_remove_from_duty = reader
            .get_renewals_remove_from_duty()
            .await
            .map_err(config_error)?;
        let worker_batch_size = reader.get_worker_batch_size().await.map_err(config_error)?;
        let lock_policy = reader.get_lock_policy().await.map_err(config_error)?;

        tracing::info!(
            anchor = %calendar.anchor(),
            length_days = calendar.length_days(),
            rollover = %calendar.rollover(),
            categories = rules.len(),
            ranks = minimum_by_rank.len(),
            "排班配置已加载"
        );

        Ok(Self {
            calendar,
            grace_policy: GracePolicy::new(rules),
            default_capacity,
            category_capacity,
            minimum_by_rank,
            renewals_remove_from_duty,
            worker_batch_size,
            lock_policy,
        })
    }

    /// 构造空台账 (仅含产能配置)
    pub fn new_ledger(&self) -> CapacityLedger {
        CapacityLedger::new(self.default_capacity, self.category_capacity.clone())
    }

    pub fn allocator(&self) -> RenewalAllocator {
        RenewalAllocator::new(self.calendar, self.grace_policy.clone())
    }

    /// 已配置最低配员的职级 (排序后)
    pub fn ranks(&self) -> Vec<String> {
        let mut ranks: Vec<String> = self.minimum_by_rank.keys().cloned().collect();
        ranks.sort();
        ranks
    }
}

fn config_error(e: Box<dyn std::error::Error>) -> PlanningError {
    PlanningError::Config(e.to_string())
}

fn ensure_named_keys<'a>(key: &str, names: impl Iterator<Item = &'a String>) -> PlanningResult<()> {
    for name in names {
        if name.trim().is_empty() {
            return Err(PlanningError::Config(format!("{} 含空键", key)));
        }
    }
    Ok(())
}
