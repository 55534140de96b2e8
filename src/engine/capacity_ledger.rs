// ==========================================
// 机组排班核心 - 产能台账
// ==========================================
// 职责: 周期×类别 计数器, 占用/释放/利用率查询
// 红线: 超限占用仍然接受 (不阻塞排程), 但返回 overflow=true
// 红线: 同一键的占用必须串行, 不丢失、不重复计数
// ==========================================
// 并发: 单写者台账, 所有变更在同一把锁内完成
// ==========================================

use crate::domain::capacity::{CapacityConstraint, LedgerEntry, LedgerKey, ReserveOutcome};
use crate::domain::period::Period;
use crate::engine::error::{PlanningError, PlanningResult};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// 未配置类别时的默认周期产能
pub const DEFAULT_CAPACITY_PER_PERIOD: u32 = 10;

// ==========================================
// CapacityLedger - 产能台账
// ==========================================
pub struct CapacityLedger {
    default_capacity: u32,
    category_capacity: HashMap<String, u32>,
    entries: Mutex<BTreeMap<LedgerKey, LedgerEntry>>,
}

impl CapacityLedger {
    /// 创建空台账
    ///
    /// # 参数
    /// - default_capacity: 全局默认产能
    /// - category_capacity: 类别默认产能（覆盖全局默认）
    pub fn new(default_capacity: u32, category_capacity: HashMap<String, u32>) -> Self {
        Self {
            default_capacity,
            category_capacity,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// 从已持久化条目恢复台账
    pub fn from_entries(
        default_capacity: u32,
        category_capacity: HashMap<String, u32>,
        entries: Vec<LedgerEntry>,
    ) -> Self {
        let map = entries.into_iter().map(|e| (e.key(), e)).collect();
        Self {
            default_capacity,
            category_capacity,
            entries: Mutex::new(map),
        }
    }

    fn lock(&self) -> PlanningResult<MutexGuard<'_, BTreeMap<LedgerKey, LedgerEntry>>> {
        self.entries
            .lock()
            .map_err(|e| PlanningError::Internal(format!("台账锁获取失败: {}", e)))
    }

    /// 类别默认产能
    pub fn default_capacity_for(&self, category: &str) -> u32 {
        self.category_capacity
            .get(category)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    fn entry_mut<'a>(
        &self,
        map: &'a mut BTreeMap<LedgerKey, LedgerEntry>,
        period_code: &str,
        category: &str,
    ) -> &'a mut LedgerEntry {
        let capacity = self.default_capacity_for(category);
        map.entry((period_code.to_string(), category.to_string()))
            .or_insert_with(|| LedgerEntry::new(period_code, category, capacity))
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 设置周期×类别的专属产能
    pub fn set_capacity(&self, period_code: &str, category: &str, capacity: u32) -> PlanningResult<()> {
        let mut map = self.lock()?;
        let entry = self.entry_mut(&mut map, period_code, category);
        entry.capacity = capacity;
        entry.overflow = entry.is_overflow();
        Ok(())
    }

    /// 占用产能
    ///
    /// # 返回
    /// - accepted 恒为 true
    /// - overflow: 占用后 reserved > capacity
    pub fn reserve(&self, period_code: &str, category: &str, amount: u32) -> PlanningResult<ReserveOutcome> {
        let mut map = self.lock()?;
        let entry = self.entry_mut(&mut map, period_code, category);
        Ok(Self::apply_reserve(entry, amount))
    }

    fn apply_reserve(entry: &mut LedgerEntry, amount: u32) -> ReserveOutcome {
        entry.reserved = entry.reserved.saturating_add(amount);
        entry.overflow = entry.is_overflow();
        if entry.overflow {
            warn!(
                period = %entry.period_code,
                category = %entry.category,
                reserved = entry.reserved,
                capacity = entry.capacity,
                "产能超限, 仍接受占用"
            );
        }
        ReserveOutcome {
            accepted: true,
            overflow: entry.overflow,
        }
    }

    /// 释放产能（不会低于 0）
    pub fn release(&self, period_code: &str, category: &str, amount: u32) -> PlanningResult<()> {
        let mut map = self.lock()?;
        let entry = self.entry_mut(&mut map, period_code, category);
        if amount > entry.reserved {
            warn!(
                period = %period_code,
                category = %category,
                reserved = entry.reserved,
                amount = amount,
                "释放量大于已占用, 按 0 截断"
            );
        }
        entry.reserved = entry.reserved.saturating_sub(amount);
        entry.overflow = entry.is_overflow();
        Ok(())
    }

    /// 利用率 reserved / capacity
    pub fn utilization(&self, period_code: &str, category: &str) -> PlanningResult<f64> {
        let map = self.lock()?;
        Ok(match map.get(&(period_code.to_string(), category.to_string())) {
            Some(entry) => entry.utilization(),
            None => LedgerEntry::new(period_code, category, self.default_capacity_for(category))
                .utilization(),
        })
    }

    /// 在候选周期中选择利用率最低者并占用 1 个单位（原子操作）
    ///
    /// 平局按周期起始日最早者; 候选为空返回 None
    pub fn reserve_least_utilized(
        &self,
        candidates: &[Period],
        category: &str,
    ) -> PlanningResult<Option<(Period, ReserveOutcome)>> {
        let mut map = self.lock()?;

        let mut best: Option<(&Period, f64)> = None;
        for period in candidates {
            let utilization = match map.get(&(period.code.clone(), category.to_string())) {
                Some(entry) => entry.utilization(),
                None => LedgerEntry::new(&period.code, category, self.default_capacity_for(category))
                    .utilization(),
            };
            let better = match best {
                None => true,
                Some((current, current_util)) => match utilization.total_cmp(&current_util) {
                    Ordering::Less => true,
                    Ordering::Equal => period.start_date < current.start_date,
                    Ordering::Greater => false,
                },
            };
            if better {
                best = Some((period, utilization));
            }
        }

        let Some((chosen, utilization)) = best else {
            return Ok(None);
        };

        debug!(period = %chosen.code, category = %category, utilization, "选择最低利用率周期");
        let entry = self.entry_mut(&mut map, &chosen.code, category);
        let outcome = Self::apply_reserve(entry, 1);
        Ok(Some((chosen.clone(), outcome)))
    }

    // ==========================================
    // 查询与快照
    // ==========================================

    pub fn entry(&self, period_code: &str, category: &str) -> PlanningResult<Option<LedgerEntry>> {
        let map = self.lock()?;
        Ok(map.get(&(period_code.to_string(), category.to_string())).cloned())
    }

    /// 全部条目（按 周期代码, 类别 排序）
    pub fn entries(&self) -> PlanningResult<Vec<LedgerEntry>> {
        let map = self.lock()?;
        Ok(map.values().cloned().collect())
    }

    /// 已占用合计（可按类别过滤）
    pub fn total_reserved(&self, category: Option<&str>) -> PlanningResult<u32> {
        let map = self.lock()?;
        Ok(map
            .values()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .map(|e| e.reserved)
            .sum())
    }

    /// 清空占用（保留专属产能设置）
    pub fn clear_reservations(&self, categories: Option<&[String]>) -> PlanningResult<()> {
        let mut map = self.lock()?;
        for entry in map.values_mut() {
            if categories.map_or(true, |cs| cs.contains(&entry.category)) {
                entry.reserved = 0;
                entry.overflow = false;
            }
        }
        Ok(())
    }
}
