// ==========================================
// 机组排班核心 - 产能台账领域模型
// ==========================================
// 红线: reserved 仅在 overflow=true 时允许超过 capacity
// 红线: reserved 不得为负
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// LedgerKey - 台账键 (周期代码, 资质类别)
// ==========================================
pub type LedgerKey = (String, String);

// ==========================================
// LedgerEntry - 产能台账条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub period_code: String,
    pub category: String,
    pub capacity: u32, // 周期内该类别可承接的复训数
    pub reserved: u32, // 已占用
    pub overflow: bool,
}

impl LedgerEntry {
    pub fn new(period_code: impl Into<String>, category: impl Into<String>, capacity: u32) -> Self {
        Self {
            period_code: period_code.into(),
            category: category.into(),
            capacity,
            reserved: 0,
            overflow: false,
        }
    }

    pub fn key(&self) -> LedgerKey {
        (self.period_code.clone(), self.category.clone())
    }
}

// ==========================================
// ReserveOutcome - 占用结果
// ==========================================
// 超限也接受 (不阻塞排程), 由调用方标记风险
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveOutcome {
    pub accepted: bool,
    pub overflow: bool,
}

// ==========================================
// Trait: CapacityConstraint
// ==========================================
pub trait CapacityConstraint {
    /// 占用后是否仍不超过 capacity
    fn can_reserve(&self, amount: u32) -> bool;

    /// 检查是否超限
    fn is_overflow(&self) -> bool;

    /// 剩余产能（相对于 capacity）
    fn remaining(&self) -> u32;

    /// 利用率 reserved / capacity
    fn utilization(&self) -> f64;
}

impl CapacityConstraint for LedgerEntry {
    fn can_reserve(&self, amount: u32) -> bool {
        self.reserved.saturating_add(amount) <= self.capacity
    }

    fn is_overflow(&self) -> bool {
        self.reserved > self.capacity
    }

    fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.reserved)
    }

    /// capacity 为 0 时: 未占用为 0.0, 已占用为 +∞
    fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return if self.reserved == 0 { 0.0 } else { f64::INFINITY };
        }
        f64::from(self.reserved) / f64::from(self.capacity)
    }
}
