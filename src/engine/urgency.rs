// ==========================================
// 机组排班核心 - 复训紧迫度评分
// ==========================================
// 规则: 距到期天数越少, 分值越高 (单调不减)
// 红线: 仅用于展示/排序, 不参与周期选择的平局裁决
// ==========================================

use chrono::NaiveDate;

/// 分值上限对应的天数跨度
pub const URGENCY_HORIZON_DAYS: i64 = 3650;

// ==========================================
// UrgencyScorer - 紧迫度评分
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct UrgencyScorer {
    // 无状态引擎
}

impl UrgencyScorer {
    pub fn new() -> Self {
        Self {}
    }

    /// 紧迫度分值
    ///
    /// score = clamp(URGENCY_HORIZON_DAYS - (expiry - today), 0, 2 * URGENCY_HORIZON_DAYS)
    /// 已过期的资质分值高于 URGENCY_HORIZON_DAYS
    pub fn score(&self, expiry_date: NaiveDate, today: NaiveDate) -> u32 {
        let days_left = (expiry_date - today).num_days();
        let score = (URGENCY_HORIZON_DAYS - days_left).clamp(0, 2 * URGENCY_HORIZON_DAYS);
        score as u32
    }
}

impl Default for UrgencyScorer {
    fn default() -> Self {
        Self::new()
    }
}
