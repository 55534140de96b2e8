// ==========================================
// 机组排班核心 - 复训宽限策略
// ==========================================
// 规则: window_start = expiry - lookahead
//       window_end   = expiry + grace
// 说明: 窗口仅为排程建议, 不代表合规判定
// ==========================================

use crate::config::grace_profile::GraceRule;
use crate::domain::renewal::RenewalWindow;
use crate::engine::error::{PlanningError, PlanningResult};
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

// ==========================================
// GracePolicy - 类别 → 窗口
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct GracePolicy {
    rules: HashMap<String, GraceRule>,
}

impl GracePolicy {
    pub fn new(rules: HashMap<String, GraceRule>) -> Self {
        Self { rules }
    }

    /// 追加/覆盖单个类别规则
    pub fn with_rule(mut self, category: impl Into<String>, rule: GraceRule) -> Self {
        self.rules.insert(category.into(), rule);
        self
    }

    pub fn knows(&self, category: &str) -> bool {
        self.rules.contains_key(category)
    }

    /// 已配置类别（排序后, 保证遍历顺序稳定）
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.rules.keys().cloned().collect();
        categories.sort();
        categories
    }

    /// 计算复训窗口
    ///
    /// # 返回
    /// - Ok(RenewalWindow)
    /// - Err(UnknownCategory): 类别未配置
    pub fn window_for(&self, category: &str, expiry_date: NaiveDate) -> PlanningResult<RenewalWindow> {
        let rule = self
            .rules
            .get(category)
            .ok_or_else(|| PlanningError::UnknownCategory(category.to_string()))?;

        Ok(RenewalWindow {
            window_start: expiry_date - Duration::days(rule.lookahead.as_days()),
            window_end: expiry_date + Duration::days(rule.grace.as_days()),
        })
    }
}
