// ==========================================
// 机组排班核心 - 排班周期领域模型
// ==========================================
// 周期: 固定长度 (默认 28 天)、首尾相接、互不重叠
// 由单一锚点生成, 生成后不可变
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 默认周期长度（天）
pub const DEFAULT_PERIOD_LENGTH_DAYS: i64 = 28;

// ==========================================
// Period - 排班周期
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub code: String,          // 周期代码, 如 RP12/2025
    pub index: i64,            // 自锚点起的周期序号 (0 起)
    pub start_date: NaiveDate, // 起始日 (含)
    pub end_date: NaiveDate,   // 结束日 (含)
}

impl Period {
    /// 判断日期是否落在周期内（闭区间）
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// 判断与闭区间 [start, end] 是否重叠
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && start <= self.end_date
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} ~ {}]", self.code, self.start_date, self.end_date)
    }
}

// ==========================================
// YearRollover - 跨年编号规则
// ==========================================
// 显式配置, 不做推断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum YearRollover {
    /// 以周期起始日所在自然年编号; 新年第一个起始的周期重新从 1 开始
    CalendarYear,
    /// 固定循环: 每 periods_per_cycle 个周期进入下一编号年
    FixedCycle { periods_per_cycle: u32 },
}

impl fmt::Display for YearRollover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YearRollover::CalendarYear => write!(f, "CALENDAR_YEAR"),
            YearRollover::FixedCycle { periods_per_cycle } => {
                write!(f, "FIXED_CYCLE:{}", periods_per_cycle)
            }
        }
    }
}

impl YearRollover {
    /// 解析配置值: CALENDAR_YEAR | FIXED_CYCLE:<k>
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim().to_uppercase();
        if value == "CALENDAR_YEAR" {
            return Some(YearRollover::CalendarYear);
        }
        let k = value.strip_prefix("FIXED_CYCLE:")?.trim().parse::<u32>().ok()?;
        if k == 0 {
            return None;
        }
        Some(YearRollover::FixedCycle { periods_per_cycle: k })
    }
}
