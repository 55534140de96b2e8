// ==========================================
// 机组排班核心 - 排班周期日历
// ==========================================
// 职责: 日期 → 周期; 区间 → 有序周期序列
// 规则: index = floor((date - anchor) / L)
// 红线: 早于锚点的日期属于配置错误
// ==========================================

use crate::domain::period::{Period, YearRollover};
use crate::engine::error::{PlanningError, PlanningResult};
use chrono::{Datelike, Duration, NaiveDate};

// ==========================================
// PeriodCalendar - 周期日历 (纯函数, 无状态)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodCalendar {
    anchor: NaiveDate,
    length_days: i64,
    rollover: YearRollover,
}

impl PeriodCalendar {
    /// 创建周期日历
    ///
    /// # 参数
    /// - anchor: 首个周期的起始日
    /// - length_days: 周期长度（天）, 必须为正
    /// - rollover: 跨年编号规则
    pub fn new(anchor: NaiveDate, length_days: i64, rollover: YearRollover) -> PlanningResult<Self> {
        if length_days <= 0 {
            return Err(PlanningError::Config(format!(
                "周期长度必须为正: length_days={}",
                length_days
            )));
        }
        Ok(Self {
            anchor,
            length_days,
            rollover,
        })
    }

    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }

    pub fn length_days(&self) -> i64 {
        self.length_days
    }

    pub fn rollover(&self) -> YearRollover {
        self.rollover
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 日期所在周期序号
    pub fn index_for(&self, date: NaiveDate) -> PlanningResult<i64> {
        if date < self.anchor {
            return Err(PlanningError::BeforeAnchor {
                date,
                anchor: self.anchor,
            });
        }
        Ok((date - self.anchor).num_days().div_euclid(self.length_days))
    }

    /// 日期所在周期
    pub fn period_for(&self, date: NaiveDate) -> PlanningResult<Period> {
        let index = self.index_for(date)?;
        self.period_at(index)
    }

    /// 按序号生成周期
    ///
    /// 负序号或超出日期表示范围的序号返回 Validation
    pub fn period_at(&self, index: i64) -> PlanningResult<Period> {
        if index < 0 {
            return Err(PlanningError::Validation(format!("周期序号不能为负: {}", index)));
        }
        let out_of_range = || PlanningError::Validation(format!("周期序号超出日期范围: {}", index));

        let start_date = index
            .checked_mul(self.length_days)
            .and_then(Duration::try_days)
            .and_then(|offset| self.anchor.checked_add_signed(offset))
            .ok_or_else(out_of_range)?;
        let end_date = Duration::try_days(self.length_days - 1)
            .and_then(|span| start_date.checked_add_signed(span))
            .ok_or_else(out_of_range)?;

        Ok(Period {
            code: self.code_for(index, start_date),
            index,
            start_date,
            end_date,
        })
    }

    /// 区间 [start, end] 覆盖的周期序列
    ///
    /// 返回有限且可重复遍历 (Clone) 的迭代器; end < start 时为空
    pub fn periods_in_range(&self, start: NaiveDate, end: NaiveDate) -> PlanningResult<PeriodRange> {
        let first = self.index_for(start)?;
        let last = if end < start { first - 1 } else { self.index_for(end)? };
        Ok(PeriodRange {
            calendar: *self,
            next: first,
            last,
        })
    }

    /// 根据周期代码反查周期
    pub fn period_by_code(&self, code: &str) -> PlanningResult<Period> {
        let (number, year) = parse_code(code)
            .ok_or_else(|| PlanningError::Validation(format!("周期代码格式非法: {}", code)))?;

        let index = match self.rollover {
            YearRollover::CalendarYear => self.first_index_of_year(year) + i64::from(number) - 1,
            YearRollover::FixedCycle { periods_per_cycle } => {
                if number > periods_per_cycle {
                    return Err(PlanningError::Validation(format!(
                        "周期编号超出循环长度: {} > {}",
                        number, periods_per_cycle
                    )));
                }
                (i64::from(year) - i64::from(self.anchor.year()))
                    .checked_mul(i64::from(periods_per_cycle))
                    .and_then(|base| base.checked_add(i64::from(number) - 1))
                    .ok_or_else(|| PlanningError::Validation(format!("周期代码超出范围: {}", code)))?
            }
        };

        if index < 0 {
            return Err(PlanningError::Validation(format!("周期早于锚点: {}", code)));
        }

        let period = self.period_at(index)?;
        if period.code != code {
            return Err(PlanningError::Validation(format!("周期不存在: {}", code)));
        }
        Ok(period)
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    /// 周期代码 RP{n}/{yyyy}
    fn code_for(&self, index: i64, start_date: NaiveDate) -> String {
        match self.rollover {
            YearRollover::CalendarYear => {
                let year = start_date.year();
                let number = index - self.first_index_of_year(year) + 1;
                format!("RP{}/{}", number, year)
            }
            YearRollover::FixedCycle { periods_per_cycle } => {
                let k = i64::from(periods_per_cycle);
                let number = index % k + 1;
                let year = i64::from(self.anchor.year()) + index / k;
                format!("RP{}/{}", number, year)
            }
        }
    }

    /// 起始日落在 year 年内的第一个周期序号
    fn first_index_of_year(&self, year: i32) -> i64 {
        let jan1 = match NaiveDate::from_ymd_opt(year, 1, 1) {
            Some(d) => d,
            None => return 0,
        };
        let days = (jan1 - self.anchor).num_days();
        if days <= 0 {
            0
        } else {
            (days + self.length_days - 1) / self.length_days
        }
    }
}

/// 解析 RP{n}/{yyyy}
fn parse_code(code: &str) -> Option<(u32, i32)> {
    let rest = code.trim().strip_prefix("RP")?;
    let (number, year) = rest.split_once('/')?;
    let number = number.parse::<u32>().ok()?;
    let year = year.parse::<i32>().ok()?;
    if number == 0 {
        return None;
    }
    Some((number, year))
}

// ==========================================
// PeriodRange - 有序周期序列
// ==========================================
#[derive(Debug, Clone)]
pub struct PeriodRange {
    calendar: PeriodCalendar,
    next: i64,
    last: i64,
}

impl Iterator for PeriodRange {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        if self.next > self.last {
            return None;
        }
        let period = self.calendar.period_at(self.next).ok()?;
        self.next += 1;
        Some(period)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.last - self.next + 1).max(0) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PeriodRange {}
