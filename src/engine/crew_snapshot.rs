// ==========================================
// 机组排班核心 - 在岗快照计算
// ==========================================
// total_active = 该职级在职人数
// committed    = 与 [start, end] 重叠的已批准请假 (或已确认复训) 的去重人数
// available    = total_active - committed
// 红线: 必须基于同一次一致性读取 (CrewView) 计算
// ==========================================

use crate::domain::crew::{CrewSnapshot, CrewView};
use chrono::NaiveDate;
use std::collections::HashSet;

// ==========================================
// CrewSnapshotCalculator - 在岗快照
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct CrewSnapshotCalculator {
    /// 已确认的复训是否视为离岗
    renewals_remove_from_duty: bool,
}

impl CrewSnapshotCalculator {
    pub fn new(renewals_remove_from_duty: bool) -> Self {
        Self {
            renewals_remove_from_duty,
        }
    }

    /// 计算快照
    ///
    /// # 参数
    /// - view: 单次读取的机组视图
    /// - rank: 职级
    /// - start/end: 闭区间
    /// - exclude_request_id: 重新评估某申请时排除其自身
    pub fn snapshot(
        &self,
        view: &CrewView,
        rank: &str,
        start: NaiveDate,
        end: NaiveDate,
        exclude_request_id: Option<&str>,
    ) -> CrewSnapshot {
        let active: HashSet<&str> = view
            .subjects
            .iter()
            .filter(|s| s.active && s.rank == rank)
            .map(|s| s.id.as_str())
            .collect();

        let mut committed: HashSet<&str> = view
            .approved_leaves
            .iter()
            .filter(|r| r.rank == rank)
            .filter(|r| exclude_request_id.map_or(true, |id| r.request_id != id))
            .filter(|r| r.overlaps(start, end))
            .map(|r| r.subject_id.as_str())
            .filter(|id| active.contains(id))
            .collect();

        if self.renewals_remove_from_duty {
            committed.extend(
                view.confirmed_renewals
                    .iter()
                    .filter(|(_, date)| start <= *date && *date <= end)
                    .map(|(subject_id, _)| subject_id.as_str())
                    .filter(|id| active.contains(id)),
            );
        }

        let total_active = active.len() as u32;
        let committed = committed.len() as u32;

        CrewSnapshot {
            rank: rank.to_string(),
            range_start: start,
            range_end: end,
            total_active,
            committed,
            available: total_active.saturating_sub(committed),
        }
    }
}
