// ==========================================
// 机组排班核心 - Eligibility Core 纯函数库
// ==========================================
// 职责: 最低配员判定、资历排序、裁决生成的纯逻辑
// 红线: 无状态、无副作用、无 I/O 操作
// ==========================================

use crate::domain::crew::{CrewSnapshot, Decision, OverrideAuthorization};
use crate::domain::types::DecisionOutcome;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// 最低配员不足时的裁决原因前缀
pub const REASON_INSUFFICIENT_CREW: &str = "insufficient crew";

// ==========================================
// Contender - 同职级、区间重叠的未决申请
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contender {
    pub request_id: String,
    pub subject_id: String,
    pub seniority_number: i64,
}

// ==========================================
// EvaluationInput - 单次裁决的全部输入
// ==========================================
// 所有字段来自同一次一致性读取
#[derive(Debug, Clone)]
pub struct EvaluationInput<'a> {
    pub request_id: Option<&'a str>,
    pub subject_id: &'a str,
    pub seniority_number: i64,
    pub snapshot: CrewSnapshot,
    pub minimum_crew: u32,
    pub contenders: &'a [Contender],
    pub override_auth: Option<&'a OverrideAuthorization>,
    pub decided_at: DateTime<Utc>,
}

// ==========================================
// EligibilityCore - 纯函数工具类
// ==========================================
pub struct EligibilityCore;

impl EligibilityCore {
    /// 资历比较器
    ///
    /// # 规则
    /// - seniority_number 升序 (越小越资深)
    /// - 相同则按 subject_id, 再按 request_id, 保证全序
    pub fn seniority_order(
        a: (i64, &str, Option<&str>),
        b: (i64, &str, Option<&str>),
    ) -> Ordering {
        a.0.cmp(&b.0)
            .then_with(|| a.1.cmp(b.1))
            .then_with(|| a.2.cmp(&b.2))
    }

    /// 按资历排序竞争者
    pub fn sort_by_seniority(contenders: &mut [Contender]) {
        contenders.sort_by(|a, b| {
            Self::seniority_order(
                (a.seniority_number, a.subject_id.as_str(), Some(a.request_id.as_str())),
                (b.seniority_number, b.subject_id.as_str(), Some(b.request_id.as_str())),
            )
        });
    }

    /// 比当前申请更资深的竞争者 (已排序)
    pub fn seniors_of<'c>(
        subject_id: &str,
        seniority_number: i64,
        request_id: Option<&str>,
        contenders: &'c [Contender],
    ) -> Vec<&'c Contender> {
        let mut seniors: Vec<&Contender> = contenders
            .iter()
            .filter(|c| {
                Self::seniority_order(
                    (c.seniority_number, c.subject_id.as_str(), Some(c.request_id.as_str())),
                    (seniority_number, subject_id, request_id),
                ) == Ordering::Less
            })
            .collect();
        seniors.sort_by(|a, b| {
            Self::seniority_order(
                (a.seniority_number, a.subject_id.as_str(), Some(a.request_id.as_str())),
                (b.seniority_number, b.subject_id.as_str(), Some(b.request_id.as_str())),
            )
        });
        seniors
    }

    /// 裁决
    ///
    /// # 规则
    /// 1. remaining = available - 1
    /// 2. remaining < minimum → DENIED (有授权则越权 APPROVED)
    /// 3. 存在更资深的未决竞争者 → CONFLICT (待资深者裁决后由重放处理)
    /// 4. 否则 APPROVED
    pub fn evaluate(input: &EvaluationInput<'_>) -> Decision {
        let remaining = i64::from(input.snapshot.available) - 1;
        let minimum = i64::from(input.minimum_crew);

        let (outcome, reason, conflict_with, override_applied) = if remaining < minimum {
            match input.override_auth {
                Some(auth) => (
                    DecisionOutcome::Approved,
                    format!(
                        "override by {}: {} (remaining {} < minimum {})",
                        auth.authorized_by, auth.reason, remaining, minimum
                    ),
                    Vec::new(),
                    true,
                ),
                None => (
                    DecisionOutcome::Denied,
                    format!(
                        "{}: remaining {} < minimum {}",
                        REASON_INSUFFICIENT_CREW, remaining, minimum
                    ),
                    Vec::new(),
                    false,
                ),
            }
        } else {
            let seniors = Self::seniors_of(
                input.subject_id,
                input.seniority_number,
                input.request_id,
                input.contenders,
            );

            if seniors.is_empty() {
                let reason = if input.contenders.is_empty() {
                    format!("crew sufficient: remaining {} >= minimum {}", remaining, minimum)
                } else {
                    format!(
                        "most senior of {} overlapping request(s): remaining {} >= minimum {}",
                        input.contenders.len() + 1,
                        remaining,
                        minimum
                    )
                };
                (DecisionOutcome::Approved, reason, Vec::new(), false)
            } else {
                let ids: Vec<String> = seniors.iter().map(|c| c.request_id.clone()).collect();
                (
                    DecisionOutcome::Conflict,
                    format!(
                        "conflict: {} senior request(s) unresolved by {} subject(s)",
                        ids.len(),
                        distinct_subjects(&seniors)
                    ),
                    ids,
                    false,
                )
            }
        };

        Decision {
            request_id: input.request_id.map(str::to_string),
            subject_id: input.subject_id.to_string(),
            rank: input.snapshot.rank.clone(),
            outcome,
            reason,
            snapshot: input.snapshot.clone(),
            remaining_if_approved: remaining,
            minimum_crew: input.minimum_crew,
            conflict_with,
            override_applied,
            decided_at: input.decided_at,
        }
    }
}

fn distinct_subjects(contenders: &[&Contender]) -> usize {
    let mut ids: Vec<&str> = contenders.iter().map(|c| c.subject_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.len()
}

// ==========================================
// 测试模块
// ==========================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn snapshot(total: u32, committed: u32) -> CrewSnapshot {
        CrewSnapshot {
            rank: "Captain".to_string(),
            range_start: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            range_end: NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
            total_active: total,
            committed,
            available: total - committed,
        }
    }

    fn contender(id: &str, subject: &str, seniority: i64) -> Contender {
        Contender {
            request_id: id.to_string(),
            subject_id: subject.to_string(),
            seniority_number: seniority,
        }
    }

    fn input<'a>(
        seniority: i64,
        snap: CrewSnapshot,
        contenders: &'a [Contender],
        override_auth: Option<&'a OverrideAuthorization>,
    ) -> EvaluationInput<'a> {
        EvaluationInput {
            request_id: Some("R-SELF"),
            subject_id: "S-SELF",
            seniority_number: seniority,
            snapshot: snap,
            minimum_crew: 10,
            contenders,
            override_auth,
            decided_at: Utc::now(),
        }
    }

    #[test]
    fn test_seniority_order_is_total() {
        assert_eq!(
            EligibilityCore::seniority_order((1, "B", Some("R2")), (2, "A", Some("R1"))),
            Ordering::Less
        );
        assert_eq!(
            EligibilityCore::seniority_order((1, "A", Some("R2")), (1, "A", Some("R1"))),
            Ordering::Greater
        );

        let mut list = vec![contender("R3", "C", 30), contender("R1", "A", 10), contender("R2", "B", 20)];
        EligibilityCore::sort_by_seniority(&mut list);
        let ids: Vec<&str> = list.iter().map(|c| c.request_id.as_str()).collect();
        assert_eq!(ids, vec!["R1", "R2", "R3"]);
    }

    #[test]
    fn test_denied_when_below_minimum() {
        let decision = EligibilityCore::evaluate(&input(5, snapshot(10, 0), &[], None));
        assert_eq!(decision.outcome, DecisionOutcome::Denied);
        assert!(decision.reason.starts_with(REASON_INSUFFICIENT_CREW));
        assert_eq!(decision.remaining_if_approved, 9);
    }

    #[test]
    fn test_override_approves_shortage() {
        let auth = OverrideAuthorization {
            authorized_by: "duty-manager".to_string(),
            reason: "bereavement".to_string(),
        };
        let decision = EligibilityCore::evaluate(&input(5, snapshot(10, 0), &[], Some(&auth)));
        assert!(decision.is_approved());
        assert!(decision.override_applied);
    }

    #[test]
    fn test_approved_without_contenders() {
        let decision = EligibilityCore::evaluate(&input(5, snapshot(12, 1), &[], None));
        assert!(decision.is_approved());
        assert!(decision.conflict_with.is_empty());
    }

    #[test]
    fn test_senior_wins_junior_conflicts() {
        // 12 人, 1 人已批准: 仅能再批准一人
        let junior = [contender("R-JUNIOR", "S-J", 50)];
        let senior = EligibilityCore::evaluate(&input(5, snapshot(12, 1), &junior, None));
        assert!(senior.is_approved());

        let seniors = [contender("R-SENIOR", "S-S", 1)];
        let junior_decision = EligibilityCore::evaluate(&input(50, snapshot(12, 1), &seniors, None));
        assert_eq!(junior_decision.outcome, DecisionOutcome::Conflict);
        assert_eq!(junior_decision.conflict_with, vec!["R-SENIOR".to_string()]);
    }

    #[test]
    fn test_junior_conflicts_even_when_room_for_both() {
        let seniors = [contender("R-SENIOR", "S-S", 1)];
        let decision = EligibilityCore::evaluate(&input(50, snapshot(20, 0), &seniors, None));
        assert_eq!(decision.outcome, DecisionOutcome::Conflict);
        assert_eq!(decision.conflict_with, vec!["R-SENIOR".to_string()]);
        assert_eq!(decision.remaining_if_approved, 19);
    }

    #[test]
    fn test_most_senior_contender_is_approved() {
        let juniors = [contender("R-J1", "S-J1", 40), contender("R-J2", "S-J2", 60)];
        let decision = EligibilityCore::evaluate(&input(5, snapshot(20, 0), &juniors, None));
        assert!(decision.is_approved());
        assert!(decision.conflict_with.is_empty());
    }
}
