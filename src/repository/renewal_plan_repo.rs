// ==========================================
// 机组排班核心 - 复训计划数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 计划只能被取代/取消, 不得原地覆盖
// 红线: 计划写入与台账写入在同一事务内提交 (取消批次后仍一致)
// ==========================================

use crate::domain::capacity::LedgerEntry;
use crate::domain::renewal::RenewalPlan;
use crate::domain::types::PlanStatus;
use crate::repository::capacity_ledger_repo::{release_unit, upsert_entries};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT plan_id, subject_id, category, original_expiry, window_start, window_end,
           planned_period, planned_date, priority, overflow, status, created_at
    FROM renewal_plan
"#;

// ==========================================
// PlanRetirement - 本次提交中需要退役的旧计划
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRetirement {
    pub plan_id: String,
    pub from: PlanStatus,
}

// ==========================================
// RenewalPlanRepository - 复训计划仓储
// ==========================================
pub struct RenewalPlanRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RenewalPlanRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<RenewalPlan> {
        let status_raw: String = row.get(10)?;
        let status = PlanStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                rusqlite::types::Type::Text,
                format!("未知计划状态: {}", status_raw).into(),
            )
        })?;

        Ok(RenewalPlan {
            plan_id: row.get(0)?,
            subject_id: row.get(1)?,
            category: row.get(2)?,
            original_expiry: row.get(3)?,
            window_start: row.get(4)?,
            window_end: row.get(5)?,
            planned_period: row.get(6)?,
            planned_date: row.get(7)?,
            priority: row.get(8)?,
            overflow: row.get(9)?,
            status,
            created_at: row.get(11)?,
        })
    }

    fn insert_plans(conn: &Connection, plans: &[RenewalPlan]) -> RepositoryResult<()> {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO renewal_plan (
                plan_id, subject_id, category, original_expiry, window_start, window_end,
                planned_period, planned_date, priority, overflow, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            "#,
        )?;
        for p in plans {
            stmt.execute(params![
                p.plan_id,
                p.subject_id,
                p.category,
                p.original_expiry,
                p.window_start,
                p.window_end,
                p.planned_period,
                p.planned_date,
                p.priority,
                p.overflow,
                p.status.to_string(),
                p.created_at,
            ])?;
        }
        Ok(())
    }

    /// 带前置状态检查的状态迁移
    fn transition(
        conn: &Connection,
        plan_id: &str,
        from: PlanStatus,
        to: PlanStatus,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE renewal_plan SET status = ?1, updated_at = ?2 WHERE plan_id = ?3 AND status = ?4",
            params![to.to_string(), Utc::now(), plan_id, from.to_string()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// 批量写入计划（单事务）
    pub fn batch_insert(&self, plans: &[RenewalPlan]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        Self::insert_plans(&tx, plans)?;
        tx.commit()?;
        Ok(plans.len())
    }

    /// 提交一次排程结果（单事务）
    ///
    /// # 步骤
    /// 1. 旧计划迁移为 CANCELLED (取代/清空)
    /// 2. 写入新计划
    /// 3. 写入台账快照
    pub fn commit_allocation(
        &self,
        retired: &[PlanRetirement],
        plans: &[RenewalPlan],
        ledger: &[LedgerEntry],
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for r in retired {
            Self::transition(&tx, &r.plan_id, r.from, PlanStatus::Cancelled)?;
        }
        Self::insert_plans(&tx, plans)?;
        upsert_entries(&tx, ledger)?;
        tx.commit()?;
        Ok(())
    }

    pub fn find_by_id(&self, plan_id: &str) -> RepositoryResult<Option<RenewalPlan>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE plan_id = ?1", SELECT_COLUMNS);
        let plan = conn.query_row(&sql, params![plan_id], Self::map_row).optional()?;
        Ok(plan)
    }

    /// 按状态查询 (None = 全部), 按计划日期、人员、类别排序
    pub fn list_by_status(&self, status: Option<PlanStatus>) -> RepositoryResult<Vec<RenewalPlan>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE (?1 IS NULL OR status = ?1) ORDER BY planned_date, subject_id, category",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let plans = stmt
            .query_map(params![status.map(|s| s.to_string())], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    /// 某周期×类别的有效计划 (PLANNED + CONFIRMED)
    pub fn list_by_period(&self, period_code: &str, category: &str) -> RepositoryResult<Vec<RenewalPlan>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE planned_period = ?1 AND category = ?2 AND status IN ('PLANNED', 'CONFIRMED')
             ORDER BY planned_date, subject_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let plans = stmt
            .query_map(params![period_code, category], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    /// PLANNED → CONFIRMED
    pub fn confirm(&self, plan_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::transition(&conn, plan_id, PlanStatus::Planned, PlanStatus::Confirmed)
    }

    /// → CANCELLED 并释放台账单位（单事务）
    pub fn cancel(&self, plan: &RenewalPlan) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        Self::transition(&tx, &plan.plan_id, plan.status, PlanStatus::Cancelled)?;
        release_unit(&tx, &plan.planned_period, &plan.category)?;
        tx.commit()?;
        Ok(())
    }
}
