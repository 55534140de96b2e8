// ==========================================
// 机组排班核心 - 请假申请数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 机组视图必须在同一读事务内构造
// 红线: 裁决提交带前置状态检查, 已裁决的申请不会被覆盖
// ==========================================

use crate::domain::crew::{CrewView, Decision, LeaveRequest, Subject};
use crate::domain::types::LeaveStatus;
use crate::engine::eligibility::CrewRoster;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT lr.request_id, lr.subject_id, lr.rank, lr.start_date, lr.end_date, lr.status,
           lr.decided_at, lr.conflict_with, lr.decision_reason
    FROM leave_request lr
"#;

// ==========================================
// LeaveRequestRepository - 请假申请仓储
// ==========================================
pub struct LeaveRequestRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LeaveRequestRepository {
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

    fn map_row(row: &Row<'_>) -> rusqlite::Result<LeaveRequest> {
        let status_raw: String = row.get(5)?;
        let status = LeaveStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("未知请假状态: {}", status_raw).into(),
            )
        })?;
        let conflict_raw: String = row.get(7)?;
        let conflict_with: Vec<String> = serde_json::from_str(&conflict_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(LeaveRequest {
            request_id: row.get(0)?,
            subject_id: row.get(1)?,
            rank: row.get(2)?,
            start_date: row.get(3)?,
            end_date: row.get(4)?,
            status,
            decided_at: row.get(6)?,
            conflict_with,
            decision_reason: row.get(8)?,
        })
    }

    fn map_subject(row: &Row<'_>) -> rusqlite::Result<Subject> {
        Ok(Subject {
            id: row.get(0)?,
            rank: row.get(1)?,
            seniority_number: row.get(2)?,
            active: row.get(3)?,
        })
    }

    /// 新建申请 (外部以 PENDING 创建)
    pub fn insert(&self, request: &LeaveRequest) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO leave_request (
                request_id, subject_id, rank, start_date, end_date, status,
                decided_at, conflict_with, decision_reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                request.request_id,
                request.subject_id,
                request.rank,
                request.start_date,
                request.end_date,
                request.status.to_string(),
                request.decided_at,
                serde_json::to_string(&request.conflict_with)?,
                request.decision_reason,
            ],
        )?;
        Ok(())
    }

    /// 按职级、状态查询 (None = 全部状态)
    pub fn list_by_rank(&self, rank: &str, status: Option<LeaveStatus>) -> RepositoryResult<Vec<LeaveRequest>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE lr.rank = ?1 AND (?2 IS NULL OR lr.status = ?2) ORDER BY lr.start_date, lr.request_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let requests = stmt
            .query_map(params![rank, status.map(|s| s.to_string())], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }
}

// ==========================================
// CrewRoster Trait 实现
// ==========================================
impl CrewRoster for LeaveRequestRepository {
    fn find_subject(&self, subject_id: &str) -> Result<Option<Subject>, RepositoryError> {
        let conn = self.get_conn()?;
        let subject = conn
            .query_row(
                "SELECT subject_id, rank, seniority_number, active FROM subject WHERE subject_id = ?1",
                params![subject_id],
                Self::map_subject,
            )
            .optional()?;
        Ok(subject)
    }

    fn find_request(&self, request_id: &str) -> Result<Option<LeaveRequest>, RepositoryError> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE lr.request_id = ?1", SELECT_COLUMNS);
        let request = conn.query_row(&sql, params![request_id], Self::map_row).optional()?;
        Ok(request)
    }

    fn load_crew_view(
        &self,
        rank: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CrewView, RepositoryError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let subjects = {
            let mut stmt = tx.prepare(
                "SELECT subject_id, rank, seniority_number, active FROM subject
                 WHERE rank = ?1 ORDER BY seniority_number, subject_id",
            )?;
            let rows = stmt
                .query_map(params![rank], Self::map_subject)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let overlapping = {
            let sql = format!(
                "{} WHERE lr.rank = ?1 AND lr.start_date <= ?3 AND ?2 <= lr.end_date
                   AND lr.status IN ('APPROVED', 'PENDING', 'CONFLICT')
                 ORDER BY lr.start_date, lr.request_id",
                SELECT_COLUMNS
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params![rank, start, end], Self::map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let confirmed_renewals = {
            let mut stmt = tx.prepare(
                r#"
                SELECT rp.subject_id, rp.planned_date
                FROM renewal_plan rp
                JOIN subject s ON s.subject_id = rp.subject_id
                WHERE s.rank = ?1 AND rp.status = 'CONFIRMED'
                  AND rp.planned_date BETWEEN ?2 AND ?3
                "#,
            )?;
            let rows = stmt
                .query_map(params![rank, start, end], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, NaiveDate>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        tx.commit()?;

        let (approved_leaves, unresolved_requests) = overlapping
            .into_iter()
            .partition(|r| r.status == LeaveStatus::Approved);

        Ok(CrewView {
            subjects,
            approved_leaves,
            unresolved_requests,
            confirmed_renewals,
        })
    }

    fn commit_decision(&self, decision: &Decision) -> Result<bool, RepositoryError> {
        let Some(request_id) = decision.request_id.as_deref() else {
            return Ok(false);
        };
        let status: LeaveStatus = decision.outcome.into();

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let affected = tx.execute(
            r#"
            UPDATE leave_request
            SET status = ?1, decided_at = ?2, conflict_with = ?3, decision_reason = ?4
            WHERE request_id = ?5 AND status IN ('PENDING', 'CONFLICT')
            "#,
            params![
                status.to_string(),
                decision.decided_at,
                serde_json::to_string(&decision.conflict_with)?,
                decision.reason,
                request_id,
            ],
        )?;
        tx.commit()?;
        Ok(affected == 1)
    }

    fn unresolved_by_seniority(&self, rank: &str) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} JOIN subject s ON s.subject_id = lr.subject_id
             WHERE lr.rank = ?1 AND lr.status IN ('PENDING', 'CONFLICT')
             ORDER BY s.seniority_number, lr.subject_id, lr.request_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let requests = stmt
            .query_map(params![rank], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }
}
