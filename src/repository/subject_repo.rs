// ==========================================
// 机组排班核心 - 机组人员数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 人员数据由外部目录维护, 本仓储只做同步写入与查询
// ==========================================

use crate::domain::crew::Subject;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = "SELECT subject_id, rank, seniority_number, active FROM subject";

// ==========================================
// SubjectRepository - 人员仓储
// ==========================================
pub struct SubjectRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SubjectRepository {
    /// 创建新的人员仓储实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Subject> {
        Ok(Subject {
            id: row.get(0)?,
            rank: row.get(1)?,
            seniority_number: row.get(2)?,
            active: row.get(3)?,
        })
    }

    /// 写入或更新人员
    pub fn upsert(&self, subject: &Subject) -> RepositoryResult<()> {
        self.batch_upsert(std::slice::from_ref(subject)).map(|_| ())
    }

    /// 批量写入或更新人员（单事务）
    ///
    /// # 返回
    /// - Ok(usize): 写入条数
    pub fn batch_upsert(&self, subjects: &[Subject]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO subject (subject_id, rank, seniority_number, active)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(subject_id) DO UPDATE SET
                    rank = excluded.rank,
                    seniority_number = excluded.seniority_number,
                    active = excluded.active
                "#,
            )?;
            for s in subjects {
                stmt.execute(params![s.id, s.rank, s.seniority_number, s.active])?;
            }
        }
        tx.commit()?;
        Ok(subjects.len())
    }

    /// 按 ID 查询
    pub fn find_by_id(&self, subject_id: &str) -> RepositoryResult<Option<Subject>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE subject_id = ?1", SELECT_COLUMNS);
        let subject = conn
            .query_row(&sql, params![subject_id], Self::map_row)
            .optional()?;
        Ok(subject)
    }

    /// 按职级查询 (资历升序)
    pub fn list_by_rank(&self, rank: &str, active_only: bool) -> RepositoryResult<Vec<Subject>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE rank = ?1 AND (?2 = 0 OR active = 1) ORDER BY seniority_number, subject_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let subjects = stmt
            .query_map(params![rank, active_only], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subjects)
    }

    /// 全部职级 (排序去重)
    pub fn list_ranks(&self) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT rank FROM subject ORDER BY rank")?;
        let ranks = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ranks)
    }
}
