// ==========================================
// 机组排班核心 - 待复训资质数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 哪些资质需要复训由外部数据决定, 此处只读写 pending_artifact
// ==========================================

use crate::domain::renewal::PendingArtifact;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// ArtifactRepository - 待复训资质仓储
// ==========================================
pub struct ArtifactRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ArtifactRepository {
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

    /// 批量写入（单事务, 同一人员同一类别覆盖到期日）
    pub fn batch_upsert(&self, artifacts: &[PendingArtifact]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO pending_artifact (subject_id, category, expiry_date)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(subject_id, category) DO UPDATE SET expiry_date = excluded.expiry_date
                "#,
            )?;
            for a in artifacts {
                stmt.execute(params![a.subject_id, a.category, a.expiry_date])?;
            }
        }
        tx.commit()?;
        Ok(artifacts.len())
    }

    /// 删除一条待复训记录
    ///
    /// # 返回
    /// - Ok(true): 已删除
    /// - Ok(false): 不存在
    pub fn delete(&self, subject_id: &str, category: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM pending_artifact WHERE subject_id = ?1 AND category = ?2",
            params![subject_id, category],
        )?;
        Ok(affected > 0)
    }

    /// 查询待复训资质
    ///
    /// # 参数
    /// - expiry_before: 只返回到期日不晚于该日期的记录 (None = 不限)
    /// - categories: 类别过滤 (None 或空 = 全部)
    ///
    /// # 返回
    /// - 按 (到期日, 人员, 类别) 升序
    pub fn list_pending(
        &self,
        expiry_before: Option<NaiveDate>,
        categories: Option<&[String]>,
    ) -> RepositoryResult<Vec<PendingArtifact>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT subject_id, category, expiry_date
            FROM pending_artifact
            WHERE (?1 IS NULL OR expiry_date <= ?1)
            ORDER BY expiry_date, subject_id, category
            "#,
        )?;

        let artifacts = stmt
            .query_map(params![expiry_before], |row| {
                Ok(PendingArtifact {
                    subject_id: row.get(0)?,
                    category: row.get(1)?,
                    expiry_date: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match categories {
            Some(cs) if !cs.is_empty() => artifacts
                .into_iter()
                .filter(|a| cs.contains(&a.category))
                .collect(),
            _ => artifacts,
        })
    }
}
