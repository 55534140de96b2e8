// ==========================================
// 机组排班核心 - 产能台账数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: reserved 仅在 overflow=1 时允许超过 capacity (表级 CHECK)
// ==========================================

use crate::domain::capacity::LedgerEntry;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// CapacityLedgerRepository - 产能台账仓储
// ==========================================
pub struct CapacityLedgerRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CapacityLedgerRepository {
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

    fn map_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
        Ok(LedgerEntry {
            period_code: row.get(0)?,
            category: row.get(1)?,
            capacity: row.get(2)?,
            reserved: row.get(3)?,
            overflow: row.get(4)?,
        })
    }

    /// 读取全部台账条目
    pub fn load_entries(&self) -> RepositoryResult<Vec<LedgerEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT period_code, category, capacity, reserved, overflow
             FROM capacity_ledger ORDER BY period_code, category",
        )?;
        let entries = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn find(&self, period_code: &str, category: &str) -> RepositoryResult<Option<LedgerEntry>> {
        let conn = self.get_conn()?;
        let entry = conn
            .query_row(
                "SELECT period_code, category, capacity, reserved, overflow
                 FROM capacity_ledger WHERE period_code = ?1 AND category = ?2",
                params![period_code, category],
                Self::map_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// 整体保存台账快照（单事务）
    pub fn save_entries(&self, entries: &[LedgerEntry]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let count = upsert_entries(&tx, entries)?;
        tx.commit()?;
        Ok(count)
    }

    /// 设置周期×类别的专属产能（保留已占用数, 重新计算 overflow）
    pub fn set_capacity(&self, period_code: &str, category: &str, capacity: u32) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO capacity_ledger (period_code, category, capacity, reserved, overflow)
            VALUES (?1, ?2, ?3, 0, 0)
            ON CONFLICT(period_code, category) DO UPDATE SET
                capacity = excluded.capacity,
                overflow = CASE WHEN reserved > excluded.capacity THEN 1 ELSE 0 END,
                updated_at = datetime('now')
            "#,
            params![period_code, category, capacity],
        )?;
        Ok(())
    }
}

/// 在调用方事务内写入台账条目
pub(crate) fn upsert_entries(conn: &Connection, entries: &[LedgerEntry]) -> RepositoryResult<usize> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO capacity_ledger (period_code, category, capacity, reserved, overflow)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(period_code, category) DO UPDATE SET
            capacity = excluded.capacity,
            reserved = excluded.reserved,
            overflow = excluded.overflow,
            updated_at = datetime('now')
        "#,
    )?;
    for e in entries {
        stmt.execute(params![e.period_code, e.category, e.capacity, e.reserved, e.overflow])?;
    }
    Ok(entries.len())
}

/// 在调用方事务内释放 1 个单位（不低于 0）
pub(crate) fn release_unit(conn: &Connection, period_code: &str, category: &str) -> RepositoryResult<()> {
    conn.execute(
        r#"
        UPDATE capacity_ledger
        SET reserved = MAX(reserved - 1, 0),
            overflow = CASE WHEN MAX(reserved - 1, 0) > capacity THEN 1 ELSE 0 END,
            updated_at = datetime('now')
        WHERE period_code = ?1 AND category = ?2
        "#,
        params![period_code, category],
    )?;
    Ok(())
}
