// ==========================================
// 机组排班核心 - 历史事件数据仓储
// ==========================================
// 红线: 只追加, 不修改、不删除
// 说明: 作为 HistorySink 的默认实现, 供外部审计查询
// ==========================================

use crate::domain::history::{HistoryEvent, HistoryEventType};
use crate::engine::events::HistorySink;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// HistoryEventRepository - 历史事件仓储
// ==========================================
pub struct HistoryEventRepository {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryEventRepository {
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

    fn insert_with(conn: &Connection, event: &HistoryEvent) -> RepositoryResult<()> {
        let payload = event
            .payload_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT INTO history_event (
                event_id, event_type, entity_type, entity_id, occurred_at, actor, payload_json, detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.event_id,
                event.event_type.as_str(),
                event.entity_type,
                event.entity_id,
                event.occurred_at,
                event.actor,
                payload,
                event.detail,
            ],
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<HistoryEvent> {
        let type_raw: String = row.get(1)?;
        let event_type = HistoryEventType::parse(&type_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("未知事件类型: {}", type_raw).into(),
            )
        })?;
        let payload_raw: Option<String> = row.get(6)?;
        let payload_json = payload_raw
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
            })?;

        Ok(HistoryEvent {
            event_id: row.get(0)?,
            event_type,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            occurred_at: row.get(4)?,
            actor: row.get(5)?,
            payload_json,
            detail: row.get(7)?,
        })
    }

    /// 写入单条事件
    pub fn insert(&self, event: &HistoryEvent) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, event)?;
        Ok(event.event_id.clone())
    }

    /// 批量写入（单事务）
    pub fn batch_insert(&self, events: &[HistoryEvent]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for event in events {
            Self::insert_with(&tx, event)?;
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// 按实体查询 (时间升序)
    pub fn list_by_entity(&self, entity_type: &str, entity_id: &str) -> RepositoryResult<Vec<HistoryEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT event_id, event_type, entity_type, entity_id, occurred_at, actor, payload_json, detail
            FROM history_event
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY occurred_at, rowid
            "#,
        )?;
        let events = stmt
            .query_map(params![entity_type, entity_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// 按事件类型计数
    pub fn count_by_type(&self, event_type: HistoryEventType) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM history_event WHERE event_type = ?1",
            params![event_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

// ==========================================
// HistorySink Trait 实现
// ==========================================
impl HistorySink for HistoryEventRepository {
    fn record(&self, event: HistoryEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(self.insert(&event)?)
    }
}
